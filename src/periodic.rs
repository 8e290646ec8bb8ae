//! Fixed-interval callbacks on a dedicated thread.
//!
//! Stands in for a GUI toolkit timer: the callback runs every `interval`
//! until it returns [`Tick::Stop`], [`PeriodicTask::stop`] is called, or the
//! task is dropped.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{FcError, FcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl PeriodicTask {
    /// Start calling `callback` every `interval`. The first call happens one
    /// interval after spawn.
    pub fn spawn<F>(name: &str, interval: Duration, mut callback: F) -> FcResult<Self>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_owned();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut ticks: u64 = 0;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    ticks += 1;
                    if callback() == Tick::Stop {
                        tracing::debug!(task = %thread_name, ticks, "periodic task finished");
                        break;
                    }
                }
                ticks
            })?;
        Ok(Self {
            name: name.to_owned(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the callback thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the task and wait for the in-flight callback to return. Returns
    /// the number of callback invocations. A second call returns `Ok(0)`.
    pub fn stop(&mut self) -> FcResult<u64> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FcError::WorkerPanicked(format!("periodic task `{}`", self.name))),
            None => Ok(0),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(task = %self.name, error = %err, "periodic task ended abnormally");
        }
    }
}
