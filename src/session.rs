//! Owns the worker thread for one run at a time.
//!
//! Starting a new run cancels and joins the previous worker before the shared
//! store is cleared and the gate re-armed, so a stale worker can never write
//! into the next run's timeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::engine::{CancellationToken, ChunkTranscriber};
use crate::error::{FcError, FcResult};
use crate::gate::ReadinessGate;
use crate::model::RunSummary;
use crate::store::SegmentStore;

struct Worker {
    handle: JoinHandle<FcResult<RunSummary>>,
    token: CancellationToken,
    video_path: PathBuf,
}

pub struct Session {
    transcriber: Arc<ChunkTranscriber>,
    worker: Option<Worker>,
}

impl Session {
    #[must_use]
    pub fn new(transcriber: ChunkTranscriber) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            worker: None,
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<SegmentStore> {
        self.transcriber.store()
    }

    #[must_use]
    pub fn gate(&self) -> Arc<ReadinessGate> {
        self.transcriber.gate()
    }

    /// Video of the current (or last unjoined) run.
    #[must_use]
    pub fn video_path(&self) -> Option<&Path> {
        self.worker.as_ref().map(|w| w.video_path.as_path())
    }

    /// Token of the current run, for wiring into signal handlers.
    #[must_use]
    pub fn token(&self) -> Option<CancellationToken> {
        self.worker.as_ref().map(|w| w.token.clone())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Start processing `video_path` on a fresh worker thread.
    pub fn start(&mut self, video_path: impl Into<PathBuf>) -> FcResult<()> {
        if let Some(previous) = self.worker.take() {
            tracing::info!(video = %previous.video_path.display(), "replacing active run");
            previous.token.cancel();
            match join_worker(previous.handle) {
                Ok(Ok(_)) | Ok(Err(FcError::Cancelled(_))) => {}
                Ok(Err(err)) => tracing::debug!(error = %err, "previous run ended with error"),
                Err(err) => tracing::warn!(error = %err, "previous worker panicked"),
            }
        }

        let store = self.transcriber.store();
        store.clear();
        self.transcriber.gate().arm();

        let video_path = video_path.into();
        let token = CancellationToken::new();
        let transcriber = Arc::clone(&self.transcriber);
        let worker_token = token.clone();
        let worker_path = video_path.clone();
        let handle = thread::Builder::new()
            .name("caption-engine".to_owned())
            .spawn(move || transcriber.run(&worker_path, &worker_token))?;

        self.worker = Some(Worker {
            handle,
            token,
            video_path,
        });
        Ok(())
    }

    /// Request cancellation of the current run. Does not wait.
    pub fn cancel(&self) {
        if let Some(worker) = &self.worker {
            worker.token.cancel();
        }
    }

    /// Wait for the current run and return its outcome.
    pub fn join(&mut self) -> FcResult<RunSummary> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| FcError::InvalidRequest("no run has been started".to_owned()))?;
        join_worker(worker.handle)?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.token.cancel();
            if let Err(err) = join_worker(worker.handle) {
                tracing::warn!(error = %err, "worker panicked during shutdown");
            }
        }
    }
}

fn join_worker(
    handle: JoinHandle<FcResult<RunSummary>>,
) -> FcResult<FcResult<RunSummary>> {
    handle
        .join()
        .map_err(|_| FcError::WorkerPanicked("caption engine worker".to_owned()))
}
