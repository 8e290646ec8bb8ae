//! Cross-thread progress notifications for the UI side.
//!
//! The engine pushes [`StatusUpdate`] values; consumers render them with
//! `Display`, which reproduces the exact progress strings UI layers match on.

use std::fmt;
use std::sync::mpsc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusUpdate {
    LoadingModel { model: String },
    Progress { offset_secs: f64, total_secs: f64, dual: bool },
    Playing,
    Complete { dual: bool },
    NoAudioStream,
    ProbeFailed,
    Cancelled,
    Failed { message: String },
}

impl StatusUpdate {
    /// Whether this update ends a run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. }
                | Self::NoAudioStream
                | Self::ProbeFailed
                | Self::Cancelled
                | Self::Failed { .. }
        )
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadingModel { model } => write!(f, "Loading '{model}' model..."),
            Self::Progress {
                offset_secs,
                total_secs,
                dual,
            } => {
                let verb = if *dual {
                    "Transcribing & translating"
                } else {
                    "Translating"
                };
                write!(
                    f,
                    "{verb}... ({}s / {}s)",
                    whole_seconds(*offset_secs),
                    whole_seconds(*total_secs)
                )
            }
            Self::Playing => f.write_str("Playing..."),
            Self::Complete { dual: false } => f.write_str("Translation complete."),
            Self::Complete { dual: true } => f.write_str("Transcription & translation complete."),
            Self::NoAudioStream => f.write_str("Error: No audio stream found."),
            Self::ProbeFailed => f.write_str("Error: ffmpeg failed. Is it installed?"),
            Self::Cancelled => f.write_str("Translation cancelled."),
            Self::Failed { message } => write!(f, "Error: {message}"),
        }
    }
}

/// Floor toward zero, clamping negatives and NaN to zero.
fn whole_seconds(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        secs.trunc() as u64
    } else {
        0
    }
}

/// Sending half, owned by the engine.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: Option<mpsc::Sender<StatusUpdate>>,
}

impl StatusReporter {
    /// A reporter that only logs.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Log and forward. A disconnected receiver is not an error: the UI may
    /// have gone away while the worker is still finishing.
    pub fn report(&self, update: StatusUpdate) {
        tracing::info!(status = %update, terminal = update.is_terminal(), "status");
        if let Some(tx) = &self.tx {
            let _ = tx.send(update);
        }
    }
}

/// Receiving half, owned by the UI side.
#[derive(Debug)]
pub struct StatusReceiver {
    rx: mpsc::Receiver<StatusUpdate>,
}

impl StatusReceiver {
    /// Non-blocking: every update queued so far.
    pub fn drain(&self) -> Vec<StatusUpdate> {
        self.rx.try_iter().collect()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<StatusUpdate> {
        self.rx.recv_timeout(timeout).ok()
    }
}

#[must_use]
pub fn status_channel() -> (StatusReporter, StatusReceiver) {
    let (tx, rx) = mpsc::channel();
    (StatusReporter { tx: Some(tx) }, StatusReceiver { rx })
}
