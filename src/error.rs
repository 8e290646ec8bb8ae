use std::path::PathBuf;

use thiserror::Error;

pub type FcResult<T> = Result<T, FcError>;

#[derive(Debug, Error)]
pub enum FcError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("could not probe `{path}`: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("no audio stream found in `{0}`")]
    NoAudioTrack(PathBuf),

    #[error("could not launch audio decoder: {0}")]
    DecodeLaunchFailed(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("subtitle write failed: {0}")]
    SinkWriteFailed(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("run cancelled: {0}")]
    Cancelled(String),

    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
}

impl FcError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        Self::CommandFailed {
            command,
            status,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn probe_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable, machine-readable code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "FC-IO",
            Self::Json(_) => "FC-JSON",
            Self::CommandMissing { .. } => "FC-CMD-MISSING",
            Self::CommandFailed { .. } => "FC-CMD-FAILED",
            Self::CommandTimedOut { .. } => "FC-CMD-TIMEOUT",
            Self::ProbeFailed { .. } => "FC-PROBE-FAILED",
            Self::NoAudioTrack(_) => "FC-NO-AUDIO",
            Self::DecodeLaunchFailed(_) => "FC-DECODE-LAUNCH",
            Self::InferenceFailed(_) => "FC-INFERENCE",
            Self::SinkWriteFailed(_) => "FC-SINK-WRITE",
            Self::BackendUnavailable(_) => "FC-BACKEND-UNAVAILABLE",
            Self::InvalidRequest(_) => "FC-INVALID-REQUEST",
            Self::Cancelled(_) => "FC-CANCELLED",
            Self::WorkerPanicked(_) => "FC-WORKER-PANICKED",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {trimmed}")
    }
}
