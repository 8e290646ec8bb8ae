use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};

use crate::engine::PipelineConfig;
use crate::error::{FcError, FcResult};
use crate::model::{DEFAULT_CHUNK_DURATION_SECS, PassSet};

// ---------------------------------------------------------------------------
// Graceful Ctrl+C shutdown
// ---------------------------------------------------------------------------

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Coordinates Ctrl+C shutdown.
///
/// The signal handler only sets a global flag; the main loop polls
/// [`ShutdownController::is_shutting_down`] and cancels the active run, which
/// kills the ffmpeg decoder.
pub struct ShutdownController;

impl ShutdownController {
    /// Install the Ctrl+C handler. `on_signal` runs in the handler thread.
    ///
    /// Errors are non-fatal; callers may log and continue without signal
    /// handling.
    pub fn install(on_signal: Option<Box<dyn Fn() + Send + Sync + 'static>>) -> FcResult<()> {
        ctrlc::set_handler(move || {
            SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
            tracing::info!("shutdown signal received (Ctrl+C)");
            if let Some(ref cb) = on_signal {
                cb();
            }
        })
        .map_err(|e| FcError::Io(std::io::Error::other(format!("ctrlc handler: {e}"))))?;
        Ok(())
    }

    #[must_use]
    pub fn is_shutting_down() -> bool {
        SHUTDOWN_FLAG.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn reset() {
        SHUTDOWN_FLAG.store(false, Ordering::SeqCst);
    }

    /// 128 + SIGINT.
    #[must_use]
    pub const fn signal_exit_code() -> i32 {
        130
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "franken_captions")]
#[command(about = "Chunked video translation with live captions via ffmpeg and whisper.cpp")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Translate a video chunk by chunk, streaming progress to stderr.
    Run(RunArgs),
    /// Print the duration and sample rate ffprobe reports for a video.
    Probe(ProbeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the input video or audio file.
    pub video: PathBuf,

    /// Also transcribe in the source language and write both subtitle files.
    #[arg(long)]
    pub dual: bool,

    /// Directory for `<stem>_original.srt` / `<stem>_translated.srt`.
    /// Defaults to the video's directory in dual mode.
    #[arg(long)]
    pub subtitles_dir: Option<PathBuf>,

    /// whisper.cpp model file (overrides FRANKEN_CAPTIONS_MODEL).
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Source language hint (e.g. fr, ja). Auto-detected when omitted.
    #[arg(long)]
    pub language: Option<String>,

    /// Chunk length in seconds.
    #[arg(long, default_value_t = DEFAULT_CHUNK_DURATION_SECS)]
    pub chunk_seconds: f64,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn to_config(&self) -> FcResult<PipelineConfig> {
        if !self.chunk_seconds.is_finite() || self.chunk_seconds <= 0.0 {
            return Err(FcError::InvalidRequest(format!(
                "--chunk-seconds must be positive, got {}",
                self.chunk_seconds
            )));
        }
        if let Some(language) = &self.language
            && language.trim().is_empty()
        {
            return Err(FcError::InvalidRequest(
                "--language must not be empty".to_owned(),
            ));
        }

        let passes = if self.dual {
            PassSet::Dual
        } else {
            PassSet::TranslateOnly
        };
        let subtitle_dir = match (&self.subtitles_dir, self.dual) {
            (Some(dir), _) => Some(dir.clone()),
            (None, true) => Some(
                self.video
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map_or_else(|| PathBuf::from("."), PathBuf::from),
            ),
            (None, false) => None,
        };

        Ok(PipelineConfig {
            chunk_duration_secs: self.chunk_seconds,
            passes,
            language: self.language.as_ref().map(|l| l.trim().to_owned()),
            subtitle_dir,
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct ProbeArgs {
    pub video: PathBuf,

    #[arg(long)]
    pub json: bool,
}
