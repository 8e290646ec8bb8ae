//! Environment-driven tool configuration.
//!
//! Every external binary and timeout can be overridden through a
//! `FRANKEN_CAPTIONS_*` variable. Values are read when a collaborator is
//! constructed, never mid-run.

use std::path::PathBuf;
use std::time::Duration;

pub const FFMPEG_BIN_ENV: &str = "FRANKEN_CAPTIONS_FFMPEG_BIN";
pub const FFPROBE_BIN_ENV: &str = "FRANKEN_CAPTIONS_FFPROBE_BIN";
pub const WHISPER_CPP_BIN_ENV: &str = "FRANKEN_CAPTIONS_WHISPER_CPP_BIN";
pub const MODEL_ENV: &str = "FRANKEN_CAPTIONS_MODEL";
pub const FFPROBE_TIMEOUT_ENV: &str = "FRANKEN_CAPTIONS_FFPROBE_TIMEOUT_MS";
pub const INFER_TIMEOUT_ENV: &str = "FRANKEN_CAPTIONS_INFER_TIMEOUT_MS";

const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
const DEFAULT_FFPROBE_BIN: &str = "ffprobe";
const DEFAULT_WHISPER_CPP_BIN: &str = "whisper-cli";
const DEFAULT_MODEL_PATH: &str = "models/ggml-base.bin";

#[must_use]
pub fn ffmpeg_bin() -> String {
    string_from_env(FFMPEG_BIN_ENV, DEFAULT_FFMPEG_BIN)
}

#[must_use]
pub fn ffprobe_bin() -> String {
    string_from_env(FFPROBE_BIN_ENV, DEFAULT_FFPROBE_BIN)
}

#[must_use]
pub fn whisper_cpp_bin() -> String {
    string_from_env(WHISPER_CPP_BIN_ENV, DEFAULT_WHISPER_CPP_BIN)
}

#[must_use]
pub fn model_path() -> PathBuf {
    PathBuf::from(string_from_env(MODEL_ENV, DEFAULT_MODEL_PATH))
}

#[must_use]
pub fn ffprobe_timeout() -> Duration {
    duration_from_env(FFPROBE_TIMEOUT_ENV, Duration::from_secs(30))
}

#[must_use]
pub fn infer_timeout() -> Duration {
    duration_from_env(INFER_TIMEOUT_ENV, Duration::from_secs(600))
}

fn string_from_env(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| fallback.to_owned())
}

pub(crate) fn duration_from_env(key: &str, fallback: Duration) -> Duration {
    let Some(raw) = std::env::var(key).ok() else {
        return fallback;
    };
    let Ok(parsed) = raw.trim().parse::<u64>() else {
        return fallback;
    };
    Duration::from_millis(parsed)
}
