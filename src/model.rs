use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whisper models expect 16 kHz mono input.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Nominal chunk stride in seconds.
pub const DEFAULT_CHUNK_DURATION_SECS: f64 = 10.0;

/// Signed 16-bit PCM.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Which inference pass produced a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Original,
    Translated,
}

impl PassKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Translated => "translated",
        }
    }

    /// The model task that produces this pass.
    #[must_use]
    pub const fn task(self) -> TaskMode {
        match self {
            Self::Original => TaskMode::Transcribe,
            Self::Translated => TaskMode::Translate,
        }
    }
}

/// Task mode handed to the speech model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    Transcribe,
    Translate,
}

impl TaskMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
        }
    }
}

/// Which passes run for every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassSet {
    /// Translate only; results feed the segment store.
    #[default]
    TranslateOnly,
    /// Translate, then transcribe the same samples in the source language.
    Dual,
}

impl PassSet {
    /// Passes in invocation order. Translation always comes first.
    #[must_use]
    pub fn passes(self) -> &'static [PassKind] {
        match self {
            Self::TranslateOnly => &[PassKind::Translated],
            Self::Dual => &[PassKind::Translated, PassKind::Original],
        }
    }

    #[must_use]
    pub const fn is_dual(self) -> bool {
        matches!(self, Self::Dual)
    }
}

/// A timestamped span of recognized or translated text.
///
/// Times are chunk-relative when a model returns them and timeline-absolute
/// once the engine has applied the chunk offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    pub pass: PassKind,
}

impl Segment {
    #[must_use]
    pub fn new(start_sec: f64, end_sec: f64, text: impl Into<String>, pass: PassKind) -> Self {
        Self {
            start_sec,
            end_sec,
            text: text.into(),
            pass,
        }
    }

    /// Shift both bounds by `offset_sec`.
    #[must_use]
    pub fn shifted(mut self, offset_sec: f64) -> Self {
        self.start_sec += offset_sec;
        self.end_sec += offset_sec;
        self
    }

    /// Inclusive on both ends.
    #[must_use]
    pub fn contains(&self, time_sec: f64) -> bool {
        self.start_sec <= time_sec && time_sec <= self.end_sec
    }

    #[must_use]
    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// One fixed-duration slice of decoded audio. Consumed immediately.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u64,
    pub offset_sec: f64,
    pub raw_bytes: Vec<u8>,
    pub sample_rate: u32,
}

impl Chunk {
    #[must_use]
    pub fn new(index: u64, chunk_duration_sec: f64, raw_bytes: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            index,
            offset_sec: index as f64 * chunk_duration_sec,
            raw_bytes,
            sample_rate,
        }
    }

    /// Duration actually carried by the bytes, which is shorter than the
    /// nominal stride for a final partial chunk.
    #[must_use]
    pub fn audio_duration_sec(&self) -> f64 {
        let samples = self.raw_bytes.len() / BYTES_PER_SAMPLE;
        samples as f64 / f64::from(self.sample_rate)
    }
}

/// What probing the source reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub duration_secs: f64,
    pub sample_rate: u32,
}

/// Parameters for a single model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub task: TaskMode,
    /// Reduced-precision compute. The engine always sets this to `false`.
    pub fp16: bool,
    pub language: Option<String>,
    /// Rate the samples were decoded at.
    pub sample_rate: u32,
}

impl InferenceRequest {
    #[must_use]
    pub fn full_precision(task: TaskMode, language: Option<String>) -> Self {
        Self {
            task,
            fp16: false,
            language,
            sample_rate: TARGET_SAMPLE_RATE,
        }
    }

    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

/// Segment as returned by a model, relative to the chunk start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

impl ModelSegment {
    #[must_use]
    pub fn new(start_sec: f64, end_sec: f64, text: impl Into<String>) -> Self {
        Self {
            start_sec,
            end_sec,
            text: text.into(),
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub video_path: PathBuf,
    pub passes: PassSet,
    pub total_duration_secs: f64,
    pub chunks_processed: u64,
    pub translated_segments: usize,
    pub original_segments: usize,
    pub subtitle_paths: Vec<PathBuf>,
    pub started_at_rfc3339: String,
    pub finished_at_rfc3339: String,
}
