use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use crate::backend::{Engine, SpeechModel, extract_segments_from_json};
use crate::config;
use crate::error::{FcError, FcResult};
use crate::model::{InferenceRequest, ModelSegment, TaskMode};
use crate::process::{command_exists, run_command_with_timeout};

/// whisper.cpp driven through its `whisper-cli` binary, one invocation per
/// chunk and pass.
#[derive(Debug, Clone)]
pub struct WhisperCppEngine {
    binary: String,
    model_path: PathBuf,
    timeout: Duration,
    threads: Option<u32>,
}

impl Default for WhisperCppEngine {
    fn default() -> Self {
        Self::from_env()
    }
}

impl WhisperCppEngine {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            binary: config::whisper_cpp_bin(),
            model_path: config::model_path(),
            timeout: config::infer_timeout(),
            threads: None,
        }
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_model_path(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.model_path = model_path.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: Option<u32>) -> Self {
        self.threads = threads;
        self
    }
}

impl Engine for WhisperCppEngine {
    fn name(&self) -> &'static str {
        "whisper.cpp"
    }

    /// `models/ggml-base.bin` → `base`.
    fn model_label(&self) -> String {
        let stem = self
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = stem.strip_prefix("ggml-").unwrap_or(&stem);
        if label.is_empty() {
            "whisper".to_owned()
        } else {
            label.to_owned()
        }
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary) && self.model_path.is_file()
    }

    fn load(&self) -> FcResult<Box<dyn SpeechModel>> {
        if !command_exists(&self.binary) {
            return Err(FcError::BackendUnavailable(format!(
                "`{}` not found on PATH",
                self.binary
            )));
        }
        if !self.model_path.is_file() {
            return Err(FcError::BackendUnavailable(format!(
                "model file `{}` does not exist",
                self.model_path.display()
            )));
        }
        let work_dir = tempfile::Builder::new()
            .prefix("franken-captions-")
            .tempdir()?;
        tracing::debug!(
            engine = self.name(),
            model = %self.model_path.display(),
            work_dir = %work_dir.path().display(),
            "model ready"
        );
        Ok(Box::new(WhisperCppModel {
            engine: self.clone(),
            work_dir,
            invocations: 0,
        }))
    }
}

/// Per-run handle: the engine settings plus a scratch directory that is
/// removed when the run ends.
#[derive(Debug)]
pub struct WhisperCppModel {
    engine: WhisperCppEngine,
    work_dir: TempDir,
    invocations: u64,
}

impl SpeechModel for WhisperCppModel {
    fn infer(
        &mut self,
        samples: &[f32],
        request: &InferenceRequest,
    ) -> FcResult<Vec<ModelSegment>> {
        self.invocations += 1;
        let stem = format!("chunk_{:06}_{}", self.invocations, request.task.as_str());
        let wav_path = self.work_dir.path().join(format!("{stem}.wav"));
        let output_prefix = self.work_dir.path().join(&stem);

        write_wav(&wav_path, samples, request.sample_rate)?;
        let args = build_args(&self.engine, request, &wav_path, &output_prefix);
        let outcome = run_command_with_timeout(&self.engine.binary, &args, None, self.engine.timeout);
        let _ = fs::remove_file(&wav_path);
        outcome.map_err(|err| FcError::InferenceFailed(err.to_string()))?;

        let json_path = PathBuf::from(format!("{}.json", output_prefix.display()));
        let body = fs::read_to_string(&json_path).map_err(|err| {
            FcError::InferenceFailed(format!(
                "missing whisper.cpp output `{}`: {err}",
                json_path.display()
            ))
        })?;
        let _ = fs::remove_file(&json_path);
        let raw: serde_json::Value = serde_json::from_str(&body)
            .map_err(|err| FcError::InferenceFailed(format!("unreadable whisper.cpp json: {err}")))?;
        Ok(extract_segments_from_json(&raw))
    }
}

pub(crate) fn build_args(
    engine: &WhisperCppEngine,
    request: &InferenceRequest,
    wav_path: &Path,
    output_prefix: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-m".to_owned(),
        engine.model_path.display().to_string(),
        "-f".to_owned(),
        wav_path.display().to_string(),
        "-of".to_owned(),
        output_prefix.display().to_string(),
        "-oj".to_owned(),
        "-np".to_owned(),
        "-l".to_owned(),
        request
            .language
            .clone()
            .unwrap_or_else(|| "auto".to_owned()),
    ];

    if request.task == TaskMode::Translate {
        args.push("-tr".to_owned());
    }

    // whisper.cpp's CPU path computes in f32.
    if !request.fp16 {
        args.push("-ng".to_owned());
    }

    if let Some(threads) = engine.threads {
        args.push("-t".to_owned());
        args.push(threads.to_string());
    }

    args
}

/// 16-bit mono WAV, the input whisper-cli expects.
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> FcResult<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |err: hound::Error| FcError::InferenceFailed(format!("chunk wav: {err}"));
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in samples {
        let scaled = (sample * 32_768.0).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX));
        writer.write_sample(scaled as i16).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}
