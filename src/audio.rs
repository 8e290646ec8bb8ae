use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;

use crate::config;
use crate::error::{FcError, FcResult};
use crate::model::{ProbeInfo, TARGET_SAMPLE_RATE};
use crate::process::{command_exists, drain_pipe, kill_and_reap, run_command_with_timeout};

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

/// Source inspection plus a pull-based PCM stream for one video.
pub trait Decoder: Send + Sync {
    /// Duration and target sample rate of the audio track.
    fn probe(&self, path: &Path) -> FcResult<ProbeInfo>;

    /// Start decoding `path` to mono s16le PCM at `sample_rate`.
    fn open(&self, path: &Path, sample_rate: u32) -> FcResult<Box<dyn PcmStream>>;
}

/// Raw PCM byte stream owned by the engine for the duration of a run.
pub trait PcmStream: Send {
    /// Read up to `len` bytes. Fewer than `len` means the stream ended.
    fn read_chunk(&mut self, len: usize) -> FcResult<Vec<u8>>;

    /// Forcibly stop the decoder. Idempotent.
    fn terminate(&mut self);

    /// Drain what is left and wait for the decoder to exit.
    fn wait(&mut self) -> FcResult<()>;

    /// Handle that can stop the decoder from another thread.
    fn terminator(&self) -> Terminator;
}

/// Cloneable kill switch for a running decoder.
#[derive(Clone)]
pub struct Terminator {
    kill: Arc<dyn Fn() + Send + Sync>,
}

impl Terminator {
    pub fn new(kill: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            kill: Arc::new(kill),
        }
    }

    pub fn terminate(&self) {
        (self.kill)();
    }
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminator").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// Little-endian i16 samples scaled into `[-1.0, 1.0)`. A trailing odd byte
/// is ignored.
#[must_use]
pub fn pcm_s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32_768.0)
        .collect()
}

/// Bytes needed for `duration_secs` of mono s16le audio.
#[must_use]
pub fn bytes_per_chunk(duration_secs: f64, sample_rate: u32) -> usize {
    let samples = (duration_secs * f64::from(sample_rate)).round();
    if samples.is_finite() && samples > 0.0 {
        samples as usize * crate::model::BYTES_PER_SAMPLE
    } else {
        0
    }
}

/// Read from `reader` until `len` bytes arrive or it reports end of stream.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

// ---------------------------------------------------------------------------
// ffprobe
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Interpret ffprobe's `-show_streams -show_format -of json` output.
pub fn parse_probe_json(path: &Path, raw: &str) -> FcResult<ProbeInfo> {
    let parsed: ProbeOutput = serde_json::from_str(raw)
        .map_err(|err| FcError::probe_failed(path, format!("unreadable ffprobe output: {err}")))?;

    let has_audio = parsed
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));
    if !has_audio {
        return Err(FcError::NoAudioTrack(path.to_path_buf()));
    }

    let duration_secs = parsed
        .format
        .and_then(|format| format.duration)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .ok_or_else(|| FcError::probe_failed(path, "container reports no duration"))?;

    Ok(ProbeInfo {
        duration_secs,
        sample_rate: TARGET_SAMPLE_RATE,
    })
}

// ---------------------------------------------------------------------------
// ffmpeg decoder
// ---------------------------------------------------------------------------

/// Decoder backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    probe_timeout: Duration,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::from_env()
    }
}

impl FfmpegDecoder {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            ffmpeg_bin: config::ffmpeg_bin(),
            ffprobe_bin: config::ffprobe_bin(),
            probe_timeout: config::ffprobe_timeout(),
        }
    }

    #[must_use]
    pub fn with_binaries(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            probe_timeout: config::ffprobe_timeout(),
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg_bin) && command_exists(&self.ffprobe_bin)
    }
}

pub(crate) fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_owned(),
        "error".to_owned(),
        "-show_streams".to_owned(),
        "-show_format".to_owned(),
        "-of".to_owned(),
        "json".to_owned(),
        input.display().to_string(),
    ]
}

pub(crate) fn decode_args(input: &Path, sample_rate: u32) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-nostdin".to_owned(),
        "-i".to_owned(),
        input.display().to_string(),
        "-vn".to_owned(),
        "-f".to_owned(),
        "s16le".to_owned(),
        "-acodec".to_owned(),
        "pcm_s16le".to_owned(),
        "-ac".to_owned(),
        "1".to_owned(),
        "-ar".to_owned(),
        sample_rate.to_string(),
        "pipe:1".to_owned(),
    ]
}

impl Decoder for FfmpegDecoder {
    fn probe(&self, path: &Path) -> FcResult<ProbeInfo> {
        tracing::debug!(stage = "probe", path = %path.display(), "probing source");
        let output = run_command_with_timeout(
            &self.ffprobe_bin,
            &probe_args(path),
            None,
            self.probe_timeout,
        )
        .map_err(|err| FcError::probe_failed(path, err.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_json(path, &stdout)
    }

    fn open(&self, path: &Path, sample_rate: u32) -> FcResult<Box<dyn PcmStream>> {
        let stream = FfmpegPcmStream::spawn(&self.ffmpeg_bin, path, sample_rate)?;
        Ok(Box::new(stream))
    }
}

/// Live ffmpeg child writing PCM to its stdout.
pub struct FfmpegPcmStream {
    child: Arc<Mutex<Child>>,
    stdout: Option<ChildStdout>,
    stderr_rx: Option<mpsc::Receiver<Vec<u8>>>,
    source: PathBuf,
    terminated: bool,
}

impl FfmpegPcmStream {
    pub fn spawn(ffmpeg_bin: &str, input: &Path, sample_rate: u32) -> FcResult<Self> {
        if !command_exists(ffmpeg_bin) {
            return Err(FcError::DecodeLaunchFailed(format!(
                "`{ffmpeg_bin}` not found on PATH"
            )));
        }

        let mut child = Command::new(ffmpeg_bin)
            .args(decode_args(input, sample_rate))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| FcError::DecodeLaunchFailed(format!("{ffmpeg_bin}: {err}")))?;

        let stdout = child.stdout.take();
        let stderr_rx = drain_pipe(child.stderr.take());
        tracing::debug!(
            stage = "decode",
            pid = child.id(),
            path = %input.display(),
            sample_rate,
            "decoder spawned"
        );

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdout,
            stderr_rx: Some(stderr_rx),
            source: input.to_path_buf(),
            terminated: false,
        })
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr_rx
            .take()
            .and_then(|rx| rx.recv_timeout(Duration::from_millis(200)).ok())
            .map(|buf| String::from_utf8_lossy(&buf).trim().to_owned())
            .unwrap_or_default()
    }
}

impl PcmStream for FfmpegPcmStream {
    fn read_chunk(&mut self, len: usize) -> FcResult<Vec<u8>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(Vec::new());
        };
        Ok(read_up_to(stdout, len)?)
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.stdout = None;
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        kill_and_reap(&mut child);
        tracing::debug!(stage = "decode", source = %self.source.display(), "decoder terminated");
    }

    fn wait(&mut self) -> FcResult<()> {
        // Discard unread PCM so ffmpeg is never stuck on a full pipe while we
        // wait for it.
        if let Some(mut stdout) = self.stdout.take() {
            let discarded = io::copy(&mut stdout, &mut io::sink())?;
            if discarded > 0 {
                tracing::debug!(stage = "decode", discarded, "dropped trailing decoder output");
            }
        }

        // Poll rather than block so a concurrent terminator can still take
        // the lock.
        let status = loop {
            let polled = {
                let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
                child.try_wait()?
            };
            if let Some(status) = polled {
                break status;
            }
            std::thread::sleep(Duration::from_millis(20));
        };
        let stderr = self.collect_stderr();
        if status.success() || self.terminated {
            return Ok(());
        }
        tracing::warn!(
            stage = "decode",
            status = status.code().unwrap_or(-1),
            stderr = %stderr,
            "decoder exited with failure after stream end"
        );
        Ok(())
    }

    fn terminator(&self) -> Terminator {
        let child = Arc::clone(&self.child);
        Terminator::new(move || {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
            }
        })
    }
}

impl Drop for FfmpegPcmStream {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(child.try_wait(), Ok(None)) {
            kill_and_reap(&mut child);
        }
    }
}
