#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use franken_captions::audio::{Decoder, PcmStream, Terminator, bytes_per_chunk};
use franken_captions::backend::{Engine, SpeechModel};
use franken_captions::model::{InferenceRequest, ModelSegment, ProbeInfo, TARGET_SAMPLE_RATE};
use franken_captions::status::{StatusReceiver, StatusUpdate};
use franken_captions::{FcError, FcResult};

/// Mono s16le silence lasting `secs` at the decode rate.
pub fn pcm_seconds(secs: f64) -> Vec<u8> {
    vec![0u8; bytes_per_chunk(secs, TARGET_SAMPLE_RATE)]
}

pub fn probe_ok(duration_secs: f64) -> ProbeScript {
    ProbeScript::Ok(ProbeInfo {
        duration_secs,
        sample_rate: TARGET_SAMPLE_RATE,
    })
}

/// Every status received within `timeout` of the previous one.
pub fn collect_statuses(receiver: &StatusReceiver, timeout: Duration) -> Vec<StatusUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = receiver.recv_timeout(timeout) {
        updates.push(update);
    }
    updates
}

pub fn terminal_statuses(updates: &[StatusUpdate]) -> Vec<&StatusUpdate> {
    updates.iter().filter(|u| u.is_terminal()).collect()
}

// ---------------------------------------------------------------------------
// Scripted decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ProbeScript {
    Ok(ProbeInfo),
    NoAudio,
    Failed(String),
}

/// Call counters shared between a [`ScriptedDecoder`] and the test.
#[derive(Debug, Default)]
pub struct DecoderLog {
    pub probes: AtomicUsize,
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub terminations: AtomicUsize,
    pub kills: AtomicUsize,
    pub waits: AtomicUsize,
}

impl DecoderLog {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Decoder serving a fixed PCM buffer. With `hang_at_end` the stream blocks
/// once the buffer is exhausted until it is killed, like an ffmpeg process
/// stuck on a slow source. `wait` then blocks the same way.
pub struct ScriptedDecoder {
    probe: ProbeScript,
    pcm: Vec<u8>,
    hang_at_end: bool,
    open_error: Option<String>,
    read_error_at: Option<usize>,
    log: Arc<DecoderLog>,
}

impl ScriptedDecoder {
    pub fn new(probe: ProbeScript, pcm: Vec<u8>) -> Self {
        Self {
            probe,
            pcm,
            hang_at_end: false,
            open_error: None,
            read_error_at: None,
            log: Arc::new(DecoderLog::default()),
        }
    }

    pub fn hanging_at_end(mut self) -> Self {
        self.hang_at_end = true;
        self
    }

    pub fn failing_open(mut self, message: &str) -> Self {
        self.open_error = Some(message.to_owned());
        self
    }

    /// The `n`th read (1-based) fails with a broken pipe.
    pub fn failing_read(mut self, n: usize) -> Self {
        self.read_error_at = Some(n);
        self
    }

    pub fn log(&self) -> Arc<DecoderLog> {
        Arc::clone(&self.log)
    }
}

impl Decoder for ScriptedDecoder {
    fn probe(&self, path: &Path) -> FcResult<ProbeInfo> {
        self.log.probes.fetch_add(1, Ordering::SeqCst);
        match &self.probe {
            ProbeScript::Ok(info) => Ok(*info),
            ProbeScript::NoAudio => Err(FcError::NoAudioTrack(path.to_path_buf())),
            ProbeScript::Failed(reason) => Err(FcError::probe_failed(path, reason.clone())),
        }
    }

    fn open(&self, _path: &Path, _sample_rate: u32) -> FcResult<Box<dyn PcmStream>> {
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.open_error {
            return Err(FcError::DecodeLaunchFailed(message.clone()));
        }
        Ok(Box::new(ScriptedStream {
            pcm: self.pcm.clone(),
            pos: 0,
            hang_at_end: self.hang_at_end,
            read_error_at: self.read_error_at,
            kill: Arc::new(KillSwitch::default()),
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Debug, Default)]
struct KillSwitch {
    killed: Mutex<bool>,
    cond: Condvar,
}

impl KillSwitch {
    fn kill(&self) {
        let mut killed = self.killed.lock().unwrap();
        *killed = true;
        self.cond.notify_all();
    }

    fn is_killed(&self) -> bool {
        *self.killed.lock().unwrap()
    }

    fn wait_killed(&self) {
        let mut killed = self.killed.lock().unwrap();
        while !*killed {
            killed = self.cond.wait(killed).unwrap();
        }
    }
}

struct ScriptedStream {
    pcm: Vec<u8>,
    pos: usize,
    hang_at_end: bool,
    read_error_at: Option<usize>,
    kill: Arc<KillSwitch>,
    log: Arc<DecoderLog>,
}

impl PcmStream for ScriptedStream {
    fn read_chunk(&mut self, len: usize) -> FcResult<Vec<u8>> {
        let read_no = self.log.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.read_error_at == Some(read_no) {
            return Err(FcError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "decoder pipe closed",
            )));
        }
        if self.pos >= self.pcm.len() && self.hang_at_end {
            self.kill.wait_killed();
        }
        if self.kill.is_killed() {
            return Ok(Vec::new());
        }
        let end = (self.pos + len).min(self.pcm.len());
        let out = self.pcm[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    fn terminate(&mut self) {
        self.log.terminations.fetch_add(1, Ordering::SeqCst);
        self.kill.kill();
    }

    fn wait(&mut self) -> FcResult<()> {
        self.log.waits.fetch_add(1, Ordering::SeqCst);
        if self.hang_at_end {
            self.kill.wait_killed();
        }
        Ok(())
    }

    fn terminator(&self) -> Terminator {
        let kill = Arc::clone(&self.kill);
        let log = Arc::clone(&self.log);
        Terminator::new(move || {
            log.kills.fetch_add(1, Ordering::SeqCst);
            kill.kill();
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

/// What one `infer` call returns. Calls past the end of the script return no
/// segments.
#[derive(Debug, Clone)]
pub enum InferScript {
    Segments(Vec<ModelSegment>),
    Fail(String),
    Panic(String),
}

pub fn segs(spans: &[(f64, f64, &str)]) -> InferScript {
    InferScript::Segments(
        spans
            .iter()
            .map(|&(start, end, text)| ModelSegment::new(start, end, text))
            .collect(),
    )
}

#[derive(Debug, Default)]
pub struct EngineLog {
    pub loads: AtomicUsize,
    pub requests: Mutex<Vec<InferenceRequest>>,
    pub sample_counts: Mutex<Vec<usize>>,
}

impl EngineLog {
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn sample_counts(&self) -> Vec<usize> {
        self.sample_counts.lock().unwrap().clone()
    }
}

pub struct ScriptedEngine {
    script: Arc<Mutex<VecDeque<InferScript>>>,
    load_error: Option<String>,
    log: Arc<EngineLog>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<InferScript>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            load_error: None,
            log: Arc::new(EngineLog::default()),
        }
    }

    pub fn failing_load(mut self, message: &str) -> Self {
        self.load_error = Some(message.to_owned());
        self
    }

    pub fn log(&self) -> Arc<EngineLog> {
        Arc::clone(&self.log)
    }

    /// Queue more results, e.g. for a second run on the same engine.
    pub fn push(&self, step: InferScript) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn script_handle(&self) -> Arc<Mutex<VecDeque<InferScript>>> {
        Arc::clone(&self.script)
    }
}

impl Engine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model_label(&self) -> String {
        "base".to_owned()
    }

    fn is_available(&self) -> bool {
        true
    }

    fn load(&self) -> FcResult<Box<dyn SpeechModel>> {
        self.log.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.load_error {
            return Err(FcError::BackendUnavailable(message.clone()));
        }
        Ok(Box::new(ScriptedModel {
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedModel {
    script: Arc<Mutex<VecDeque<InferScript>>>,
    log: Arc<EngineLog>,
}

impl SpeechModel for ScriptedModel {
    fn infer(
        &mut self,
        samples: &[f32],
        request: &InferenceRequest,
    ) -> FcResult<Vec<ModelSegment>> {
        self.log.requests.lock().unwrap().push(request.clone());
        self.log.sample_counts.lock().unwrap().push(samples.len());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(InferScript::Segments(segments)) => Ok(segments),
            Some(InferScript::Fail(message)) => Err(FcError::InferenceFailed(message)),
            Some(InferScript::Panic(message)) => panic!("{message}"),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn video_path() -> PathBuf {
    PathBuf::from("/videos/fixture.mp4")
}

/// 30 s source whose three chunks yield `[{0,5},{5,10}]`, `[{0,4},{4,8}]`
/// and `[{0,3}]`.
pub fn thirty_second_fixture() -> (ScriptedDecoder, ScriptedEngine) {
    let decoder = ScriptedDecoder::new(probe_ok(30.0), pcm_seconds(30.0));
    let engine = ScriptedEngine::new(vec![
        segs(&[(0.0, 5.0, "Hello."), (5.0, 10.0, "This is chunk one.")]),
        segs(&[(0.0, 4.0, "Second chunk here."), (4.0, 8.0, "Still chunk two.")]),
        segs(&[(0.0, 3.0, "Final words.")]),
    ]);
    (decoder, engine)
}

// ---------------------------------------------------------------------------
// External tools
// ---------------------------------------------------------------------------

pub fn ffmpeg_available() -> bool {
    franken_captions::process::command_exists("ffmpeg")
        && franken_captions::process::command_exists("ffprobe")
}

/// Stub `whisper-cli` that records its arguments in `last_args.txt` and its
/// input in `last_input.wav` next to itself, and answers in the `-oj` layout. With `-tr` the text is English,
/// otherwise French.
#[cfg(unix)]
pub fn write_whisper_stub(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let stub_path = dir.join("whisper_cli_stub.sh");
    let script = r#"#!/usr/bin/env bash
set -euo pipefail
out_prefix=""
input=""
translate=0
for arg in "$@"; do echo "$arg"; done > "$(dirname "$0")/last_args.txt"
while [[ $# -gt 0 ]]; do
  case "$1" in
    -of) out_prefix="$2"; shift 2 ;;
    -f) input="$2"; shift 2 ;;
    -tr) translate=1; shift ;;
    *) shift ;;
  esac
done
if [[ -z "${out_prefix}" || ! -s "${input}" ]]; then
  echo "missing -of prefix or input wav" >&2
  exit 2
fi
cp "${input}" "$(dirname "$0")/last_input.wav"
if [[ "${translate}" == "1" ]]; then text=" Good evening."; else text=" Bonsoir."; fi
cat > "${out_prefix}.json" <<JSON
{"result":{"language":"fr"},"transcription":[
 {"timestamps":{"from":"00:00:00,000","to":"00:00:02,500"},"offsets":{"from":0,"to":2500},"text":"${text}"},
 {"offsets":{"from":2500,"to":4000},"text":" Encore."}
]}
JSON
"#;
    std::fs::write(&stub_path, script).expect("write stub");
    let mut perms = std::fs::metadata(&stub_path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&stub_path, perms).expect("chmod");
    stub_path
}

