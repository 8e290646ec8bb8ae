//! Chunked decode → infer → emit loop.
//!
//! [`ChunkTranscriber::run`] drives one run on the calling thread: probe the
//! source, load the model, then pull fixed-size PCM chunks from the decoder,
//! run every configured pass over each chunk and shift the returned segments
//! onto the global timeline. Chunks are strictly sequential so the timeline
//! never needs reordering.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use crate::audio::{Decoder, PcmStream, Terminator, bytes_per_chunk, pcm_s16le_to_f32};
use crate::backend::{Engine, SpeechModel, as_inference_failure};
use crate::error::{FcError, FcResult};
use crate::gate::ReadinessGate;
use crate::model::{
    Chunk, DEFAULT_CHUNK_DURATION_SECS, InferenceRequest, ModelSegment, PassKind, PassSet,
    RunSummary, Segment,
};
use crate::sink::{FileSink, SubtitleSink};
use crate::status::{StatusReporter, StatusUpdate};
use crate::store::SegmentStore;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Nominal stride; offsets are `index × chunk_duration_secs`.
    pub chunk_duration_secs: f64,
    pub passes: PassSet,
    /// Source language hint; `None` lets the model detect it.
    pub language: Option<String>,
    /// Write `<stem>_original.srt` / `<stem>_translated.srt` here when set.
    pub subtitle_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: DEFAULT_CHUNK_DURATION_SECS,
            passes: PassSet::TranslateOnly,
            language: None,
            subtitle_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    terminator: Mutex<Option<Terminator>>,
}

/// Shared cancel flag plus the kill switch of the decoder currently running
/// under it. Cancelling kills the decoder immediately; the engine notices the
/// flag at its next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        let terminator = self.terminator_slot().take();
        if let Some(terminator) = terminator {
            tracing::debug!("cancellation killing active decoder");
            terminator.terminate();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> FcResult<()> {
        if self.is_cancelled() {
            return Err(FcError::Cancelled("run cancelled".to_owned()));
        }
        Ok(())
    }

    /// Register the decoder kill switch. Fires at once if already cancelled.
    pub(crate) fn attach(&self, terminator: Terminator) {
        if self.is_cancelled() {
            terminator.terminate();
            return;
        }
        *self.terminator_slot() = Some(terminator);
        // cancel() may have raced between the check and the store.
        if self.is_cancelled()
            && let Some(terminator) = self.terminator_slot().take()
        {
            terminator.terminate();
        }
    }

    pub(crate) fn detach(&self) {
        self.terminator_slot().take();
    }

    fn terminator_slot(&self) -> std::sync::MutexGuard<'_, Option<Terminator>> {
        self.state
            .terminator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Mutable state owned by the engine for one run.
#[derive(Debug)]
struct RunState {
    run_id: String,
    video_path: PathBuf,
    total_duration_secs: f64,
    first_commit_done: bool,
    chunks_processed: u64,
    translated_segments: usize,
    original_segments: usize,
    subtitle_paths: Vec<PathBuf>,
    /// Last committed start per pass.
    translated_floor: f64,
    original_floor: f64,
}

impl RunState {
    fn new(video_path: &Path) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            video_path: video_path.to_path_buf(),
            total_duration_secs: 0.0,
            first_commit_done: false,
            chunks_processed: 0,
            translated_segments: 0,
            original_segments: 0,
            subtitle_paths: Vec::new(),
            translated_floor: 0.0,
            original_floor: 0.0,
        }
    }

    fn floor_mut(&mut self, pass: PassKind) -> &mut f64 {
        match pass {
            PassKind::Translated => &mut self.translated_floor,
            PassKind::Original => &mut self.original_floor,
        }
    }
}

/// Releases the single-run lock on drop.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> FcResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| FcError::InvalidRequest("a run is already in progress".to_owned()))?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Clamp, validate and shift model output onto the global timeline.
///
/// Negative starts clamp to zero; segments that are empty, inverted or
/// non-finite are dropped.
#[must_use]
pub fn place_on_timeline(raw: Vec<ModelSegment>, offset_secs: f64, pass: PassKind) -> Vec<Segment> {
    raw.into_iter()
        .filter_map(|seg| {
            if !seg.start_sec.is_finite() || !seg.end_sec.is_finite() {
                return None;
            }
            let start = seg.start_sec.max(0.0);
            if seg.end_sec <= start {
                tracing::debug!(
                    start = seg.start_sec,
                    end = seg.end_sec,
                    "dropping empty model segment"
                );
                return None;
            }
            Some(Segment::new(start, seg.end_sec, seg.text, pass).shifted(offset_secs))
        })
        .collect()
}

/// Order a placed batch by start and raise any start below `floor`, the last
/// committed start of the same pass.
///
/// Whisper pads its input, so a chunk can report a segment past the nominal
/// chunk end while the next chunk starts at its own offset. Segments the
/// clamp leaves empty are dropped. `floor` advances to the last kept start.
#[must_use]
pub fn keep_start_order(mut placed: Vec<Segment>, floor: &mut f64) -> Vec<Segment> {
    placed.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));
    placed
        .into_iter()
        .filter_map(|mut seg| {
            if seg.start_sec < *floor {
                tracing::debug!(
                    start = seg.start_sec,
                    floor = *floor,
                    "segment starts before committed timeline; clamping"
                );
                seg.start_sec = *floor;
            }
            if seg.end_sec <= seg.start_sec {
                return None;
            }
            *floor = seg.start_sec;
            Some(seg)
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

// ---------------------------------------------------------------------------
// ChunkTranscriber
// ---------------------------------------------------------------------------

pub struct ChunkTranscriber {
    decoder: Box<dyn Decoder>,
    engine: Box<dyn Engine>,
    store: Arc<SegmentStore>,
    gate: Arc<ReadinessGate>,
    status: StatusReporter,
    config: PipelineConfig,
    running: AtomicBool,
}

impl ChunkTranscriber {
    #[must_use]
    pub fn new(decoder: Box<dyn Decoder>, engine: Box<dyn Engine>, config: PipelineConfig) -> Self {
        Self {
            decoder,
            engine,
            store: Arc::new(SegmentStore::new()),
            gate: Arc::new(ReadinessGate::new()),
            status: StatusReporter::disabled(),
            config,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<SegmentStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: Arc<ReadinessGate>) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusReporter) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn store(&self) -> Arc<SegmentStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn gate(&self) -> Arc<ReadinessGate> {
        Arc::clone(&self.gate)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Process `video_path` to completion.
    ///
    /// The caller clears the store and arms the gate beforehand. On every
    /// exit path the gate ends up fired and exactly one terminal status is
    /// reported. A panic inside the loop is caught and reported as
    /// [`FcError::WorkerPanicked`].
    pub fn run(&self, video_path: &Path, token: &CancellationToken) -> FcResult<RunSummary> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started_at = Utc::now();
        let mut run = RunState::new(video_path);
        let span = tracing::info_span!("run", run_id = %run.run_id, video = %video_path.display());
        let _entered = span.enter();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&mut run, token)))
            .unwrap_or_else(|payload| {
                token.detach();
                Err(FcError::WorkerPanicked(panic_message(payload.as_ref())))
            });

        if self.gate.fire() {
            tracing::debug!("readiness gate fired at run end");
        }

        let dual = self.config.passes.is_dual();
        match &result {
            Ok(()) => self.status.report(StatusUpdate::Complete { dual }),
            Err(FcError::NoAudioTrack(_)) => self.status.report(StatusUpdate::NoAudioStream),
            Err(FcError::ProbeFailed { .. }) => self.status.report(StatusUpdate::ProbeFailed),
            Err(FcError::Cancelled(_)) => self.status.report(StatusUpdate::Cancelled),
            Err(err) => {
                tracing::error!(error = %err, code = err.error_code(), "run failed");
                self.status.report(StatusUpdate::Failed {
                    message: err.to_string(),
                });
            }
        }

        result.map(|()| RunSummary {
            run_id: run.run_id,
            video_path: run.video_path,
            passes: self.config.passes,
            total_duration_secs: run.total_duration_secs,
            chunks_processed: run.chunks_processed,
            translated_segments: run.translated_segments,
            original_segments: run.original_segments,
            subtitle_paths: run.subtitle_paths,
            started_at_rfc3339: started_at.to_rfc3339(),
            finished_at_rfc3339: Utc::now().to_rfc3339(),
        })
    }

    fn execute(&self, run: &mut RunState, token: &CancellationToken) -> FcResult<()> {
        let chunk_duration = self.config.chunk_duration_secs;
        if !chunk_duration.is_finite() || chunk_duration <= 0.0 {
            return Err(FcError::InvalidRequest(format!(
                "chunk duration must be positive, got {chunk_duration}"
            )));
        }

        let video_path = run.video_path.clone();
        let probe = self.decoder.probe(&video_path)?;
        run.total_duration_secs = probe.duration_secs;
        tracing::info!(
            stage = "probe",
            duration_secs = probe.duration_secs,
            sample_rate = probe.sample_rate,
            "source probed"
        );

        self.status.report(StatusUpdate::LoadingModel {
            model: self.engine.model_label(),
        });
        let mut model = self.engine.load()?;
        token.checkpoint()?;

        let mut sink = match &self.config.subtitle_dir {
            Some(dir) => {
                let sink = SubtitleSink::create(dir, &video_path)?;
                run.subtitle_paths = sink.paths().to_vec();
                Some(sink)
            }
            None => None,
        };

        let streamed =
            self.stream_chunks(run, model.as_mut(), sink.as_mut(), probe.sample_rate, token);
        let closed = sink.as_mut().map_or(Ok(()), SubtitleSink::close);
        streamed?;
        closed
    }

    fn stream_chunks(
        &self,
        run: &mut RunState,
        model: &mut dyn SpeechModel,
        mut sink: Option<&mut FileSink>,
        sample_rate: u32,
        token: &CancellationToken,
    ) -> FcResult<()> {
        let total = run.total_duration_secs;
        if total.is_nan() || total <= 0.0 {
            tracing::info!(
                duration_secs = total,
                "source has no playable duration; nothing to decode"
            );
            self.gate.fire();
            return Ok(());
        }

        let mut stream = self.decoder.open(&run.video_path, sample_rate)?;
        token.attach(stream.terminator());

        let looped = self.chunk_loop(
            run,
            stream.as_mut(),
            model,
            sink.as_deref_mut(),
            sample_rate,
            token,
        );

        // The kill switch stays attached until the decoder has exited.
        let finished = match looped {
            Ok(()) => {
                let waited = stream.wait();
                token.checkpoint().and(waited)
            }
            Err(err) => {
                stream.terminate();
                Err(err)
            }
        };
        token.detach();
        finished?;

        if !run.first_commit_done && self.gate.fire() {
            tracing::debug!("readiness gate fired after short source");
        }
        Ok(())
    }

    fn chunk_loop(
        &self,
        run: &mut RunState,
        stream: &mut dyn PcmStream,
        model: &mut dyn SpeechModel,
        mut sink: Option<&mut FileSink>,
        sample_rate: u32,
        token: &CancellationToken,
    ) -> FcResult<()> {
        let chunk_duration = self.config.chunk_duration_secs;
        let chunk_bytes = bytes_per_chunk(chunk_duration, sample_rate);
        if chunk_bytes == 0 {
            return Err(FcError::InvalidRequest(format!(
                "chunk of {chunk_duration}s at {sample_rate} Hz holds no samples"
            )));
        }
        let dual = self.config.passes.is_dual();
        let mut index: u64 = 0;

        loop {
            let offset_secs = index as f64 * chunk_duration;
            if offset_secs >= run.total_duration_secs {
                break;
            }
            self.status.report(StatusUpdate::Progress {
                offset_secs,
                total_secs: run.total_duration_secs,
                dual,
            });

            token.checkpoint()?;
            let raw_bytes = stream.read_chunk(chunk_bytes)?;
            token.checkpoint()?;
            if raw_bytes.is_empty() {
                tracing::info!(stage = "decode", index, "decoder exhausted before nominal end");
                break;
            }
            let short_read = raw_bytes.len() < chunk_bytes;

            let chunk = Chunk::new(index, chunk_duration, raw_bytes, sample_rate);
            self.process_chunk(run, &chunk, model, sink.as_deref_mut(), token)?;
            index += 1;

            if short_read {
                tracing::debug!(
                    stage = "decode",
                    index = chunk.index,
                    audio_secs = chunk.audio_duration_sec(),
                    "short read, treating as final chunk"
                );
                break;
            }
        }
        Ok(())
    }

    fn process_chunk(
        &self,
        run: &mut RunState,
        chunk: &Chunk,
        model: &mut dyn SpeechModel,
        mut sink: Option<&mut FileSink>,
        token: &CancellationToken,
    ) -> FcResult<()> {
        let samples = pcm_s16le_to_f32(&chunk.raw_bytes);

        for &pass in self.config.passes.passes() {
            let request =
                InferenceRequest::full_precision(pass.task(), self.config.language.clone())
                    .with_sample_rate(chunk.sample_rate);
            let raw = model.infer(&samples, &request).map_err(as_inference_failure)?;
            token.checkpoint()?;
            let placed = keep_start_order(
                place_on_timeline(raw, chunk.offset_sec, pass),
                run.floor_mut(pass),
            );
            tracing::debug!(
                stage = "infer",
                index = chunk.index,
                pass = pass.as_str(),
                segments = placed.len(),
                "chunk inferred"
            );

            if let Some(sink) = sink.as_deref_mut() {
                for segment in &placed {
                    sink.write_segment(segment)?;
                }
            }
            match pass {
                PassKind::Translated => {
                    run.translated_segments += placed.len();
                    self.store.extend(placed);
                }
                PassKind::Original => run.original_segments += placed.len(),
            }
        }

        if let Some(sink) = sink.as_deref_mut() {
            sink.flush()?;
        }
        run.chunks_processed += 1;

        if !run.first_commit_done {
            run.first_commit_done = true;
            if self.gate.fire() {
                tracing::info!(stage = "commit", index = chunk.index, "first chunk committed");
                self.status.report(StatusUpdate::Playing);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_on_timeline_shifts_by_offset() {
        let placed = place_on_timeline(
            vec![ModelSegment::new(0.0, 4.0, "a"), ModelSegment::new(4.0, 8.0, "b")],
            10.0,
            PassKind::Translated,
        );
        assert_eq!(placed.len(), 2);
        assert_eq!((placed[0].start_sec, placed[0].end_sec), (10.0, 14.0));
        assert_eq!((placed[1].start_sec, placed[1].end_sec), (14.0, 18.0));
        assert!(placed.iter().all(|s| s.pass == PassKind::Translated));
    }

    #[test]
    fn place_on_timeline_drops_degenerate_segments() {
        let placed = place_on_timeline(
            vec![
                ModelSegment::new(3.0, 3.0, "empty"),
                ModelSegment::new(5.0, 2.0, "inverted"),
                ModelSegment::new(f64::NAN, 2.0, "nan"),
                ModelSegment::new(-0.5, 1.0, "clamped"),
            ],
            20.0,
            PassKind::Original,
        );
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].text, "clamped");
        assert_eq!((placed[0].start_sec, placed[0].end_sec), (20.0, 21.0));
    }

    #[test]
    fn start_order_clamps_to_previous_chunk_overrun() {
        let mut floor = 0.0;
        let first = keep_start_order(
            place_on_timeline(
                vec![ModelSegment::new(0.0, 5.0, "a"), ModelSegment::new(10.5, 11.0, "b")],
                0.0,
                PassKind::Translated,
            ),
            &mut floor,
        );
        assert_eq!(first.len(), 2);
        assert_eq!(floor, 10.5);

        let second = keep_start_order(
            place_on_timeline(
                vec![ModelSegment::new(0.0, 3.0, "c"), ModelSegment::new(0.2, 0.4, "d")],
                10.0,
                PassKind::Translated,
            ),
            &mut floor,
        );
        // "d" ends at 10.4, before the floor, and is dropped.
        assert_eq!(second.len(), 1);
        assert_eq!((second[0].start_sec, second[0].end_sec), (10.5, 13.0));
    }

    #[test]
    fn start_order_sorts_within_a_batch() {
        let mut floor = 0.0;
        let placed = keep_start_order(
            place_on_timeline(
                vec![ModelSegment::new(5.0, 6.0, "late"), ModelSegment::new(1.0, 2.0, "early")],
                0.0,
                PassKind::Translated,
            ),
            &mut floor,
        );
        let texts: Vec<&str> = placed.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["early", "late"]);
        assert_eq!(floor, 5.0);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }

    #[test]
    fn token_cancel_fires_attached_terminator_once() {
        use std::sync::atomic::AtomicUsize;

        let kills = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = Arc::clone(&kills);
        token.attach(Terminator::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        token.cancel();
        token.cancel();
        assert_eq!(kills.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
        assert!(matches!(token.checkpoint(), Err(FcError::Cancelled(_))));
    }

    #[test]
    fn attach_after_cancel_terminates_immediately() {
        use std::sync::atomic::AtomicUsize;

        let kills = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        token.cancel();
        let counter = Arc::clone(&kills);
        token.attach(Terminator::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(kills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_terminator_is_not_fired() {
        use std::sync::atomic::AtomicUsize;

        let kills = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = Arc::clone(&kills);
        token.attach(Terminator::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        token.detach();
        token.cancel();
        assert_eq!(kills.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_guard_rejects_reentry() {
        let flag = AtomicBool::new(false);
        let guard = RunGuard::acquire(&flag).expect("first acquire");
        assert!(matches!(
            RunGuard::acquire(&flag),
            Err(FcError::InvalidRequest(_))
        ));
        drop(guard);
        assert!(RunGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn default_config_is_ten_second_translate_only() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_duration_secs, 10.0);
        assert_eq!(config.passes, PassSet::TranslateOnly);
        assert!(config.subtitle_dir.is_none());
    }
}
