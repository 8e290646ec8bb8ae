//! Playback-side pollers.
//!
//! The video player itself is an external collaborator behind
//! [`MediaPlayer`]. Two non-blocking pollers bridge it to the engine:
//! [`ReadinessWatcher`] starts playback once the readiness gate fires and
//! [`CaptionTracker`] maps the playback clock to the active caption.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::FcResult;
use crate::gate::ReadinessGate;
use crate::periodic::{PeriodicTask, Tick};
use crate::store::SegmentStore;

pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const CAPTION_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub trait MediaPlayer: Send {
    fn set_media(&mut self, path: &Path);
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    /// Playback position in milliseconds; negative when unknown.
    fn get_time_ms(&self) -> i64;
    fn is_media_set(&self) -> bool;
}

pub type SharedPlayer = Arc<Mutex<dyn MediaPlayer>>;

/// Calls `play()` exactly once, on the first poll that sees the gate fired.
#[derive(Debug)]
pub struct ReadinessWatcher {
    gate: Arc<ReadinessGate>,
    started: bool,
}

impl ReadinessWatcher {
    #[must_use]
    pub fn new(gate: Arc<ReadinessGate>) -> Self {
        Self {
            gate,
            started: false,
        }
    }

    #[must_use]
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Returns `true` on the poll that started playback.
    pub fn poll(&mut self, player: &mut dyn MediaPlayer) -> bool {
        if self.started || !self.gate.is_fired() {
            return false;
        }
        self.started = true;
        player.play();
        tracing::info!("first results ready, playback started");
        true
    }
}

/// Tracks the caption under the playback head and reports changes only.
#[derive(Debug)]
pub struct CaptionTracker {
    store: Arc<SegmentStore>,
    current: Option<String>,
}

impl CaptionTracker {
    #[must_use]
    pub fn new(store: Arc<SegmentStore>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Caption last reported by [`poll`](Self::poll).
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Look up the caption at the player's position. Returns the new text
    /// when it differs from the previous poll, an empty string when the head
    /// leaves every segment. Skipped while paused or with no media.
    pub fn poll(&mut self, player: &dyn MediaPlayer) -> Option<String> {
        if !player.is_media_set() || !player.is_playing() {
            return None;
        }
        let time_ms = player.get_time_ms();
        if time_ms < 0 {
            return None;
        }
        let time_sec = time_ms as f64 / 1_000.0;
        let text = self
            .store
            .find_active(time_sec)
            .map(|segment| segment.text.trim().to_owned())
            .unwrap_or_default();

        if self.current.as_deref() == Some(text.as_str()) {
            return None;
        }
        self.current = Some(text.clone());
        Some(text)
    }
}

/// Poll the gate every 100 ms until playback starts, then stop.
pub fn spawn_readiness_poller(
    gate: Arc<ReadinessGate>,
    player: SharedPlayer,
) -> FcResult<PeriodicTask> {
    let mut watcher = ReadinessWatcher::new(gate);
    PeriodicTask::spawn("readiness-poller", READINESS_POLL_INTERVAL, move || {
        let mut player = player.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.poll(&mut *player) {
            Tick::Stop
        } else {
            Tick::Continue
        }
    })
}

/// Poll the playback clock every 250 ms and hand caption changes to
/// `on_change`. Runs until stopped or dropped.
pub fn spawn_caption_poller<F>(
    store: Arc<SegmentStore>,
    player: SharedPlayer,
    mut on_change: F,
) -> FcResult<PeriodicTask>
where
    F: FnMut(String) + Send + 'static,
{
    let mut tracker = CaptionTracker::new(store);
    PeriodicTask::spawn("caption-poller", CAPTION_POLL_INTERVAL, move || {
        let changed = {
            let player = player.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.poll(&*player)
        };
        if let Some(text) = changed {
            on_change(text);
        }
        Tick::Continue
    })
}
