//! Append-only segment timeline shared between the engine and caption lookup.
//!
//! Single writer (the engine thread), many readers. The engine commits
//! segments in non-decreasing start order and never mutates them, so lookups
//! are a linear scan under a read lock.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::Segment;

#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: RwLock<Vec<Segment>>,
}

impl SegmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, segment: Segment) {
        self.write().push(segment);
    }

    pub fn extend(&self, batch: impl IntoIterator<Item = Segment>) {
        for segment in batch {
            self.append(segment);
        }
    }

    /// Copy of the current timeline.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Segment> {
        self.read().clone()
    }

    /// First segment whose `[start, end]` contains `time_sec`.
    #[must_use]
    pub fn find_active(&self, time_sec: f64) -> Option<Segment> {
        self.read()
            .iter()
            .find(|segment| segment.contains(time_sec))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every segment. Only call while no run is in flight.
    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Segment>> {
        self.segments.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Segment>> {
        self.segments.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::SegmentStore;
    use crate::model::{PassKind, Segment};

    fn seg(start: f64, end: f64, text: &str) -> Segment {
        Segment::new(start, end, text, PassKind::Translated)
    }

    fn fixture_store() -> SegmentStore {
        let store = SegmentStore::new();
        store.extend([
            seg(0.0, 5.0, "Hello world first chunk."),
            seg(5.0, 10.0, "This is chunk one."),
            seg(10.0, 14.0, "Second chunk here."),
            seg(14.0, 18.0, "More text."),
            seg(20.0, 23.0, "Final segment."),
        ]);
        store
    }

    #[test]
    fn empty_store_finds_nothing() {
        let store = SegmentStore::new();
        assert!(store.is_empty());
        assert!(store.find_active(0.0).is_none());
    }

    #[test]
    fn find_active_inside_segment() {
        let store = fixture_store();
        let hit = store.find_active(7.5).expect("segment at 7.5s");
        assert_eq!(hit.text, "This is chunk one.");
    }

    #[test]
    fn find_active_in_gap_is_none() {
        let store = fixture_store();
        assert!(store.find_active(19.0).is_none());
        assert!(store.find_active(30.0).is_none());
    }

    #[test]
    fn shared_boundary_resolves_to_first_segment() {
        let store = fixture_store();
        let hit = store.find_active(5.0).expect("segment at 5.0s");
        assert_eq!(hit.text, "Hello world first chunk.");
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let store = fixture_store();
        let snap = store.snapshot();
        store.append(seg(30.0, 31.0, "late"));
        assert_eq!(snap.len(), 5);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = fixture_store();
        store.clear();
        assert!(store.is_empty());
        assert!(store.find_active(7.5).is_none());
    }

    #[test]
    fn readers_observe_monotonic_growth_while_writer_appends() {
        let store = Arc::new(SegmentStore::new());
        let writer_store = Arc::clone(&store);
        let writer = thread::spawn(move || {
            for i in 0..500 {
                let start = f64::from(i);
                writer_store.append(seg(start, start + 0.5, "x"));
            }
        });
        let reader_store = Arc::clone(&store);
        let reader = thread::spawn(move || {
            let mut last_len = 0;
            for _ in 0..500 {
                let snap = reader_store.snapshot();
                assert!(snap.len() >= last_len);
                assert!(snap.windows(2).all(|w| w[0].start_sec <= w[1].start_sec));
                last_len = snap.len();
            }
        });
        writer.join().expect("writer");
        reader.join().expect("reader");
        assert_eq!(store.len(), 500);
    }
}
