mod whisper_cpp;

pub use whisper_cpp::{WhisperCppEngine, WhisperCppModel};

use serde_json::Value;

use crate::error::{FcError, FcResult};
use crate::model::{InferenceRequest, ModelSegment};

// ---------------------------------------------------------------------------
// Engine trait: formal contract for inference backends
// ---------------------------------------------------------------------------

/// An inference backend. Loading is expensive and happens once per run; the
/// loaded [`SpeechModel`] is then invoked once per chunk and pass.
pub trait Engine: Send + Sync {
    /// Human-readable engine name.
    fn name(&self) -> &'static str;

    /// Label shown while the model loads, e.g. `base`.
    fn model_label(&self) -> String;

    /// Whether the backing binary or library is usable right now.
    fn is_available(&self) -> bool;

    /// Load the model for one run.
    fn load(&self) -> FcResult<Box<dyn SpeechModel>>;
}

/// A loaded model. Owned by the engine thread, never shared.
pub trait SpeechModel: Send {
    /// Recognize `samples` (mono, normalized to `[-1.0, 1.0]`). Returned
    /// segments are ordered and relative to the first sample.
    fn infer(&mut self, samples: &[f32], request: &InferenceRequest)
    -> FcResult<Vec<ModelSegment>>;
}

/// Fold backend-specific failures into `InferenceFailed`, leaving
/// cancellation untouched.
#[must_use]
pub fn as_inference_failure(err: FcError) -> FcError {
    match err {
        FcError::InferenceFailed(_) | FcError::Cancelled(_) => err,
        other => FcError::InferenceFailed(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// whisper.cpp JSON extraction
// ---------------------------------------------------------------------------

/// Pull timed segments out of a whisper.cpp `-oj` document.
///
/// Accepts both the `transcription[]` layout (millisecond `offsets`) and a
/// plain `segments[]` layout with `start`/`end` in seconds. Nodes without
/// both bounds are skipped since they cannot be placed on a timeline.
#[must_use]
pub fn extract_segments_from_json(root: &Value) -> Vec<ModelSegment> {
    let nodes = root
        .get("transcription")
        .and_then(Value::as_array)
        .or_else(|| root.get("segments").and_then(Value::as_array));
    let Some(nodes) = nodes else {
        return Vec::new();
    };

    nodes
        .iter()
        .filter_map(|node| {
            let start = segment_start(node)?;
            let end = segment_end(node)?;
            let text = node
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_owned();
            Some(ModelSegment::new(start, end, text))
        })
        .collect()
}

fn segment_start(node: &Value) -> Option<f64> {
    if let Some(value) = node.pointer("/offsets/from") {
        return number_millis_to_secs(value);
    }
    node.get("start").and_then(number_to_secs)
}

fn segment_end(node: &Value) -> Option<f64> {
    if let Some(value) = node.pointer("/offsets/to") {
        return number_millis_to_secs(value);
    }
    node.get("end").and_then(number_to_secs)
}

fn number_to_secs(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

fn number_millis_to_secs(value: &Value) -> Option<f64> {
    number_to_secs(value).map(|millis| millis / 1_000.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn transcription_layout_uses_millisecond_offsets() {
        let raw = json!({
            "transcription": [
                {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,500"},
                 "offsets": {"from": 0, "to": 2500}, "text": " Hello there."},
                {"offsets": {"from": 2500, "to": 4000}, "text": " General Kenobi."}
            ]
        });
        let segments = extract_segments_from_json(&raw);
        assert_eq!(
            segments,
            vec![
                ModelSegment::new(0.0, 2.5, "Hello there."),
                ModelSegment::new(2.5, 4.0, "General Kenobi."),
            ]
        );
    }

    #[test]
    fn segments_layout_uses_seconds() {
        let raw = json!({"segments": [{"start": 1.25, "end": 3, "text": "x"}]});
        assert_eq!(
            extract_segments_from_json(&raw),
            vec![ModelSegment::new(1.25, 3.0, "x")]
        );
    }

    #[test]
    fn nodes_missing_a_bound_are_skipped() {
        let raw = json!({"segments": [{"start": 1.0, "text": "no end"}, {"end": 2.0}]});
        assert!(extract_segments_from_json(&raw).is_empty());
    }

    #[test]
    fn unknown_layout_yields_nothing() {
        assert!(extract_segments_from_json(&json!({"text": "flat"})).is_empty());
    }

    #[test]
    fn inference_failure_mapping_preserves_cancellation() {
        let cancelled = as_inference_failure(FcError::Cancelled("stop".to_owned()));
        assert!(matches!(cancelled, FcError::Cancelled(_)));

        let io = as_inference_failure(FcError::Io(std::io::Error::other("pipe")));
        assert!(matches!(io, FcError::InferenceFailed(ref msg) if msg.contains("pipe")));
    }
}
