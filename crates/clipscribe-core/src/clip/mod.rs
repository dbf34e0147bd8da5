pub mod archive;
pub mod hub;
pub mod local;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// Per-clip metadata as published alongside each video.
///
/// Identifiers are opaque and passed through verbatim, whatever their JSON
/// type. Fields this crate does not know about are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipMetadata {
    #[serde(default)]
    pub worker_id: Value,
    #[serde(default)]
    pub factory_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClipMetadata {
    pub fn worker_label(&self) -> String {
        id_label(&self.worker_id)
    }

    pub fn factory_label(&self) -> String {
        id_label(&self.factory_id)
    }
}

/// Render an opaque identifier for humans: strings without quotes, missing as `unknown`.
pub fn id_label(value: &Value) -> String {
    match value {
        Value::Null => "unknown".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One encoded video segment with its metadata.
#[derive(Debug, Clone)]
pub struct Clip {
    /// Short name of the clip, e.g. the archive member or file stem.
    pub label: String,
    pub video: Vec<u8>,
    pub metadata: ClipMetadata,
}

/// Anything that can hand out a batch of clips.
pub trait ClipSource {
    fn sample(&mut self, count: usize) -> Result<Vec<Clip>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_passes_identifiers_through() {
        let raw = r#"{"worker_id": 7, "factory_id": "factory_002", "duration_sec": 420.5, "fps": 30}"#;
        let meta: ClipMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.worker_id, Value::from(7));
        assert_eq!(meta.factory_label(), "factory_002");
        assert_eq!(meta.worker_label(), "7");
        assert_eq!(meta.duration_sec, Some(420.5));
        assert_eq!(meta.extra.get("fps"), Some(&Value::from(30)));

        let back: Value = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["fps"], Value::from(30));
        assert_eq!(back["factory_id"], Value::from("factory_002"));
    }

    #[test]
    fn missing_identifiers_are_unknown() {
        let meta: ClipMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(meta.worker_label(), "unknown");
        assert_eq!(meta.duration_sec, None);
    }
}
