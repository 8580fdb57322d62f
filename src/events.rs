//! NDJSON event stream consumed by a supervising process (GUI or CI).
//!
//! Every call emits one newline-delimited JSON record on stdout:
//! `{"type": "...", "timestamp": "...", "message": "...", "data": {...}}`.
//! Human-readable progress flows through here; the machine-readable
//! `__OUTPUTS__` result line and `tracing` diagnostics are separate channels.
//!
//! The stream is constructed once in `main` and passed down explicitly;
//! there is deliberately no process-global default sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const TYPE_LOG: &str = "log";
pub const TYPE_SUCCESS: &str = "success";
pub const TYPE_ERROR: &str = "error";
pub const TYPE_WARNING: &str = "warning";
pub const TYPE_PROGRESS: &str = "progress";

#[derive(Debug, Serialize)]
struct Event<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    timestamp: DateTime<Utc>,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Ordered, append-only progress sink.
///
/// Cheap to clone; a disabled stream swallows every event, which keeps
/// call sites unconditional.
#[derive(Debug, Clone)]
pub struct EventStream {
    enabled: bool,
}

impl EventStream {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn emit(&self, kind: &str, message: &str, data: Option<Value>) {
        if !self.enabled {
            return;
        }
        let event = Event {
            kind,
            timestamp: Utc::now(),
            message,
            data,
        };
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(TYPE_LOG, message.as_ref(), None);
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.emit(TYPE_SUCCESS, message.as_ref(), None);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(TYPE_ERROR, message.as_ref(), None);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.emit(TYPE_WARNING, message.as_ref(), None);
    }

    pub fn progress(&self, message: impl AsRef<str>, percent: u8) {
        self.emit(
            TYPE_PROGRESS,
            message.as_ref(),
            Some(serde_json::json!({ "percent": percent })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_renamed_type_field() {
        let event = Event {
            kind: TYPE_SUCCESS,
            timestamp: Utc::now(),
            message: "done",
            data: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"success""#));
        assert!(json.contains(r#""message":"done""#));
        assert!(!json.contains("data"));
    }

    #[test]
    fn event_data_is_included_when_present() {
        let event = Event {
            kind: TYPE_PROGRESS,
            timestamp: Utc::now(),
            message: "building",
            data: Some(serde_json::json!({ "percent": 40 })),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""percent":40"#));
    }

    #[test]
    fn disabled_stream_is_silent() {
        // Nothing observable to assert beyond "does not panic"; the enabled
        // flag short-circuits before serialization.
        let stream = EventStream::new(false);
        stream.info("hidden");
        stream.error("hidden");
    }
}
