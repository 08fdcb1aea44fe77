//! Shared timestamp/identifier helpers for persisted records and envelopes.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use ulid::Ulid;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Short calendar date used in rendered document content (e.g. `2026-03-01`).
pub fn today() -> String {
    now().format("%Y-%m-%d").to_string()
}

pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Standard command response envelope shape used by `--format json` outputs.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now().to_rfc3339(),
        "event_id": new_id(),
        "cmd": cmd,
        "status": status
    });
    if let Some(base_obj) = base.as_object_mut() {
        match extra {
            JsonValue::Object(fields) => base_obj.extend(fields),
            JsonValue::Null => {}
            // Lists and scalars nest under `data`.
            other => {
                base_obj.insert("data".to_string(), other);
            }
        }
    }
    base
}
