pub mod invoke;
pub mod serve;

use serde_json::{json, Value};

/// Turn raw request text into an invocation event
///
/// Empty input is an empty event; JSON is used as is; anything else becomes
/// the event body.
pub fn event_from_text(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "body": raw }))
}
