// Invocation events and responses
//
// The hosting platform hands us an arbitrary JSON event and expects a
// `{statusCode, headers, body}` object back. The body is always JSON text.
// Failures are reported with status 200 and an embedded error so the platform
// does not treat them as retryable crashes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::SupervisorError;

/// Prompt used when the event carries none
pub const DEFAULT_PROMPT: &str = "Hello World";

/// Inbound invocation event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationEvent {
    /// Request body, either a JSON string or an already-parsed object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Top-level prompt for direct (non-HTTP) invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// The event exactly as received, for passthrough forwarding
    #[serde(skip)]
    raw: Option<Value>,
}

/// Body of an inbound event, classified once
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    /// No body at all
    Empty,
    /// Body is (or decodes to) a JSON object
    Structured(Map<String, Value>),
    /// Body decodes to JSON, but not to an object
    Scalar(Value),
    /// Body is a string that is not valid JSON
    Malformed(String),
}

impl InvocationEvent {
    /// Build an event from any JSON value; never fails
    ///
    /// Non-object values become the event body.
    pub fn from_value(value: Value) -> Self {
        let raw = Some(value.clone());
        let event = match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            Value::Null => Self::default(),
            other => Self {
                body: Some(other),
                ..Self::default()
            },
        };
        Self { raw, ..event }
    }

    /// The event as it should be forwarded verbatim
    ///
    /// Events built with `from_value` come back exactly as received, explicit
    /// nulls included.
    pub fn to_value(&self) -> Value {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }

    pub fn payload(&self) -> InboundPayload {
        match &self.body {
            None | Some(Value::Null) => InboundPayload::Empty,
            Some(Value::Object(map)) => InboundPayload::Structured(map.clone()),
            Some(Value::String(raw)) => {
                if raw.trim().is_empty() {
                    return InboundPayload::Empty;
                }
                match serde_json::from_str::<Value>(raw) {
                    Ok(Value::Object(map)) => InboundPayload::Structured(map),
                    Ok(Value::Null) => InboundPayload::Empty,
                    Ok(other) => InboundPayload::Scalar(other),
                    Err(_) => InboundPayload::Malformed(raw.clone()),
                }
            }
            Some(other) => InboundPayload::Scalar(other.clone()),
        }
    }
}

/// Where an extracted prompt came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    BodyPrompt,
    BodyMessage,
    EventPrompt,
    Default,
}

/// Result of prompt extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPrompt {
    pub value: String,
    pub source: PromptSource,
}

/// Ordered prompt extraction policy
///
/// Precedence: body `prompt`, body `message`, event `prompt`, default.
/// Empty strings and non-string values are skipped.
#[derive(Debug, Clone)]
pub struct PromptPolicy {
    default_prompt: String,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT)
    }
}

impl PromptPolicy {
    pub fn new(default_prompt: impl Into<String>) -> Self {
        Self {
            default_prompt: default_prompt.into(),
        }
    }

    pub fn extract(&self, event: &InvocationEvent) -> ExtractedPrompt {
        if let InboundPayload::Structured(body) = event.payload() {
            if let Some(value) = non_empty_str(body.get("prompt")) {
                return ExtractedPrompt {
                    value,
                    source: PromptSource::BodyPrompt,
                };
            }
            if let Some(value) = non_empty_str(body.get("message")) {
                return ExtractedPrompt {
                    value,
                    source: PromptSource::BodyMessage,
                };
            }
        }

        if let Some(value) = non_empty_str(event.prompt.as_ref()) {
            return ExtractedPrompt {
                value,
                source: PromptSource::EventPrompt,
            };
        }

        ExtractedPrompt {
            value: self.default_prompt.clone(),
            source: PromptSource::Default,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Response returned across the invocation boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    /// Always valid JSON text
    pub body: String,
}

impl InvocationResponse {
    /// Build a response from a JSON body
    pub fn json(status_code: u16, body: &Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code,
            headers,
            body: body.to_string(),
        }
    }

    /// Successful delivery to the engine
    pub fn delivered(route: &str, input: &str, data: Value) -> Self {
        Self::json(
            200,
            &json!({
                "success": true,
                "message": "Workflow triggered successfully",
                "route": route,
                "input": input,
                "data": data,
            }),
        )
    }

    /// Structured failure; still status 200
    pub fn failure(message: &str, error: &SupervisorError) -> Self {
        Self::json(
            200,
            &json!({
                "success": false,
                "message": message,
                "error": error.to_string(),
                "error_type": error.kind(),
            }),
        )
    }

    /// Parse the body back into JSON
    pub fn body_json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}
