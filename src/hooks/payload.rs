//! Hook wire format.

use serde::Serialize;
use serde_json::Value;

use crate::hooks::HookError;

/// Value of the `Type` member for calls made before forwarding.
pub const PRE_HOOK: &str = "pre-hook";

/// Body sent to a pre-hook plugin.
///
/// The request method is written to both `Method` and `Request`; deployed
/// plugins rely on this exact shape.
#[derive(Debug, Serialize)]
pub struct PreHookRequest<'a> {
    #[serde(rename = "Type")]
    pub kind: &'static str,
    #[serde(rename = "Method")]
    pub method: &'a str,
    #[serde(rename = "Request")]
    pub request: &'a str,
    #[serde(rename = "Body")]
    pub body: &'a Value,
}

impl<'a> PreHookRequest<'a> {
    pub fn new(method: &'a str, body: &'a Value) -> Self {
        Self {
            kind: PRE_HOOK,
            method,
            request: method,
            body,
        }
    }
}

/// Extract the rewritten body from a plugin response.
pub fn parse_hook_response(raw: &[u8]) -> Result<Value, HookError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| HookError::Protocol(format!("malformed JSON: {}", e)))?;
    match value {
        Value::Object(mut members) => members
            .remove("Body")
            .ok_or_else(|| HookError::Protocol("response has no \"Body\" member".into())),
        other => Err(HookError::Protocol(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
