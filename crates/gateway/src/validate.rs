//! Validation of `POST /send-whatsapp` bodies.

use serde_json::Value;

use crate::error::ApiError;

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub number: String,
    pub message: String,
}

/// Check a decoded JSON body and extract the send request.
///
/// Only the first violation is reported: presence of both fields, then their
/// types, then emptiness, then message length.
pub fn validate_send_request(body: &Value) -> Result<SendRequest, ApiError> {
    let Some(obj) = body.as_object() else {
        return Err(invalid("Request body must be a JSON object"));
    };
    let field = |name: &str| obj.get(name).filter(|v| !v.is_null());

    let (Some(number), Some(message)) = (field("number"), field("message")) else {
        return Err(invalid(match field("number") {
            None => "Missing required field: number",
            Some(_) => "Missing required field: message",
        }));
    };

    let Some(number) = number.as_str() else {
        return Err(invalid("Field 'number' must be a string"));
    };
    let Some(message) = message.as_str() else {
        return Err(invalid("Field 'message' must be a string"));
    };

    if number.trim().is_empty() {
        return Err(invalid("Field 'number' cannot be empty"));
    }
    if message.trim().is_empty() {
        return Err(invalid("Field 'message' cannot be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(invalid(format!(
            "Field 'message' exceeds the maximum length of {MAX_MESSAGE_CHARS} characters"
        )));
    }

    Ok(SendRequest {
        number: number.to_string(),
        message: message.to_string(),
    })
}

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError::InvalidInput(message.into())
}
