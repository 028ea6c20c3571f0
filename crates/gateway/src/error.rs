use std::time::Duration;

use {
    axum::{
        http::{StatusCode, header},
        response::{IntoResponse, Json, Response},
    },
    serde_json::{Value, json},
};

pub const EXAMPLE_NUMBER: &str = "9876543210";
pub const EXAMPLE_MESSAGE: &str = "Hello from wagate";

/// Everything an HTTP caller can get back instead of a success body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("WhatsApp client not ready")]
    ChannelNotReady { initializing: bool },

    #[error("{number} is not registered on WhatsApp")]
    DestinationNotRegistered { number: String },

    /// `detail` is only shown to the caller when `expose_detail` is set.
    #[error("failed to send message: {detail}")]
    SendFailed { detail: String, expose_detail: bool },

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ChannelNotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::DestinationNotRegistered { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SendFailed { .. } | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        match self {
            Self::InvalidInput(message) => json!({
                "success": false,
                "error": "Invalid input",
                "message": message,
                "example": {
                    "number": EXAMPLE_NUMBER,
                    "message": EXAMPLE_MESSAGE,
                },
            }),
            Self::RateLimited { retry_after } => json!({
                "success": false,
                "error": "Too many requests",
                "message": "Too many requests from this IP, please try again later.",
                "retryAfter": retry_after_secs(*retry_after),
            }),
            Self::ChannelNotReady { initializing } => json!({
                "success": false,
                "error": "WhatsApp client not ready",
                "message": if *initializing {
                    "WhatsApp client is initializing. Please try again shortly."
                } else {
                    "WhatsApp client is not connected. Please try again later."
                },
                "whatsappConnected": false,
                "clientInitializing": initializing,
            }),
            Self::DestinationNotRegistered { number } => json!({
                "success": false,
                "error": "Number not registered",
                "message": format!("The number {number} is not registered on WhatsApp"),
            }),
            Self::SendFailed {
                detail,
                expose_detail,
            } => json!({
                "success": false,
                "error": "Failed to send message",
                "message": if *expose_detail {
                    detail.as_str()
                } else {
                    "An error occurred while sending the message"
                },
            }),
            Self::PayloadTooLarge => json!({
                "success": false,
                "error": "Payload too large",
                "message": "Request body exceeds the configured size limit",
            }),
            Self::Internal => json!({
                "success": false,
                "error": "Internal server error",
                "message": "Something went wrong",
            }),
        }
    }
}

fn retry_after_secs(retry_after: Duration) -> u64 {
    // Rounded up.
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let Self::RateLimited { retry_after } = self
            && let Ok(value) = retry_after_secs(retry_after).to_string().parse()
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
