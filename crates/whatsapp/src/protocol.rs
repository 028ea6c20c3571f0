//! JSON frames exchanged with the Node sidecar over its local WebSocket.

use serde::{Deserialize, Serialize};

use crate::types::LifecycleEvent;

/// Frames sent to the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    #[serde(rename_all = "camelCase")]
    Initialize {
        client_id: String,
        data_path: String,
    },
    #[serde(rename_all = "camelCase")]
    IsRegistered { request_id: String, chat_id: String },
    #[serde(rename_all = "camelCase")]
    Send {
        request_id: String,
        chat_id: String,
        body: String,
    },
    Destroy,
}

/// Frames received from the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarFrame {
    Qr {
        qr: String,
    },
    Authenticated,
    #[serde(rename_all = "camelCase")]
    Ready {
        #[serde(default)]
        phone_number: Option<String>,
    },
    AuthFailure {
        message: String,
    },
    Disconnected {
        reason: String,
    },
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    IsRegisteredResult {
        request_id: String,
        registered: bool,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl SidecarFrame {
    /// The request this frame answers, if it is a response.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::IsRegisteredResult { request_id, .. } | Self::SendResult { request_id, .. } => {
                Some(request_id)
            },
            _ => None,
        }
    }

    /// Map a lifecycle frame to the event the session understands.
    pub fn into_lifecycle(self) -> Option<LifecycleEvent> {
        Some(match self {
            Self::Qr { qr } => LifecycleEvent::Qr(qr),
            Self::Authenticated => LifecycleEvent::Authenticated,
            Self::Ready { phone_number } => LifecycleEvent::Ready { phone_number },
            Self::AuthFailure { message } => LifecycleEvent::AuthFailure(message),
            Self::Disconnected { reason } => LifecycleEvent::Disconnected(reason),
            Self::Error { message } => LifecycleEvent::RuntimeError(message),
            Self::IsRegisteredResult { .. } | Self::SendResult { .. } => return None,
        })
    }
}
