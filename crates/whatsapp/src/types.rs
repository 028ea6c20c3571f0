use {
    chrono::{DateTime, Utc},
    serde::Serialize,
};

/// Lifecycle state of the channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    AwaitingAuth,
    Authenticated,
    Ready,
    Disconnected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Initialization has started and not yet reached `Ready`, failed, or
    /// disconnected.
    #[must_use]
    pub fn is_initializing(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::AwaitingAuth | Self::Authenticated
        )
    }

    /// States from which a new channel instance may be started.
    #[must_use]
    pub fn accepts_initialize(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Disconnected | Self::Error)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events the channel reports about its own lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A credential challenge to be scanned from the phone.
    Qr(String),
    Authenticated,
    Ready { phone_number: Option<String> },
    AuthFailure(String),
    Disconnected(String),
    /// The client could not be started at all.
    InitializationFailed(String),
    /// An error not tied to a lifecycle change.
    RuntimeError(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A pending credential challenge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrChallenge {
    pub payload: String,
    /// PNG rendering as a data URL, once rendered.
    pub image: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Read-only view of the session published after every transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub initializing: bool,
    pub last_error: Option<LastError>,
    pub qr: Option<QrChallenge>,
    pub phone_number: Option<String>,
    pub reconnect_attempts: u32,
    pub changed_at: DateTime<Utc>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    #[must_use]
    pub fn is_initializing(&self) -> bool {
        self.initializing
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
    /// Channel-side timestamp in seconds, when reported.
    pub timestamp: Option<i64>,
}
