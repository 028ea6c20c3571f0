//! Channel session state and its transition function.
//!
//! [`ChannelSession`] is plain data: every lifecycle event and initialize
//! request goes through [`ChannelSession::apply`] or
//! [`ChannelSession::request_initialize`], which mutate the state and return
//! the side effect the owner must carry out. Nothing here does I/O, so the
//! whole transition table is testable without a channel.

use std::time::Duration;

use {
    chrono::Utc,
    tracing::{debug, warn},
    wagate_config::ReconnectConfig,
};

use crate::types::{ConnectionState, LastError, LifecycleEvent, QrChallenge, SessionSnapshot};

/// When to retry after a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Consecutive reconnects before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(cfg.base_delay_secs),
            multiplier: cfg.multiplier,
            max_delay: Duration::from_secs(cfg.max_delay_secs.max(cfg.base_delay_secs)),
            max_attempts: cfg.max_attempts,
        }
    }
}

/// Work the session owner must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Bring up a fresh channel instance.
    StartClient,
    /// Render and publish the challenge just stored.
    PublishQr(String),
    /// Post a reconnect after `delay`.
    ScheduleReconnect { attempt: u32, delay: Duration },
}

#[derive(Debug)]
pub struct ChannelSession {
    state: ConnectionState,
    last_error: Option<LastError>,
    qr: Option<QrChallenge>,
    phone_number: Option<String>,
    reconnect_attempts: u32,
    changed_at: chrono::DateTime<Utc>,
    policy: ReconnectPolicy,
}

impl ChannelSession {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            last_error: None,
            qr: None,
            phone_number: None,
            reconnect_attempts: 0,
            changed_at: Utc::now(),
            policy,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            initializing: self.state.is_initializing(),
            last_error: self.last_error.clone(),
            qr: self.qr.clone(),
            phone_number: self.phone_number.clone(),
            reconnect_attempts: self.reconnect_attempts,
            changed_at: self.changed_at,
        }
    }

    /// Start a new channel instance unless one is already coming up or live.
    pub fn request_initialize(&mut self) -> Option<Effect> {
        if self.state.is_initializing() {
            warn!(state = %self.state, "initialization already in progress, ignoring");
            return None;
        }
        if !self.state.accepts_initialize() {
            debug!(state = %self.state, "channel already ready, ignoring initialize");
            return None;
        }
        self.qr = None;
        self.phone_number = None;
        self.set_state(ConnectionState::Initializing);
        Some(Effect::StartClient)
    }

    /// A scheduled reconnect came due. Honoured only if nothing else has
    /// happened to the session since it was scheduled.
    pub fn reconnect_due(&mut self, attempt: u32) -> Option<Effect> {
        if self.state != ConnectionState::Disconnected || self.reconnect_attempts != attempt {
            debug!(
                state = %self.state,
                attempt,
                current = self.reconnect_attempts,
                "dropping stale reconnect"
            );
            return None;
        }
        self.request_initialize()
    }

    pub fn apply(&mut self, event: LifecycleEvent) -> Option<Effect> {
        if let LifecycleEvent::RuntimeError(message) = event {
            self.record_error(message);
            return None;
        }

        if self.state.accepts_initialize() {
            debug!(state = %self.state, ?event, "ignoring event from a torn-down client");
            return None;
        }

        match event {
            LifecycleEvent::Qr(payload) => {
                self.qr = Some(QrChallenge {
                    payload: payload.clone(),
                    image: None,
                    issued_at: Utc::now(),
                });
                self.set_state(ConnectionState::AwaitingAuth);
                Some(Effect::PublishQr(payload))
            },
            LifecycleEvent::Authenticated => {
                self.qr = None;
                self.set_state(ConnectionState::Authenticated);
                None
            },
            LifecycleEvent::Ready { phone_number } => {
                self.qr = None;
                self.phone_number = phone_number;
                self.reconnect_attempts = 0;
                self.set_state(ConnectionState::Ready);
                None
            },
            LifecycleEvent::AuthFailure(reason) => {
                self.qr = None;
                self.record_error(reason);
                self.set_state(ConnectionState::Error);
                None
            },
            LifecycleEvent::Disconnected(reason) | LifecycleEvent::InitializationFailed(reason) => {
                self.qr = None;
                self.phone_number = None;
                self.record_error(reason);
                self.schedule_reconnect()
            },
            LifecycleEvent::RuntimeError(_) => None,
        }
    }

    /// Attach the rendered image to the current challenge if it still is
    /// the one that was rendered.
    pub fn attach_qr_image(&mut self, payload: &str, image: String) {
        if let Some(qr) = self.qr.as_mut()
            && qr.payload == payload
        {
            qr.image = Some(image);
        }
    }

    fn schedule_reconnect(&mut self) -> Option<Effect> {
        let attempt = self.reconnect_attempts.saturating_add(1);
        if let Some(max) = self.policy.max_attempts
            && attempt > max
        {
            self.record_error(format!("reconnect attempts exhausted after {max}"));
            self.set_state(ConnectionState::Error);
            return None;
        }
        self.reconnect_attempts = attempt;
        self.set_state(ConnectionState::Disconnected);
        Some(Effect::ScheduleReconnect {
            attempt,
            delay: self.policy.delay_for(attempt),
        })
    }

    fn record_error(&mut self, message: String) {
        self.last_error = Some(LastError {
            message,
            at: Utc::now(),
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.changed_at = Utc::now();
    }
}

impl Default for ChannelSession {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn initializing() -> ChannelSession {
        let mut session = ChannelSession::default();
        assert_eq!(session.request_initialize(), Some(Effect::StartClient));
        session
    }

    fn ready() -> ChannelSession {
        let mut session = initializing();
        session.apply(LifecycleEvent::Authenticated);
        session.apply(LifecycleEvent::Ready {
            phone_number: Some("911234567890".into()),
        });
        assert_eq!(session.state(), ConnectionState::Ready);
        session
    }

    #[test]
    fn starts_uninitialized() {
        let session = ChannelSession::default();
        assert_eq!(session.state(), ConnectionState::Uninitialized);
        assert!(session.snapshot().qr.is_none());
    }

    #[test]
    fn initialize_is_guarded_while_in_progress() {
        let mut session = initializing();
        assert_eq!(session.request_initialize(), None);

        session.apply(LifecycleEvent::Qr("qr-1".into()));
        assert_eq!(session.request_initialize(), None);

        session.apply(LifecycleEvent::Authenticated);
        assert_eq!(session.request_initialize(), None);
        assert_eq!(session.state(), ConnectionState::Authenticated);
    }

    #[test]
    fn initialize_is_noop_when_ready() {
        let mut session = ready();
        assert_eq!(session.request_initialize(), None);
        assert_eq!(session.state(), ConnectionState::Ready);
    }

    #[test]
    fn qr_stores_challenge_and_requests_publish() {
        let mut session = initializing();
        let effect = session.apply(LifecycleEvent::Qr("qr-1".into()));
        assert_eq!(effect, Some(Effect::PublishQr("qr-1".into())));
        assert_eq!(session.state(), ConnectionState::AwaitingAuth);
        assert_eq!(session.snapshot().qr.unwrap().payload, "qr-1");
    }

    #[test]
    fn rotated_qr_replaces_previous_one() {
        let mut session = initializing();
        session.apply(LifecycleEvent::Qr("qr-1".into()));
        session.attach_qr_image("qr-1", "data:old".into());
        session.apply(LifecycleEvent::Qr("qr-2".into()));

        // A late render of the first challenge must not land on the second.
        session.attach_qr_image("qr-1", "data:stale".into());
        let qr = session.snapshot().qr.unwrap();
        assert_eq!(qr.payload, "qr-2");
        assert!(qr.image.is_none());
    }

    #[test]
    fn authenticated_clears_challenge() {
        let mut session = initializing();
        session.apply(LifecycleEvent::Qr("qr-1".into()));
        session.apply(LifecycleEvent::Authenticated);
        assert_eq!(session.state(), ConnectionState::Authenticated);
        assert!(session.snapshot().qr.is_none());
    }

    #[test]
    fn qr_after_authenticated_returns_to_awaiting_auth() {
        let mut session = initializing();
        session.apply(LifecycleEvent::Authenticated);
        session.apply(LifecycleEvent::Qr("qr-again".into()));
        assert_eq!(session.state(), ConnectionState::AwaitingAuth);
    }

    #[test]
    fn ready_records_phone_number() {
        let session = ready();
        let snap = session.snapshot();
        assert!(snap.is_ready());
        assert!(!snap.is_initializing());
        assert_eq!(snap.phone_number.as_deref(), Some("911234567890"));
    }

    #[test]
    fn auth_failure_moves_to_error_without_retry() {
        let mut session = initializing();
        session.apply(LifecycleEvent::Qr("qr".into()));
        let effect = session.apply(LifecycleEvent::AuthFailure("bad credentials".into()));
        assert_eq!(effect, None);
        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(
            session.snapshot().last_error.unwrap().message,
            "bad credentials"
        );
        // A later disconnect from the same client does not schedule a retry.
        assert_eq!(session.apply(LifecycleEvent::Disconnected("x".into())), None);
        assert_eq!(session.state(), ConnectionState::Error);
        // An explicit initialize does.
        assert_eq!(session.request_initialize(), Some(Effect::StartClient));
    }

    #[test]
    fn disconnect_schedules_fixed_delay_reconnect() {
        let mut session = ready();
        let effect = session.apply(LifecycleEvent::Disconnected("NAVIGATION".into()));
        assert_eq!(
            effect,
            Some(Effect::ScheduleReconnect {
                attempt: 1,
                delay: Duration::from_secs(5),
            })
        );
        let snap = session.snapshot();
        assert_eq!(snap.state, ConnectionState::Disconnected);
        assert!(!snap.is_initializing());
        assert!(snap.phone_number.is_none());
    }

    #[test]
    fn disconnect_while_awaiting_auth_also_reconnects() {
        let mut session = initializing();
        session.apply(LifecycleEvent::Qr("qr".into()));
        assert!(matches!(
            session.apply(LifecycleEvent::Disconnected("closed".into())),
            Some(Effect::ScheduleReconnect { attempt: 1, .. })
        ));
        assert!(session.snapshot().qr.is_none());
    }

    #[test]
    fn initialization_failure_is_treated_as_disconnect() {
        let mut session = initializing();
        let effect = session.apply(LifecycleEvent::InitializationFailed("no sidecar".into()));
        assert!(matches!(effect, Some(Effect::ScheduleReconnect { .. })));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_due_restarts_client_once() {
        let mut session = ready();
        session.apply(LifecycleEvent::Disconnected("x".into()));
        assert_eq!(session.reconnect_due(1), Some(Effect::StartClient));
        assert_eq!(session.state(), ConnectionState::Initializing);
        // The same timer firing twice is dropped by the guard.
        assert_eq!(session.reconnect_due(1), None);
    }

    #[test]
    fn stale_reconnect_after_manual_initialize_is_dropped() {
        let mut session = ready();
        session.apply(LifecycleEvent::Disconnected("x".into()));
        assert_eq!(session.request_initialize(), Some(Effect::StartClient));
        session.apply(LifecycleEvent::AuthFailure("denied".into()));
        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(session.reconnect_due(1), None);
        assert_eq!(session.state(), ConnectionState::Error);
    }

    #[test]
    fn attempts_accumulate_until_ready() {
        let mut session = ready();
        for expected in 1..=3 {
            let effect = session.apply(LifecycleEvent::Disconnected("x".into()));
            assert!(matches!(
                effect,
                Some(Effect::ScheduleReconnect { attempt, .. }) if attempt == expected
            ));
            session.reconnect_due(expected);
        }
        session.apply(LifecycleEvent::Ready { phone_number: None });
        assert_eq!(session.reconnect_attempts(), 0);
    }

    #[test]
    fn max_attempts_moves_to_error() {
        let mut session = ChannelSession::new(ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        });
        session.request_initialize();
        for attempt in 1..=2 {
            assert!(
                session
                    .apply(LifecycleEvent::InitializationFailed("down".into()))
                    .is_some()
            );
            session.reconnect_due(attempt);
        }
        assert_eq!(
            session.apply(LifecycleEvent::InitializationFailed("down".into())),
            None
        );
        assert_eq!(session.state(), ConnectionState::Error);
        assert!(
            session
                .snapshot()
                .last_error
                .unwrap()
                .message
                .contains("exhausted")
        );
    }

    #[test]
    fn runtime_error_keeps_state() {
        let mut session = ready();
        assert_eq!(
            session.apply(LifecycleEvent::RuntimeError("evaluation failed".into())),
            None
        );
        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(
            session.snapshot().last_error.unwrap().message,
            "evaluation failed"
        );
    }

    #[test]
    fn events_before_initialize_are_ignored() {
        let mut session = ChannelSession::default();
        assert_eq!(session.apply(LifecycleEvent::Ready { phone_number: None }), None);
        assert_eq!(session.apply(LifecycleEvent::Qr("qr".into())), None);
        assert_eq!(session.state(), ConnectionState::Uninitialized);
    }

    #[test]
    fn events_while_disconnected_are_ignored() {
        let mut session = ready();
        session.apply(LifecycleEvent::Disconnected("x".into()));
        assert_eq!(session.apply(LifecycleEvent::Ready { phone_number: None }), None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn exponential_policy_is_capped() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(5),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(40));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn default_policy_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(100), Duration::from_secs(5));
        assert_eq!(policy.max_attempts, None);
    }
}
