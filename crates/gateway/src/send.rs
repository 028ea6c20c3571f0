//! Message dispatch through the channel.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tracing::{error, info, warn},
    wagate_whatsapp::{Error as ChannelError, PhoneNormalizer, SessionHandle},
};

use crate::error::ApiError;

/// Outcome of a successful send, as returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub message_id: String,
    /// The destination as the caller gave it.
    pub to: String,
    pub chat_id: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time spent, e.g. `"182ms"`.
    pub response_time: String,
}

#[derive(Clone)]
pub struct SendGateway {
    session: SessionHandle,
    normalizer: PhoneNormalizer,
    call_timeout: Duration,
    expose_errors: bool,
}

impl SendGateway {
    pub fn new(
        session: SessionHandle,
        normalizer: PhoneNormalizer,
        call_timeout: Duration,
        expose_errors: bool,
    ) -> Self {
        Self {
            session,
            normalizer,
            call_timeout,
            expose_errors,
        }
    }

    /// Send `body` to `number`. Fails fast when the channel is not ready;
    /// nothing is queued.
    pub async fn send(&self, number: &str, body: &str) -> Result<SendResult, ApiError> {
        let started = Instant::now();

        let snapshot = self.session.snapshot();
        if !snapshot.is_ready() {
            warn!(
                to = number,
                state = %snapshot.state,
                "rejecting send, WhatsApp client not ready"
            );
            return Err(ApiError::ChannelNotReady {
                initializing: snapshot.is_initializing(),
            });
        }

        let chat_id = self.normalizer.normalize(number);
        let client = self.session.client();

        let registered = self
            .bounded(client.is_registered_user(&chat_id))
            .await
            .map_err(|e| self.failed(number, &chat_id, started, e))?;
        if !registered {
            warn!(
                to = number,
                chat_id = %chat_id,
                elapsed_ms = elapsed_ms(started),
                "destination is not registered on WhatsApp"
            );
            return Err(ApiError::DestinationNotRegistered {
                number: number.to_string(),
            });
        }

        let sent = self
            .bounded(client.send_message(&chat_id, body))
            .await
            .map_err(|e| self.failed(number, &chat_id, started, e))?;

        let elapsed = elapsed_ms(started);
        info!(
            to = number,
            chat_id = %chat_id,
            message_id = %sent.id,
            elapsed_ms = elapsed,
            "message sent"
        );

        Ok(SendResult {
            message_id: sent.id,
            to: number.to_string(),
            chat_id,
            timestamp: Utc::now(),
            response_time: format!("{elapsed}ms"),
        })
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = wagate_whatsapp::Result<T>>,
    ) -> wagate_whatsapp::Result<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or_else(|_| Err(ChannelError::Timeout(self.call_timeout)))
    }

    fn failed(&self, number: &str, chat_id: &str, started: Instant, e: ChannelError) -> ApiError {
        error!(
            to = number,
            chat_id,
            elapsed_ms = elapsed_ms(started),
            error = %e,
            "failed to send message"
        );
        ApiError::SendFailed {
            detail: e.to_string(),
            expose_detail: self.expose_errors,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
