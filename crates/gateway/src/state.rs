use std::time::{Duration, Instant};

use {
    wagate_config::WagateConfig,
    wagate_whatsapp::{PhoneNormalizer, SessionHandle},
};

use crate::{
    request_throttle::{RateLimit, RequestThrottle},
    send::SendGateway,
};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub sender: SendGateway,
    pub throttle: RequestThrottle,
    pub trust_proxy: bool,
    pub memory_warn_bytes: u64,
    pub started_at: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(config: &WagateConfig, session: SessionHandle) -> Self {
        let sender = SendGateway::new(
            session.clone(),
            PhoneNormalizer::new(config.whatsapp.default_country_code.clone()),
            config.whatsapp.send_timeout(),
            config.server.environment.exposes_error_detail(),
        );
        Self {
            session,
            sender,
            throttle: RequestThrottle::new(RateLimit::from(&config.rate_limit)),
            trust_proxy: config.server.trust_proxy,
            memory_warn_bytes: config.security.memory_warn_mb.saturating_mul(BYTES_PER_MB),
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
