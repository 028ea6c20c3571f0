//! HTTP gateway: send endpoint, rate limiting, and observability routes in
//! front of the WhatsApp session.
//!
//! Request flow for `POST /send-whatsapp`:
//! 1. Rate limit by client address
//! 2. Validate the body
//! 3. Check the channel is ready, normalize the destination
//! 4. Existence check, then send

pub mod error;
pub mod logs;
pub mod request_throttle;
pub mod send;
pub mod server;
pub mod state;
pub mod status;
pub mod validate;

pub use {
    error::ApiError,
    logs::LogFileLayer,
    send::{SendGateway, SendResult},
    server::{build_gateway_app, shutdown_signal, start_gateway},
    state::AppState,
};
