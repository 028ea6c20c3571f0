//! WhatsApp Web channel for wagate.
//!
//! The channel itself is driven by a Node sidecar; this crate owns the
//! connection state machine in front of it, destination normalization, and
//! QR rendering for linking the device.

pub mod client;
pub mod error;
pub mod phone;
pub mod process;
pub mod protocol;
pub mod qr;
pub mod session;
pub mod sidecar;
pub mod state_machine;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use {
    client::{ChannelClient, EventSender},
    error::{Error, Result},
    phone::{CHAT_ID_SUFFIX, DEFAULT_COUNTRY_CODE, PhoneNormalizer},
    session::ReconnectPolicy,
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarClient, SidecarOptions},
    state_machine::{SessionHandle, spawn},
    types::{ConnectionState, LifecycleEvent, SentMessage, SessionSnapshot},
};
