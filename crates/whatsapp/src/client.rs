use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    error::Result,
    types::{LifecycleEvent, SentMessage},
};

/// Where a client reports lifecycle events.
pub type EventSender = mpsc::Sender<LifecycleEvent>;

/// The external messaging channel.
///
/// One instance lives for the whole process. `initialize` may be called again
/// after a disconnect; implementations tear down whatever the previous call
/// started before bringing up a new connection, so only one is ever live.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Start the channel. Returns once startup was handed off; progress
    /// (QR, authenticated, ready, ...) arrives on `events`.
    async fn initialize(&self, events: EventSender) -> Result<()>;

    /// Whether `chat_id` belongs to a registered account.
    async fn is_registered_user(&self, chat_id: &str) -> Result<bool>;

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<SentMessage>;

    /// Tear the channel down. Called once on shutdown.
    async fn destroy(&self) -> Result<()>;
}
