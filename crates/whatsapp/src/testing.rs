//! Scripted [`ChannelClient`] for tests.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    client::{ChannelClient, EventSender},
    error::{Error, Result},
    types::{LifecycleEvent, SentMessage},
};

/// A fake channel.
///
/// `initialize` replays the configured script onto the event channel. Tests
/// can push further events with [`MockClient::emit`].
#[derive(Default)]
pub struct MockClient {
    script: Mutex<Vec<LifecycleEvent>>,
    registered: Mutex<Option<HashSet<String>>>,
    events: Mutex<Option<EventSender>>,
    sent: Mutex<Vec<(String, String)>>,
    send_delay: Mutex<Option<Duration>>,
    fail_initialize: AtomicBool,
    fail_sends: AtomicBool,
    initialize_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that goes straight to ready on initialize.
    pub fn ready() -> Self {
        Self::new().with_script(vec![
            LifecycleEvent::Authenticated,
            LifecycleEvent::Ready {
                phone_number: Some("911234567890".into()),
            },
        ])
    }

    pub fn with_script(self, script: Vec<LifecycleEvent>) -> Self {
        *lock(&self.script) = script;
        self
    }

    /// Only these chat ids count as registered. Without this every id does.
    pub fn with_registered<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.registered) = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_send_delay(self, delay: Duration) -> Self {
        *lock(&self.send_delay) = Some(delay);
        self
    }

    pub fn failing_initialize(self) -> Self {
        self.fail_initialize.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Push an event as if the channel reported it.
    pub async fn emit(&self, event: LifecycleEvent) {
        let events = lock(&self.events).clone();
        if let Some(events) = events {
            let _ = events.send(event).await;
        }
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    /// `(chat_id, body)` of every successful send.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl ChannelClient for MockClient {
    async fn initialize(&self, events: EventSender) -> Result<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(Error::sidecar("mock initialize failure"));
        }
        *lock(&self.events) = Some(events.clone());
        let script = lock(&self.script).clone();
        for event in script {
            let _ = events.send(event).await;
        }
        Ok(())
    }

    async fn is_registered_user(&self, chat_id: &str) -> Result<bool> {
        Ok(lock(&self.registered)
            .as_ref()
            .is_none_or(|ids| ids.contains(chat_id)))
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<SentMessage> {
        let delay = *lock(&self.send_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Rejected("mock send failure".into()));
        }
        let mut sent = lock(&self.sent);
        sent.push((chat_id.to_string(), body.to_string()));
        Ok(SentMessage {
            id: format!("true_{chat_id}_MOCK{}", sent.len()),
            timestamp: Some(chrono::Utc::now().timestamp()),
        })
    }

    async fn destroy(&self) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).take();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
