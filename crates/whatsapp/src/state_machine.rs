//! The task that owns the channel session.
//!
//! All transitions run on one task: initialize requests, reconnect timers and
//! lifecycle events are funnelled through channels and applied in arrival
//! order. Readers get the latest [`SessionSnapshot`] from a watch channel and
//! never wait on the task.

use std::{sync::Arc, time::Duration};

use {
    tokio::sync::{mpsc, oneshot, watch},
    tracing::{debug, info, warn},
};

use crate::{
    client::ChannelClient,
    error::{Error, Result},
    qr,
    session::{ChannelSession, Effect, ReconnectPolicy},
    types::{ConnectionState, LifecycleEvent, SessionSnapshot},
};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

enum Command {
    Initialize,
    Reconnect { attempt: u32 },
    /// A QR image rendered off the session task.
    AttachQr { payload: String, image: String },
    Shutdown {
        timeout: Duration,
        done: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    client: Arc<dyn ChannelClient>,
}

impl SessionHandle {
    /// Ask for the channel to be brought up. Ignored while initialization is
    /// in progress or the channel is ready.
    pub async fn initialize(&self) -> Result<()> {
        self.commands
            .send(Command::Initialize)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn client(&self) -> &Arc<dyn ChannelClient> {
        &self.client
    }

    /// Wait until the session reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<SessionSnapshot> {
        self.wait_until(|s| s.state == state).await
    }

    /// Wait until a published snapshot satisfies `ready`.
    pub async fn wait_until(
        &self,
        ready: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snap = rx.wait_for(ready).await.map_err(|_| Error::SessionClosed)?;
        Ok(snap.clone())
    }

    /// Destroy the channel and stop the task. `timeout` bounds the destroy.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let (done, finished) = oneshot::channel();
        if self
            .commands
            .send(Command::Shutdown { timeout, done })
            .await
            .is_err()
        {
            // Already stopped.
            return Ok(());
        }
        finished.await.map_err(|_| Error::SessionClosed)
    }
}

/// Start the session task for `client`. The session stays `Uninitialized`
/// until [`SessionHandle::initialize`] is called.
pub fn spawn(client: Arc<dyn ChannelClient>, policy: ReconnectPolicy) -> SessionHandle {
    let session = ChannelSession::new(policy);
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

    let actor = Actor {
        session,
        client: Arc::clone(&client),
        snapshot: snapshot_tx,
        events: events_tx,
        commands: commands_tx.downgrade(),
        generation: 0,
    };
    tokio::spawn(actor.run(commands_rx, events_rx));

    SessionHandle {
        commands: commands_tx,
        snapshot: snapshot_rx,
        client,
    }
}

struct Actor {
    session: ChannelSession,
    client: Arc<dyn ChannelClient>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// Tagged with the generation of the client instance that produced them.
    events: mpsc::Sender<(u64, LifecycleEvent)>,
    commands: mpsc::WeakSender<Command>,
    generation: u64,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<(u64, LifecycleEvent)>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("all session handles dropped, stopping");
                        break;
                    };
                    let effect = match cmd {
                        Command::Initialize => self.session.request_initialize(),
                        Command::Reconnect { attempt } => {
                            info!(attempt, "reconnecting WhatsApp client");
                            self.session.reconnect_due(attempt)
                        },
                        Command::AttachQr { payload, image } => {
                            self.session.attach_qr_image(&payload, image);
                            None
                        },
                        Command::Shutdown { timeout, done } => {
                            self.destroy_client(timeout).await;
                            let _ = done.send(());
                            break;
                        },
                    };
                    self.after_transition(effect);
                },
                Some((generation, event)) = events.recv() => {
                    if generation != self.generation {
                        debug!(
                            generation,
                            current = self.generation,
                            ?event,
                            "dropping event from old client"
                        );
                        continue;
                    }
                    log_event(&event);
                    let effect = self.session.apply(event);
                    self.after_transition(effect);
                },
            }
        }
    }

    fn after_transition(&mut self, effect: Option<Effect>) {
        if let Some(effect) = effect {
            self.perform(effect);
        }
        let snapshot = self.session.snapshot();
        let previous = self.snapshot.borrow().state;
        if previous != snapshot.state {
            info!(from = %previous, to = %snapshot.state, "WhatsApp state changed");
        }
        self.snapshot.send_replace(snapshot);
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::StartClient => self.start_client(),
            Effect::PublishQr(payload) => self.publish_qr(payload),
            Effect::ScheduleReconnect { attempt, delay } => {
                info!(
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "scheduling WhatsApp reconnect"
                );
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(commands) = commands.upgrade() {
                        let _ = commands.send(Command::Reconnect { attempt }).await;
                    }
                });
            },
        }
    }

    /// Bring up a new client instance. Events from earlier instances are
    /// dropped from here on.
    fn start_client(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        info!(generation, "initializing WhatsApp client");

        let (tx, mut rx) = mpsc::channel::<LifecycleEvent>(EVENT_BUFFER);
        let forward = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if forward.send((generation, event)).await.is_err() {
                    break;
                }
            }
        });

        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            if let Err(e) = client.initialize(tx.clone()).await {
                warn!(error = %e, "WhatsApp client failed to initialize");
                let _ = tx
                    .send(LifecycleEvent::InitializationFailed(e.to_string()))
                    .await;
            }
        });
    }

    /// Render the challenge on a blocking thread; the image comes back as
    /// [`Command::AttachQr`] and is dropped if a newer challenge replaced it.
    fn publish_qr(&self, payload: String) {
        let commands = self.commands.clone();
        tokio::task::spawn_blocking(move || {
            match qr::render_terminal(&payload) {
                Ok(code) => info!("scan this QR code with WhatsApp to link the gateway:\n{code}"),
                Err(e) => warn!(error = %e, "could not render QR code for the terminal"),
            }
            let image = match qr::render_data_url(&payload) {
                Ok(image) => image,
                Err(e) => {
                    warn!(error = %e, "could not render QR code image");
                    return;
                },
            };
            if let Some(commands) = commands.upgrade() {
                let _ = commands.blocking_send(Command::AttachQr { payload, image });
            }
        });
    }

    async fn destroy_client(&mut self, timeout: Duration) {
        info!("shutting down WhatsApp client");
        // Anything still in flight belongs to a client that is going away.
        self.generation += 1;
        match tokio::time::timeout(timeout, self.client.destroy()).await {
            Ok(Ok(())) => info!("WhatsApp client destroyed"),
            Ok(Err(e)) => warn!(error = %e, "error destroying WhatsApp client"),
            Err(_) => warn!(?timeout, "timed out destroying WhatsApp client"),
        }
    }
}

fn log_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Qr(_) => info!("QR code received"),
        LifecycleEvent::Authenticated => info!("WhatsApp authenticated"),
        LifecycleEvent::Ready { phone_number } => {
            info!(
                phone_number = phone_number.as_deref().unwrap_or("unknown"),
                "WhatsApp client ready"
            );
        },
        LifecycleEvent::AuthFailure(reason) => warn!(reason, "WhatsApp authentication failed"),
        LifecycleEvent::Disconnected(reason) => warn!(reason, "WhatsApp client disconnected"),
        LifecycleEvent::InitializationFailed(reason) => {
            warn!(reason, "WhatsApp client initialization failed");
        },
        LifecycleEvent::RuntimeError(message) => warn!(error = %message, "WhatsApp client error"),
    }
}
