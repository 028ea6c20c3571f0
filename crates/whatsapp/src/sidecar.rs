//! [`ChannelClient`] backed by the Node sidecar.
//!
//! The sidecar runs WhatsApp Web in a headless browser and exposes a local
//! WebSocket. Lifecycle frames become [`LifecycleEvent`]s; `is_registered`
//! and `send` are request/response pairs matched on a request id.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    tokio::{
        net::TcpStream,
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
    uuid::Uuid,
    wagate_config::WagateConfig,
};

use crate::{
    client::{ChannelClient, EventSender},
    error::{Error, Result},
    process::{LaunchOptions, SidecarProcess, find_sidecar_dir, start_sidecar},
    protocol::{GatewayFrame, SidecarFrame},
    types::{LifecycleEvent, SentMessage},
};

pub const DEFAULT_SIDECAR_PORT: u16 = 18790;

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<DashMap<String, oneshot::Sender<SidecarFrame>>>;

#[derive(Debug, Clone)]
pub struct SidecarOptions {
    pub port: u16,
    pub client_id: String,
    pub session_path: PathBuf,
    /// Sidecar checkout; discovered when unset.
    pub dir: Option<PathBuf>,
    /// Spawn and supervise the sidecar process. When false it is expected to
    /// be running already.
    pub auto_start: bool,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_SIDECAR_PORT,
            client_id: "wagate".into(),
            session_path: PathBuf::from("./.wwebjs_auth"),
            dir: None,
            auto_start: true,
        }
    }
}

impl From<&WagateConfig> for SidecarOptions {
    fn from(cfg: &WagateConfig) -> Self {
        Self {
            port: cfg.sidecar.port,
            client_id: cfg.whatsapp.client_id.clone(),
            session_path: cfg.whatsapp.session_path.clone(),
            dir: cfg.sidecar.dir.clone(),
            auto_start: cfg.sidecar.auto_start,
        }
    }
}

/// One live WebSocket connection. Dropping it stops both pump tasks and
/// fails every request still waiting on it.
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    tasks: [JoinHandle<()>; 2],
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.pending.clear();
    }
}

/// Removes a pending entry when the waiting caller goes away, including when
/// it is cancelled by a timeout.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.request_id);
    }
}

pub struct SidecarClient {
    options: SidecarOptions,
    link: Mutex<Option<Link>>,
    process: Mutex<Option<SidecarProcess>>,
}

impl SidecarClient {
    pub fn new(options: SidecarOptions) -> Self {
        Self {
            options,
            link: Mutex::new(None),
            process: Mutex::new(None),
        }
    }

    async fn ensure_process(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if let Some(proc) = process.as_mut() {
            if proc.is_running() {
                return Ok(());
            }
            warn!(port = proc.port(), "sidecar process died, restarting");
        }

        let dir = find_sidecar_dir(self.options.dir.as_deref())?;
        let launch = LaunchOptions {
            dir,
            port: self.options.port,
            session_path: self.options.session_path.clone(),
        };
        *process = Some(start_sidecar(&launch).await?);
        Ok(())
    }

    async fn request(&self, build: impl FnOnce(String) -> GatewayFrame) -> Result<SidecarFrame> {
        let (outbound, pending) = {
            let link = self.link.lock().await;
            let link = link.as_ref().ok_or(Error::NotConnected)?;
            (link.outbound.clone(), Arc::clone(&link.pending))
        };

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &pending,
            request_id: &request_id,
        };

        let text = serde_json::to_string(&build(request_id.clone()))?;
        outbound.send(text).map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)
    }
}

#[async_trait]
impl ChannelClient for SidecarClient {
    async fn initialize(&self, events: EventSender) -> Result<()> {
        // Only one connection may be live; the old one goes first.
        self.link.lock().await.take();

        if self.options.auto_start {
            self.ensure_process().await?;
        }

        let ws = connect_with_retry(self.options.port, CONNECT_ATTEMPTS).await?;
        let link = spawn_link(ws, events);

        let init = GatewayFrame::Initialize {
            client_id: self.options.client_id.clone(),
            data_path: self.options.session_path.to_string_lossy().into_owned(),
        };
        link.outbound
            .send(serde_json::to_string(&init)?)
            .map_err(|_| Error::NotConnected)?;

        *self.link.lock().await = Some(link);
        info!(port = self.options.port, "connected to WhatsApp sidecar");
        Ok(())
    }

    async fn is_registered_user(&self, chat_id: &str) -> Result<bool> {
        let reply = self
            .request(|request_id| GatewayFrame::IsRegistered {
                request_id,
                chat_id: chat_id.to_string(),
            })
            .await?;
        match reply {
            SidecarFrame::IsRegisteredResult {
                error: Some(error), ..
            } => Err(Error::Rejected(error)),
            SidecarFrame::IsRegisteredResult { registered, .. } => Ok(registered),
            other => Err(Error::sidecar(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<SentMessage> {
        let reply = self
            .request(|request_id| GatewayFrame::Send {
                request_id,
                chat_id: chat_id.to_string(),
                body: body.to_string(),
            })
            .await?;
        match reply {
            SidecarFrame::SendResult {
                success: true,
                message_id: Some(id),
                timestamp,
                ..
            } => Ok(SentMessage { id, timestamp }),
            SidecarFrame::SendResult { error, .. } => Err(Error::Rejected(
                error.unwrap_or_else(|| "send failed".to_string()),
            )),
            other => Err(Error::sidecar(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn destroy(&self) -> Result<()> {
        if let Some(link) = self.link.lock().await.take() {
            if let Ok(text) = serde_json::to_string(&GatewayFrame::Destroy) {
                let _ = link.outbound.send(text);
            }
            // Give the writer a moment to flush the destroy frame.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if let Some(mut process) = self.process.lock().await.take() {
            process.stop().await;
        }
        Ok(())
    }
}

/// Connect to the sidecar, retrying while it is still starting up.
pub async fn connect_with_retry(port: u16, attempts: u32) -> Result<WsStream> {
    let url = format!("ws://127.0.0.1:{port}");
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => return Ok(ws),
            Err(e) => {
                debug!(attempt, error = %e, "sidecar not reachable yet");
                last_err = Some(e);
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            },
        }
    }
    Err(Error::Sidecar(format!(
        "could not connect to sidecar at {url}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn spawn_link(ws: WsStream, events: EventSender) -> Link {
    let (mut sink, mut stream) = ws.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let pending: PendingMap = Arc::new(DashMap::new());

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                warn!(error = %e, "failed to write to sidecar");
                break;
            }
        }
    });

    let reader_pending = Arc::clone(&pending);
    let reader = tokio::spawn(async move {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    dispatch_frame(text.as_str(), &reader_pending, &events).await;
                },
                Some(Ok(Message::Close(_))) | None => break "sidecar connection closed".to_string(),
                Some(Ok(_)) => {},
                Some(Err(e)) => break format!("sidecar connection error: {e}"),
            }
        };
        // Whoever is still waiting will not get an answer.
        reader_pending.clear();
        let _ = events.send(LifecycleEvent::Disconnected(reason)).await;
    });

    Link {
        outbound,
        pending,
        tasks: [writer, reader],
    }
}

async fn dispatch_frame(text: &str, pending: &PendingMap, events: &EventSender) {
    let frame: SidecarFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "ignoring malformed sidecar frame");
            return;
        },
    };

    if let Some(request_id) = frame.request_id() {
        match pending.remove(request_id) {
            Some((_, tx)) => {
                let _ = tx.send(frame);
            },
            None => debug!(request_id, "reply for unknown or expired request"),
        }
        return;
    }

    if let Some(event) = frame.into_lifecycle() {
        let _ = events.send(event).await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tokio::net::TcpListener, tokio_tungstenite::accept_async};

    /// Fake sidecar: answers `is_registered` with `registered = true` and
    /// `send` with a fixed message id after pushing a `ready` frame.
    async fn fake_sidecar() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: GatewayFrame = serde_json::from_str(text.as_str()).unwrap();
                let reply = match frame {
                    GatewayFrame::Initialize { .. } => SidecarFrame::Ready {
                        phone_number: Some("911234567890".into()),
                    },
                    GatewayFrame::IsRegistered { request_id, .. } => {
                        SidecarFrame::IsRegisteredResult {
                            request_id,
                            registered: true,
                            error: None,
                        }
                    },
                    GatewayFrame::Send { request_id, .. } => SidecarFrame::SendResult {
                        request_id,
                        success: true,
                        message_id: Some("msg-1".into()),
                        timestamp: Some(1_700_000_000),
                        error: None,
                    },
                    GatewayFrame::Destroy => break,
                };
                let text = serde_json::to_string(&reply).unwrap();
                ws.send(Message::Text(text.into())).await.unwrap();
            }
        });
        port
    }

    fn options(port: u16) -> SidecarOptions {
        SidecarOptions {
            port,
            auto_start: false,
            ..SidecarOptions::default()
        }
    }

    #[tokio::test]
    async fn requests_before_initialize_are_not_connected() {
        let client = SidecarClient::new(options(1));
        assert!(matches!(
            client.is_registered_user("x@c.us").await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn round_trip_through_fake_sidecar() {
        let port = fake_sidecar().await;
        let client = SidecarClient::new(options(port));
        let (tx, mut rx) = mpsc::channel(8);

        client.initialize(tx).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(LifecycleEvent::Ready {
                phone_number: Some("911234567890".into())
            })
        );

        assert!(client.is_registered_user("911234567890@c.us").await.unwrap());
        let sent = client.send_message("911234567890@c.us", "hi").await.unwrap();
        assert_eq!(sent.id, "msg-1");
        assert_eq!(sent.timestamp, Some(1_700_000_000));

        client.destroy().await.unwrap();
        assert!(matches!(
            client.send_message("911234567890@c.us", "hi").await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn closed_socket_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        let client = SidecarClient::new(options(port));
        let (tx, mut rx) = mpsc::channel(8);
        client.initialize(tx).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(LifecycleEvent::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_sidecar_fails_initialize() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = connect_with_retry(port, 1).await.err().unwrap();
        assert!(matches!(err, Error::Sidecar(_)));
    }
}
