//! Websocket transport: one socket, one task.
//!
//! The connection owns the lifecycle `Uninitialized → Ready → Connecting →
//! Open → Closed`. `connect` spawns a single task that performs the handshake
//! and then runs the frame loop; every concurrent caller awaits the same
//! outcome. Inbound binary frames are handed to an [`InboundSink`] in arrival
//! order, on the connection task.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::dispatcher::CloseInfo;
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outcome shared by every `connect` caller; `None` while in flight.
type ConnectOutcome = Option<Result<(), ClientError>>;

/// Lifecycle of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No endpoint known yet.
    Uninitialized,
    /// Endpoint known, never connected.
    Ready,
    /// Handshake in flight, or failed (the failure is kept).
    Connecting,
    /// Frames flow both ways.
    Open,
    /// The socket ended. Terminal.
    Closed,
}

impl ConnectionState {
    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of transport events, called on the connection task.
pub trait InboundSink: Send + Sync + 'static {
    /// The handshake succeeded.
    fn on_open(&self, _url: &Url) {}

    /// A binary frame arrived.
    fn on_frame(&self, frame: &[u8]);

    /// The socket ended. Called exactly once per opened transport.
    fn on_close(&self, _info: CloseInfo) {}
}

/// Derive the websocket URL from an endpoint.
///
/// `http` maps to `ws` and `https` to `wss`; `ws`/`wss` are kept. The optional
/// `resource` and then `session_token` are appended as path segments.
pub fn transport_url(
    endpoint: &Url,
    resource: Option<&str>,
    session_token: Option<&str>,
) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidEndpoint {
        url: endpoint.to_string(),
        reason,
    };

    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };

    let mut url = endpoint.clone();
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch scheme to '{scheme}'")))?;

    let extra: Vec<&str> = resource
        .into_iter()
        .chain(session_token)
        .filter(|s| !s.is_empty())
        .collect();
    if !extra.is_empty() {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| invalid("endpoint cannot carry a path".to_string()))?;
        let _ = segments.pop_if_empty().extend(extra);
    }
    Ok(url)
}

enum Outbound {
    Frame(Bytes),
    Close,
}

#[derive(Default)]
struct Inner {
    endpoint: Option<Url>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// The handle is gone; a handshake finishing now must not go live.
    dropped: bool,
}

/// State shared between the handle and the connection task.
///
/// `state` is only written while `inner` is locked, so check-and-transition
/// sequences are atomic. `closed` flips once the sink has seen the close.
struct Shared {
    inner: Mutex<Inner>,
    state: watch::Sender<ConnectionState>,
    outcome: watch::Sender<ConnectOutcome>,
    closed: watch::Sender<bool>,
}

/// Handle to the single websocket transport.
pub struct Connection {
    shared: Arc<Shared>,
    sink: Arc<dyn InboundSink>,
    resource: Option<String>,
}

impl Connection {
    /// New connection in `Uninitialized`. `resource` is the path segment
    /// placed before the session token.
    pub fn new(sink: Arc<dyn InboundSink>, resource: Option<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        let (outcome, _) = watch::channel(None);
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                state,
                outcome,
                closed,
            }),
            sink,
            resource,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// The stored endpoint, if any.
    pub fn endpoint(&self) -> Option<Url> {
        self.shared.inner.lock().endpoint.clone()
    }

    /// Store the server endpoint.
    ///
    /// The first call moves `Uninitialized → Ready` and wakes [`ready`]
    /// waiters. Later calls replace the endpoint without touching a
    /// transport that is already connecting or open.
    ///
    /// [`ready`]: Self::ready
    pub fn set_endpoint(&self, endpoint: &str) -> Result<(), ClientError> {
        let url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let mut inner = self.shared.inner.lock();
        inner.endpoint = Some(url);
        if self.state() == ConnectionState::Uninitialized {
            let _ = self.shared.state.send_replace(ConnectionState::Ready);
            info!(endpoint, "endpoint set");
        } else {
            debug!(endpoint, "endpoint replaced");
        }
        Ok(())
    }

    /// Wait until an endpoint is known.
    pub async fn ready(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx
            .wait_for(|s| *s != ConnectionState::Uninitialized)
            .await;
    }

    /// Open the transport, or join the attempt already made.
    ///
    /// Once a handshake has failed, every later call returns the same error.
    pub async fn connect(&self, session_token: Option<&str>) -> Result<(), ClientError> {
        let mut outcome = self.begin_connect(session_token)?;
        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ClientError::Closed)?;
        (*settled).clone().unwrap_or(Err(ClientError::Closed))
    }

    fn begin_connect(
        &self,
        session_token: Option<&str>,
    ) -> Result<watch::Receiver<ConnectOutcome>, ClientError> {
        let inner = self.shared.inner.lock();
        match self.state() {
            ConnectionState::Uninitialized => return Err(ClientError::NoEndpoint),
            ConnectionState::Closed => return Err(ClientError::Closed),
            ConnectionState::Connecting | ConnectionState::Open => {
                return Ok(self.shared.outcome.subscribe());
            }
            ConnectionState::Ready => {}
        }

        let endpoint = inner.endpoint.as_ref().ok_or(ClientError::NoEndpoint)?;
        let url = transport_url(endpoint, self.resource.as_deref(), session_token)?;
        let _ = self.shared.state.send_replace(ConnectionState::Connecting);
        let outcome = self.shared.outcome.subscribe();
        drop(inner);

        debug!(origin = %url.origin().ascii_serialization(), "connecting");
        drop(tokio::spawn(run_transport(
            url,
            Arc::clone(&self.shared),
            Arc::clone(&self.sink),
        )));
        Ok(outcome)
    }

    /// Queue a binary frame for the writer.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), ClientError> {
        let inner = self.shared.inner.lock();
        let state = self.state();
        let Some(tx) = inner.outbound.as_ref().filter(|_| state == ConnectionState::Open) else {
            return Err(ClientError::NotOpen { state });
        };
        tx.send(Outbound::Frame(frame))
            .map_err(|_| ClientError::Transport {
                context: "connection task has stopped".to_string(),
            })
    }

    /// Close an open transport and wait for the close path to finish.
    ///
    /// Returns once [`InboundSink::on_close`] has returned. Closing a
    /// connection that is already closed only waits for that.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut closed = self.shared.closed.subscribe();
        {
            let inner = self.shared.inner.lock();
            match self.state() {
                ConnectionState::Closed => {}
                ConnectionState::Open => {
                    if let Some(tx) = &inner.outbound {
                        let _ = tx.send(Outbound::Close);
                    }
                }
                state => return Err(ClientError::NotOpen { state }),
            }
        }
        let _ = closed.wait_for(|done| *done).await;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.dropped = true;
        if let Some(tx) = inner.outbound.take() {
            let _ = tx.send(Outbound::Close);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Connection task: handshake, frame loop, close path.
async fn run_transport(url: Url, shared: Arc<Shared>, sink: Arc<dyn InboundSink>) {
    let origin = url.origin().ascii_serialization();
    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(%origin, error = %e, "websocket handshake failed");
            let _ = shared.outcome.send_replace(Some(Err(ClientError::Transport {
                context: format!("connect to {origin}: {e}"),
            })));
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let abandoned = {
        let mut inner = shared.inner.lock();
        if !inner.dropped {
            inner.outbound = Some(tx);
            let _ = shared.state.send_replace(ConnectionState::Open);
        }
        inner.dropped
    };
    if abandoned {
        debug!(%origin, "handle dropped during handshake");
        let _ = ws.close(None).await;
        return;
    }
    info!(%origin, "connection open");
    sink.on_open(&url);
    let _ = shared.outcome.send_replace(Some(Ok(())));

    let close = pump(ws, rx, sink.as_ref()).await;

    {
        let mut inner = shared.inner.lock();
        inner.outbound = None;
        let _ = shared.state.send_replace(ConnectionState::Closed);
    }
    info!(%origin, %close, "connection closed");
    sink.on_close(close);
    let _ = shared.closed.send_replace(true);
}

/// Move frames until the socket ends or a close is requested.
async fn pump(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    sink: &dyn InboundSink,
) -> CloseInfo {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let close = loop {
        tokio::select! {
            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                            warn!(error = %e, "websocket send failed");
                            break CloseInfo::new(None, e.to_string());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        break CloseInfo::new(Some(1000), "closed by client");
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => sink.on_frame(&data),
                    Some(Ok(Message::Text(text))) => {
                        debug!(len = text.len(), "ignoring text frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or_else(CloseInfo::default, |f| {
                            CloseInfo::new(Some(u16::from(f.code)), f.reason.as_str())
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive failed");
                        break CloseInfo::new(None, e.to_string());
                    }
                    None => break CloseInfo::default(),
                }
            }
        }
    };

    let _ = ws_tx.close().await;
    close
}
