//! Client facade: calls, fire-and-forget sends, and event subscriptions over
//! one shared [`Connection`].

use std::sync::Arc;

use coms_core::{CodecError, Envelope, TransactionId, encode};
use coms_settings::ComsSettings;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::{BroadcastDispatcher, EventHandler, EventKind};
use crate::error::ClientError;
use crate::registry::{Handlers, TransactionRegistry};
use crate::router::Router;

type Outcome = Result<Envelope, ClientError>;

/// One step of a call's lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CallEvent {
    /// Intermediate `IN_PROGRESS` reply.
    Progress(Envelope),
    /// Terminal `COMPLETE` reply.
    Complete(Envelope),
    /// Error reply, or the call could not settle.
    Failed(ClientError),
}

/// An in-flight call: zero or more progress events, then one outcome.
#[derive(Debug)]
pub struct Call {
    id: TransactionId,
    progress: mpsc::UnboundedReceiver<Envelope>,
    progress_done: bool,
    outcome: Option<oneshot::Receiver<Outcome>>,
}

impl Call {
    /// The transaction id stamped on the request.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Next event, or `None` once the outcome has been returned.
    ///
    /// Progress events always come before the outcome.
    pub async fn recv(&mut self) -> Option<CallEvent> {
        if !self.progress_done {
            // the progress sender lives in the registry record, which is
            // dropped when the call settles
            if let Some(envelope) = self.progress.recv().await {
                return Some(CallEvent::Progress(envelope));
            }
            self.progress_done = true;
        }
        let outcome = self.outcome.take()?;
        Some(match outcome.await {
            Ok(Ok(envelope)) => CallEvent::Complete(envelope),
            Ok(Err(err)) => CallEvent::Failed(err),
            Err(_) => CallEvent::Failed(ClientError::Abandoned),
        })
    }

    /// Skip progress and wait for the outcome.
    pub async fn outcome(mut self) -> Result<Envelope, ClientError> {
        let outcome = self.outcome.take().ok_or(ClientError::Abandoned)?;
        outcome.await.unwrap_or(Err(ClientError::Abandoned))
    }
}

struct ClientInner {
    connection: Connection,
    registry: Arc<Mutex<TransactionRegistry>>,
    dispatcher: Arc<BroadcastDispatcher>,
    config: ClientConfig,
}

/// Multiplexed request/response client. Cheap to clone; clones share the
/// transport, the transaction table and the subscriptions.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// New client with no endpoint.
    pub fn new(config: ClientConfig) -> Self {
        let registry = Arc::new(Mutex::new(TransactionRegistry::new()));
        let dispatcher = Arc::new(BroadcastDispatcher::new());
        let router = Router::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            config.pending_on_close,
            config.max_envelope_bytes,
        );
        let connection = Connection::new(Arc::new(router), config.resource.clone());
        Self {
            inner: Arc::new(ClientInner {
                connection,
                registry,
                dispatcher,
                config,
            }),
        }
    }

    /// Client configured from settings; the endpoint is set when present.
    pub fn from_settings(settings: &ComsSettings) -> Result<Self, ClientError> {
        let client = Self::new(ClientConfig::from(settings));
        if let Some(endpoint) = &settings.endpoint {
            client.set_endpoint(endpoint)?;
        }
        Ok(client)
    }

    /// The options this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// See [`Connection::set_endpoint`].
    pub fn set_endpoint(&self, endpoint: &str) -> Result<(), ClientError> {
        self.inner.connection.set_endpoint(endpoint)
    }

    /// Wait until an endpoint is known.
    pub async fn ready(&self) {
        self.inner.connection.ready().await;
    }

    /// See [`Connection::connect`].
    pub async fn connect(&self, session_token: Option<&str>) -> Result<(), ClientError> {
        self.inner.connection.connect(session_token).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Close the transport and wait for `close` subscribers to run.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.inner.connection.close().await
    }

    /// Send a request and track its replies.
    ///
    /// The request's id is replaced with a fresh transaction id. The record is
    /// registered before the frame is queued, so no reply can beat it.
    pub fn call(&self, request: Envelope) -> Result<Call, ClientError> {
        self.ensure_open()?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let handlers = Handlers::settle_with(
            move |outcome| {
                let _ = outcome_tx.send(outcome);
            },
            move |envelope| {
                let _ = progress_tx.send(envelope);
            },
        );
        let id = self.inner.registry.lock().register(handlers);

        let request = request.with_id(id);
        if let Err(e) = self.transmit(&request) {
            let _ = self.inner.registry.lock().withdraw(id);
            return Err(e);
        }
        debug!(%id, payload_type = %request.payload_type, "call sent");

        Ok(Call {
            id,
            progress: progress_rx,
            progress_done: false,
            outcome: Some(outcome_rx),
        })
    }

    /// Send a request and wait for its outcome, reporting progress to
    /// `on_progress`.
    pub async fn send<F>(&self, request: Envelope, mut on_progress: F) -> Result<Envelope, ClientError>
    where
        F: FnMut(&Envelope),
    {
        let mut call = self.call(request)?;
        while let Some(event) = call.recv().await {
            match event {
                CallEvent::Progress(envelope) => on_progress(&envelope),
                CallEvent::Complete(envelope) => return Ok(envelope),
                CallEvent::Failed(err) => return Err(err),
            }
        }
        Err(ClientError::Abandoned)
    }

    /// Send a request without tracking it. Any reply arrives as a broadcast.
    pub fn send_no_wait(&self, request: Envelope) -> Result<TransactionId, ClientError> {
        self.ensure_open()?;
        let id = self.inner.registry.lock().allocate();
        let request = request.with_id(id);
        self.transmit(&request)?;
        debug!(%id, payload_type = %request.payload_type, "sent without reply tracking");
        Ok(id)
    }

    /// Add an event handler.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        self.inner.dispatcher.subscribe(kind, handler);
    }

    /// Remove an event handler; `false` if it was not subscribed.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) -> bool {
        self.inner.dispatcher.unsubscribe(kind, handler)
    }

    /// Ids of calls still awaiting a terminal reply.
    pub fn pending(&self) -> Vec<TransactionId> {
        self.inner.registry.lock().pending()
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(ClientError::Closed),
            state => Err(ClientError::NotOpen { state }),
        }
    }

    fn transmit(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let frame = encode(envelope)?;
        let max = self.inner.config.max_envelope_bytes;
        if frame.len() > max {
            return Err(CodecError::TooLarge {
                size: frame.len(),
                max,
            }
            .into());
        }
        self.inner.connection.send_frame(frame)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("pending", &self.inner.registry.lock().len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
