//! Event fan-out to subscribed handlers.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;

use coms_core::Envelope;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Event names subscribers can listen on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An inbound envelope not correlated to a live call.
    Broadcast,
    /// The transport opened.
    Open,
    /// The transport closed.
    Close,
}

impl EventKind {
    /// Wire-facing event name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broadcast" => Ok(Self::Broadcast),
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            other => Err(format!("unknown event '{other}'")),
        }
    }
}

/// Why the transport closed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code from the peer's close frame, if one was received.
    pub code: Option<u16>,
    /// Close reason, or a description of the transport failure.
    pub reason: String,
}

impl CloseInfo {
    /// Close info with a code and reason.
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) if self.reason.is_empty() => write!(f, "{code}"),
            Some(code) => write!(f, "{code} {}", self.reason),
            None if self.reason.is_empty() => f.write_str("no close frame"),
            None => f.write_str(&self.reason),
        }
    }
}

/// An event delivered to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum BroadcastEvent {
    /// Uncorrelated inbound envelope.
    Broadcast(Envelope),
    /// The transport opened on `url`.
    Open {
        /// The transport URL that was connected.
        url: String,
    },
    /// The transport closed.
    Close(CloseInfo),
}

impl BroadcastEvent {
    /// The kind this event is published under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Broadcast(_) => EventKind::Broadcast,
            Self::Open { .. } => EventKind::Open,
            Self::Close(_) => EventKind::Close,
        }
    }

    /// The envelope, for `Broadcast` events.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Broadcast(envelope) => Some(envelope),
            _ => None,
        }
    }
}

/// A subscriber callback. Identity (for unsubscribe) is the `Arc` pointer.
pub type EventHandler = Arc<dyn Fn(&BroadcastEvent) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`].
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&BroadcastEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Publish/subscribe registry keyed by [`EventKind`].
#[derive(Default)]
pub struct BroadcastDispatcher {
    subscriptions: RwLock<Vec<(EventKind, EventHandler)>>,
}

impl BroadcastDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`. The same handler may be added twice.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        self.subscriptions.write().push((kind, handler));
    }

    /// Remove every subscription of `handler` under `kind`.
    ///
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|(k, h)| !(*k == kind && Arc::ptr_eq(h, handler)));
        subs.len() != before
    }

    /// Number of handlers subscribed to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Invoke every handler for the event's kind, in subscription order.
    ///
    /// Handlers run without the subscription lock held, so they may subscribe
    /// or unsubscribe; such changes take effect on the next publish. A
    /// panicking handler is logged and the rest still run. Returns the number
    /// of handlers invoked.
    pub fn publish(&self, event: &BroadcastEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| Arc::clone(h))
            .collect();

        debug!(event = %kind, recipients = handlers.len(), "publish event");
        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = %kind, "event handler panicked");
            }
        }
        handlers.len()
    }
}

impl fmt::Debug for BroadcastDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastDispatcher")
            .field("subscriptions", &self.subscriptions.read().len())
            .finish()
    }
}
