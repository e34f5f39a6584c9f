//! Receive path: frame → envelope → registry or broadcast.

use std::sync::Arc;

use coms_core::{CodecError, decode};
use coms_settings::PendingPolicy;
use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::connection::InboundSink;
use crate::dispatcher::{BroadcastDispatcher, BroadcastEvent, CloseInfo};
use crate::error::ClientError;
use crate::registry::{Resolution, TransactionRegistry};

/// Routes transport events into the registry and the dispatcher.
pub(crate) struct Router {
    registry: Arc<Mutex<TransactionRegistry>>,
    dispatcher: Arc<BroadcastDispatcher>,
    pending_policy: PendingPolicy,
    max_envelope_bytes: usize,
}

impl Router {
    pub(crate) fn new(
        registry: Arc<Mutex<TransactionRegistry>>,
        dispatcher: Arc<BroadcastDispatcher>,
        pending_policy: PendingPolicy,
        max_envelope_bytes: usize,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            pending_policy,
            max_envelope_bytes,
        }
    }

    fn route(&self, frame: &[u8]) -> Result<(), CodecError> {
        if frame.len() > self.max_envelope_bytes {
            return Err(CodecError::TooLarge {
                size: frame.len(),
                max: self.max_envelope_bytes,
            });
        }
        let envelope = decode(frame)?;
        let (id, status) = (envelope.id, envelope.status);

        // handlers fire after the registry lock is released
        let claim = self.registry.lock().claim(envelope);
        match claim.fire() {
            Resolution::Unmatched(envelope) => {
                debug!(%id, %status, payload_type = %envelope.payload_type, "broadcast");
                let _ = self.dispatcher.publish(&BroadcastEvent::Broadcast(envelope));
            }
            resolved => debug!(%id, %status, ?resolved, "reply routed"),
        }
        Ok(())
    }
}

impl InboundSink for Router {
    fn on_open(&self, url: &Url) {
        let _ = self.dispatcher.publish(&BroadcastEvent::Open {
            url: url.to_string(),
        });
    }

    fn on_frame(&self, frame: &[u8]) {
        if let Err(e) = self.route(frame) {
            warn!(error = %e, len = frame.len(), "dropping malformed envelope");
        }
    }

    fn on_close(&self, info: CloseInfo) {
        match self.pending_policy {
            PendingPolicy::Retain => {
                let pending = self.registry.lock().len();
                if pending > 0 {
                    warn!(pending, "transport closed with transactions pending");
                }
            }
            PendingPolicy::Reject => {
                let records = self.registry.lock().drain();
                if !records.is_empty() {
                    warn!(pending = records.len(), "rejecting pending transactions");
                }
                for record in records {
                    let id = record.id();
                    record.fail(ClientError::TransportClosed { id });
                }
            }
        }
        let _ = self.dispatcher.publish(&BroadcastEvent::Close(info));
    }
}
