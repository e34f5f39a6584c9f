//! Transaction registry: correlates replies with outstanding calls.
//!
//! Every call gets a fresh [`TransactionId`] and a [`TransactionRecord`] that
//! holds its handlers. Inbound envelopes are resolved against the table:
//!
//! | status       | record found                 | no record / id 0 |
//! |--------------|------------------------------|------------------|
//! | `Complete`   | completion fires, removed    | unmatched        |
//! | `Error`      | failure fires, removed       | unmatched        |
//! | `InProgress` | progress fires, kept         | unmatched        |
//!
//! [`TransactionRegistry::claim`] only looks the envelope up and takes what it
//! needs out of the table. The returned [`Claim`] fires the handler, so a
//! caller holding the registry behind a lock can release it first and let
//! handlers call back into the client.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use coms_core::{Envelope, Status, TransactionId};
use parking_lot::Mutex;

use crate::error::ClientError;

type SettleFn = Box<dyn FnOnce(Result<Envelope, ClientError>) + Send>;
type ProgressFn = Arc<Mutex<dyn FnMut(Envelope) + Send>>;

/// Callbacks attached to one transaction.
pub struct Handlers {
    settle: SettleFn,
    progress: ProgressFn,
}

impl Handlers {
    /// Separate completion, failure and progress callbacks.
    pub fn new<C, E, P>(on_complete: C, on_error: E, on_progress: P) -> Self
    where
        C: FnOnce(Envelope) + Send + 'static,
        E: FnOnce(ClientError) + Send + 'static,
        P: FnMut(Envelope) + Send + 'static,
    {
        Self::settle_with(
            move |result| match result {
                Ok(envelope) => on_complete(envelope),
                Err(err) => on_error(err),
            },
            on_progress,
        )
    }

    /// One settle callback for both outcomes, plus a progress callback.
    pub fn settle_with<S, P>(settle: S, on_progress: P) -> Self
    where
        S: FnOnce(Result<Envelope, ClientError>) + Send + 'static,
        P: FnMut(Envelope) + Send + 'static,
    {
        Self {
            settle: Box::new(settle),
            progress: Arc::new(Mutex::new(on_progress)),
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

/// One outstanding call.
#[derive(Debug)]
pub struct TransactionRecord {
    id: TransactionId,
    handlers: Handlers,
    created_at: Instant,
}

impl TransactionRecord {
    /// Id of the transaction.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// When the record was registered.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Settle the call successfully.
    pub fn complete(self, envelope: Envelope) {
        (self.handlers.settle)(Ok(envelope));
    }

    /// Settle the call with an error.
    pub fn fail(self, err: ClientError) {
        (self.handlers.settle)(Err(err));
    }
}

/// An envelope matched against the registry, not yet delivered.
///
/// Produced by [`TransactionRegistry::claim`]; [`Claim::fire`] runs the
/// handler. Terminal claims own the removed record.
pub enum Claim {
    /// Terminal success for a removed record.
    Complete(TransactionRecord, Envelope),
    /// Terminal failure for a removed record.
    Fail(TransactionRecord, ClientError),
    /// Progress for a record that stays pending.
    Progress(TransactionId, ProgressFn, Envelope),
    /// No live call matches.
    Unmatched(Envelope),
}

impl Claim {
    /// Run the matched handler, if any.
    pub fn fire(self) -> Resolution {
        match self {
            Self::Complete(record, envelope) => {
                let id = record.id();
                record.complete(envelope);
                Resolution::Completed(id)
            }
            Self::Fail(record, err) => {
                let id = record.id();
                record.fail(err);
                Resolution::Failed(id)
            }
            Self::Progress(id, progress, envelope) => {
                let mut on_progress = progress.lock();
                (&mut *on_progress)(envelope);
                Resolution::Progressed(id)
            }
            Self::Unmatched(envelope) => Resolution::Unmatched(envelope),
        }
    }
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(record, _) => f.debug_tuple("Complete").field(&record.id()).finish(),
            Self::Fail(record, err) => f.debug_tuple("Fail").field(&record.id()).field(err).finish(),
            Self::Progress(id, _, _) => f.debug_tuple("Progress").field(id).finish(),
            Self::Unmatched(envelope) => f.debug_tuple("Unmatched").field(&envelope.id).finish(),
        }
    }
}

/// What [`TransactionRegistry::resolve`] did with an envelope.
#[derive(Debug, PartialEq)]
pub enum Resolution {
    /// A pending call completed and was removed.
    Completed(TransactionId),
    /// A pending call failed and was removed.
    Failed(TransactionId),
    /// A pending call reported progress and stays pending.
    Progressed(TransactionId),
    /// No live call matches; the envelope is handed back for broadcast.
    Unmatched(Envelope),
}

/// Table of outstanding transactions.
#[derive(Debug)]
pub struct TransactionRegistry {
    next_id: TransactionId,
    records: HashMap<TransactionId, TransactionRecord>,
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionRegistry {
    /// Empty registry; the first id handed out is 1.
    pub fn new() -> Self {
        Self {
            next_id: TransactionId::FIRST,
            records: HashMap::new(),
        }
    }

    /// Take the next id without creating a record.
    ///
    /// Used for fire-and-forget sends, which share the id sequence with calls.
    pub fn allocate(&mut self) -> TransactionId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    /// Allocate an id and store a record for it.
    pub fn register(&mut self, handlers: Handlers) -> TransactionId {
        let id = self.allocate();
        let _ = self.records.insert(
            id,
            TransactionRecord {
                id,
                handlers,
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Match an inbound envelope to its call without running any handler.
    pub fn claim(&mut self, envelope: Envelope) -> Claim {
        if envelope.is_broadcast() {
            return Claim::Unmatched(envelope);
        }
        let id = envelope.id;
        match envelope.status {
            Status::InProgress => match self.records.get(&id) {
                Some(record) => Claim::Progress(id, Arc::clone(&record.handlers.progress), envelope),
                None => Claim::Unmatched(envelope),
            },
            Status::Complete => match self.records.remove(&id) {
                Some(record) => Claim::Complete(record, envelope),
                None => Claim::Unmatched(envelope),
            },
            Status::Error => match self.records.remove(&id) {
                Some(record) => {
                    let info = envelope.error.unwrap_or_default();
                    Claim::Fail(record, ClientError::Transaction(info))
                }
                None => Claim::Unmatched(envelope),
            },
        }
    }

    /// Route an inbound envelope to its call and fire the handler inline.
    pub fn resolve(&mut self, envelope: Envelope) -> Resolution {
        self.claim(envelope).fire()
    }

    /// Remove a record without firing anything.
    pub fn withdraw(&mut self, id: TransactionId) -> Option<TransactionRecord> {
        self.records.remove(&id)
    }

    /// Remove every record, oldest first.
    pub fn drain(&mut self) -> Vec<TransactionRecord> {
        let mut records: Vec<_> = self.records.drain().map(|(_, r)| r).collect();
        records.sort_by_key(TransactionRecord::id);
        records
    }

    /// Ids of pending transactions, ascending.
    pub fn pending(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether `id` is still awaiting a terminal reply.
    pub fn is_pending(&self, id: TransactionId) -> bool {
        self.records.contains_key(&id)
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
