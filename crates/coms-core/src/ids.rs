//! Transaction id newtype.
//!
//! Every outbound call is stamped with a [`TransactionId`] so that replies can
//! be correlated by id rather than by arrival position. The value `0` is
//! reserved: an envelope carrying it is never a reply to a call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Id correlating a request envelope with its replies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    /// The reserved id of unsolicited (broadcast) envelopes.
    pub const BROADCAST: Self = Self(0);

    /// First id handed out to a call.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value, as written on the wire.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the reserved broadcast id.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == 0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TransactionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<TransactionId> for u64 {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}
