//! Client error types.

use coms_core::{CodecError, ErrorInfo, TransactionId};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors surfaced by the client.
///
/// `Clone` because one connect outcome is shared by every caller awaiting it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClientError {
    /// `connect` was called before any endpoint was set.
    #[error("no endpoint set")]
    NoEndpoint,

    /// The endpoint could not be parsed or mapped to a websocket URL.
    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// The endpoint as given.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The websocket handshake or a send failed.
    #[error("transport error: {context}")]
    Transport {
        /// What went wrong.
        context: String,
    },

    /// An operation that needs an open transport ran in another state.
    #[error("connection is not open (state: {state})")]
    NotOpen {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// The transport has closed; this client cannot connect again.
    #[error("connection is closed")]
    Closed,

    /// The transport closed while the transaction was pending.
    #[error("transport closed with transaction {id} pending")]
    TransportClosed {
        /// The transaction that will never be answered.
        id: TransactionId,
    },

    /// The server answered the transaction with an error.
    #[error("transaction failed: {0}")]
    Transaction(ErrorInfo),

    /// An envelope could not be encoded or decoded.
    #[error("malformed envelope: {0}")]
    Codec(#[from] CodecError),

    /// The client went away before the transaction settled.
    #[error("transaction abandoned before it settled")]
    Abandoned,
}

impl ClientError {
    /// The server-supplied cause, if this is a transaction error.
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Transaction(info) => Some(info),
            _ => None,
        }
    }
}
