//! The envelope: one message on the wire.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::TransactionId;

/// Status of an envelope.
///
/// Numeric values are the wire representation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Status {
    /// Terminal success (or a plain request on the outbound side).
    #[default]
    Complete = 0,
    /// Intermediate progress; more envelopes for the same id follow.
    InProgress = 1,
    /// Terminal failure; the envelope carries an [`ErrorInfo`].
    Error = 2,
}

impl Status {
    /// Wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Complete),
            1 => Some(Self::InProgress),
            2 => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether this status ends a transaction.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "COMPLETE"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Cause attached to an error reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short human-readable message.
    pub message: String,
    /// Underlying cause, if the server supplied one.
    pub cause: String,
}

impl ErrorInfo {
    /// Create an error cause.
    pub fn new(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: cause.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cause.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.message, self.cause)
        }
    }
}

/// A single message exchanged over the transport.
///
/// `payload` is opaque to this layer; `payload_type` names its schema so the
/// application can decode it. `error` is only meaningful when
/// `status == Status::Error`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation id; [`TransactionId::BROADCAST`] for unsolicited messages.
    pub id: TransactionId,
    /// Progress / completion / failure.
    pub status: Status,
    /// Server instance the message belongs to (empty when unused).
    pub instance_id: String,
    /// Name of the payload schema.
    pub payload_type: String,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Error cause, present on error replies.
    pub error: Option<ErrorInfo>,
}

impl Envelope {
    /// Build an outbound request. The id is assigned when it is sent.
    pub fn request(payload_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            payload_type: payload_type.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Build a completion reply for `id`.
    pub fn complete(id: TransactionId, payload_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            status: Status::Complete,
            payload_type: payload_type.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Build a progress reply for `id`.
    pub fn progress(id: TransactionId, payload_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            status: Status::InProgress,
            payload_type: payload_type.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Build an error reply for `id`.
    pub fn failure(id: TransactionId, error: ErrorInfo) -> Self {
        Self {
            id,
            status: Status::Error,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Build an unsolicited message (id `0`).
    pub fn broadcast(payload_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::complete(TransactionId::BROADCAST, payload_type, payload)
    }

    /// Set the instance id.
    #[must_use]
    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Copy of this envelope stamped with `id`.
    #[must_use]
    pub fn with_id(mut self, id: TransactionId) -> Self {
        self.id = id;
        self
    }

    /// Whether this envelope is unsolicited.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.id.is_broadcast()
    }
}
