//! # coms-core
//!
//! Foundation types for the coms transport.
//!
//! This crate provides the vocabulary shared by the client and the CLI:
//!
//! - **Transaction ids**: [`TransactionId`], with `0` reserved for broadcasts
//! - **Envelope**: [`Envelope`], [`Status`] and [`ErrorInfo`], the wire unit
//! - **Codec**: [`codec::encode`] / [`codec::decode`], one envelope per frame
//! - **Errors**: [`CodecError`], every way a frame can fail to parse
//! - **Logging**: `tracing` subscriber bootstrap and log capture for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use codec::{decode, encode};
pub use envelope::{Envelope, ErrorInfo, Status};
pub use errors::CodecError;
pub use ids::TransactionId;
