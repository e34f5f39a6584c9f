//! # coms-client
//!
//! Multiplexed request/response over a single websocket.
//!
//! Many logical calls share one transport. Each call is stamped with a
//! [`TransactionId`]; the server echoes it on zero or more `IN_PROGRESS`
//! replies and one terminal `COMPLETE` or `ERROR` reply. Anything that does
//! not match a live call (id 0, unknown ids, replies to
//! [`Client::send_no_wait`]) is published as a `broadcast` event.
//!
//! ```no_run
//! # async fn demo() -> Result<(), coms_client::ClientError> {
//! use coms_client::{Client, ClientConfig, Envelope};
//!
//! let client = Client::new(ClientConfig::default());
//! client.set_endpoint("http://127.0.0.1:1337/")?;
//! client.connect(Some("session-token")).await?;
//! let reply = client
//!     .send(Envelope::request("AnalysisRequest", &b"..."[..]), |p| {
//!         println!("progress: {} bytes", p.payload.len());
//!     })
//!     .await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
mod router;

pub use client::{Call, CallEvent, Client};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState, InboundSink, transport_url};
pub use dispatcher::{BroadcastDispatcher, BroadcastEvent, CloseInfo, EventHandler, EventKind, handler};
pub use error::ClientError;
pub use registry::{Claim, Handlers, Resolution, TransactionRecord, TransactionRegistry};

pub use coms_core::{Envelope, ErrorInfo, Status, TransactionId};
pub use coms_settings::PendingPolicy;
