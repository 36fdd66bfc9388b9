//! Async client for the tuple-store wire protocol.
//!
//! A single spawned driver task owns the socket, the frame reassembly
//! buffer, and the request correlation table; [`Client`] handles are
//! cheap clones of a sender into that task. Concurrent requests share
//! one connection and are matched to their responses by request id.
//!
//! ## Features
//!
//! - **Single-Connection Multiplexing**: any number of in-flight
//!   requests over one socket, correlated by request id
//! - **Authentication**: chap-sha1 handshake when credentials are set
//! - **Reconnection**: pluggable retry strategy with multi-host
//!   failover and ordered replay of requests issued while offline
//! - **Symbolic Names**: space and index names resolved through the
//!   system spaces and cached until the schema version changes
//! - **Lifecycle Events**: connected/error/closed notifications over a
//!   broadcast channel
//!
//! ## Example
//!
//! ```no_run
//! use tnt_client::{Client, Config, IteratorType, Value};
//!
//! # async fn run() -> Result<(), tnt_client::DriverError> {
//! let mut config = Config::from_addr("notguest:sesame@db.example.com:3301")?;
//! config.reserve_hosts = vec!["standby.example.com:3301".to_string()];
//! let client = Client::new(config)?;
//! client.connect().await?;
//!
//! let rows = client
//!     .select("users", "primary", 1, 0, IteratorType::Eq, Value::from(42))
//!     .await?;
//! println!("{rows}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
mod commands;
mod config;
mod connection;
mod correlation;
mod endpoint;
mod error;
mod reconnect;
mod schema;

pub use client::{Client, Event};
pub use commands::{IndexRef, SpaceRef};
pub use config::{Config, RetryStrategy, DEFAULT_BEFORE_RESERVE, DEFAULT_PORT};
pub use endpoint::{Endpoint, DEFAULT_HOST};
pub use error::DriverError;
pub use schema::{SchemaCache, SpaceMeta};

pub use rmpv::Value;
pub use tnt_wire::IteratorType;
