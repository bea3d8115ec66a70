//! RADIUS Accounting Server Implementation
//!
//! This crate provides a RADIUS accounting server (RFC 2866) built on top of
//! the `radius-proto` protocol implementation.
//!
//! # Features
//!
//! - Async I/O with Tokio, one task per request
//! - Pluggable accounting handlers
//! - Retransmission detection with a local or shared cache
//! - Graceful shutdown that waits for in-flight requests
//! - JSON configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use radius_acct::{handler_fn, AccountingServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = handler_fn(|record| async move {
//!         println!("{:?}", record.attribute("Acct-Session-Id"));
//!         Ok(())
//!     });
//!
//!     let config = ServerConfig::new("0.0.0.0:1813".parse()?, "secret", handler);
//!     let server = AccountingServer::bind(config).await?;
//!
//!     let runner = server.clone();
//!     tokio::spawn(async move { runner.run().await });
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod handler;
pub mod record;
pub mod server;
pub mod stats;

pub use cache::{CacheStats, LocalRetransmissionCache, RetransmissionHandler, RetransmissionKey};
pub use config::{Config, ConfigError};
pub use handler::{handler_fn, AccountingHandler, FnHandler, HandlerError, JsonLinesHandler};
pub use record::{AccountingRecord, TranslatedAttribute};
pub use server::{AccountingServer, Deduplication, ServerConfig, ServerError};
pub use stats::ServerStats;
