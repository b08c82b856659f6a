// refdata/src/lib.rs
// Main entry point for the reference-data client library

//! # refdata
//!
//! Issue a reference-data request against a market-data provider and stream
//! the partial/final response:
//!
//! - `ClientDriver` runs connect → open service → request → poll → stop
//! - `Session` is the narrow interface the driver needs from the provider
//! - `BridgeSession` implements it over a framed TCP bridge to a local gateway
//! - Sessions can be recorded to SQLite and replayed without a gateway

mod base;
mod protocol_encoder;
mod protocol_decoder;
mod protocol_dec_parser;
mod conn_log;
mod conn_mock;
pub mod config;
pub mod request;
pub mod event;
pub mod session;
pub mod conn;
pub mod bridge;
pub mod driver;

pub use base::RefDataError;
pub use bridge::BridgeSession;
pub use config::{QueryConfig, SessionOptions};
pub use conn::SocketConnection;
pub use conn_log::ConnectionLogger;
pub use conn_mock::ReplayConnection;
pub use driver::{ClientDriver, QueryOutcome};
pub use event::{Event, EventType, Message};
pub use request::{CorrelationId, Request, Service};
pub use session::Session;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
