// refdata/src/base.rs
// Error definitions shared by the sessions, the bridge protocol and the driver

use thiserror::Error;

/// Errors that can occur while talking to the reference-data provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefDataError {
  /// The session could not be started.
  #[error("Connection error: {0}")]
  ConnectionError(String),

  /// The named service could not be opened on the session.
  #[error("Service unavailable: {0}")]
  ServiceUnavailable(String),

  #[error("Not connected")]
  NotConnected,

  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Socket error: {0}")]
  SocketError(String),

  #[error("Message parse error: {0}")]
  ParseError(String),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("Logging error: {0}")]
  LoggingError(String),

  #[error("Replay error: {0}")]
  ReplayError(String),

  #[error("Output error: {0}")]
  OutputError(String),

  #[error("Internal error: {0}")]
  InternalError(String),
}

impl RefDataError {
  /// True for the two errors that abandon the workflow before a request is sent.
  pub fn is_startup_error(&self) -> bool {
    matches!(self, RefDataError::ConnectionError(_) | RefDataError::ServiceUnavailable(_))
  }
}
