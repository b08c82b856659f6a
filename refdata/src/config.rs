// refdata/src/config.rs
// Static connection parameters and the query to submit.

use crate::base::RefDataError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8194;
pub const REFDATA_SERVICE: &str = "//blp/refdata";
pub const REFERENCE_DATA_REQUEST: &str = "ReferenceDataRequest";

/// Where to find the gateway. Read once at startup, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
  pub server_host: String,
  pub server_port: u16,
}

impl Default for SessionOptions {
  fn default() -> Self {
    SessionOptions {
      server_host: DEFAULT_HOST.to_string(),
      server_port: DEFAULT_PORT,
    }
  }
}

impl SessionOptions {
  pub fn new(server_host: &str, server_port: u16) -> Self {
    SessionOptions { server_host: server_host.to_string(), server_port }
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.server_host, self.server_port)
  }

  pub fn validate(&self) -> Result<(), RefDataError> {
    if self.server_host.trim().is_empty() {
      return Err(RefDataError::ConfigurationError("Server host is empty".to_string()));
    }
    if self.server_port == 0 {
      return Err(RefDataError::ConfigurationError("Server port must be non-zero".to_string()));
    }
    Ok(())
  }
}

/// What to ask for: one service, one operation, the securities and fields to populate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
  pub service: String,
  pub operation: String,
  pub securities: Vec<String>,
  pub fields: Vec<String>,
}

impl Default for QueryConfig {
  fn default() -> Self {
    QueryConfig {
      service: REFDATA_SERVICE.to_string(),
      operation: REFERENCE_DATA_REQUEST.to_string(),
      securities: vec!["AAPL US Equity".to_string()],
      fields: vec!["PX_LAST".to_string()],
    }
  }
}

impl QueryConfig {
  /// Single security, single field query against the reference-data service.
  pub fn single(security: &str, field: &str) -> Self {
    QueryConfig {
      securities: vec![security.to_string()],
      fields: vec![field.to_string()],
      ..Default::default()
    }
  }
}
