// refdata/src/request.rs
// Services and the request objects built from them.

use std::fmt;
use crate::base::RefDataError;

/// Opaque tag attached to a submitted request and echoed on its response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
  pub fn value(&self) -> u64 { self.0 }
}

impl fmt::Display for CorrelationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A named endpoint opened on a session, along with the operations it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
  name: String,
  operations: Vec<String>,
}

impl Service {
  pub fn new(name: &str, operations: Vec<String>) -> Self {
    Service { name: name.to_string(), operations }
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn has_operation(&self, operation: &str) -> bool {
    self.operations.iter().any(|op| op == operation)
  }

  /// Create an empty request for one of this service's operations.
  pub fn create_request(&self, operation: &str) -> Result<Request, RefDataError> {
    if !self.has_operation(operation) {
      return Err(RefDataError::InvalidRequest(format!(
        "Service {} has no operation '{}' (available: {})",
        self.name, operation, self.operations.join(", ")
      )));
    }
    Ok(Request {
      service: self.name.clone(),
      operation: operation.to_string(),
      securities: Vec::new(),
      fields: Vec::new(),
    })
  }
}

/// A reference-data request: the securities and fields to look up.
///
/// Only emptiness is checked here. Whether a security actually exists is for
/// the provider to say, in the response content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  service: String,
  operation: String,
  securities: Vec<String>,
  fields: Vec<String>,
}

impl Request {
  pub fn service(&self) -> &str { &self.service }
  pub fn operation(&self) -> &str { &self.operation }
  pub fn securities(&self) -> &[String] { &self.securities }
  pub fn fields(&self) -> &[String] { &self.fields }

  pub fn append_security(&mut self, security: &str) -> Result<&mut Self, RefDataError> {
    if security.trim().is_empty() {
      return Err(RefDataError::InvalidParameter("Security identifier is empty".to_string()));
    }
    self.securities.push(security.to_string());
    Ok(self)
  }

  pub fn append_field(&mut self, field: &str) -> Result<&mut Self, RefDataError> {
    if field.trim().is_empty() {
      return Err(RefDataError::InvalidParameter("Field name is empty".to_string()));
    }
    self.fields.push(field.to_string());
    Ok(self)
  }

  /// Checks the request is ready to be sent.
  pub fn validate(&self) -> Result<(), RefDataError> {
    if self.securities.is_empty() {
      return Err(RefDataError::InvalidRequest("Request has no securities".to_string()));
    }
    if self.fields.is_empty() {
      return Err(RefDataError::InvalidRequest("Request has no fields".to_string()));
    }
    Ok(())
  }
}

const INDENT: &str = "    ";

impl fmt::Display for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{} = {{", self.operation)?;
    writeln!(f, "{}securities[] = {{", INDENT)?;
    for security in &self.securities {
      writeln!(f, "{0}{0}\"{1}\"", INDENT, security)?;
    }
    writeln!(f, "{}}}", INDENT)?;
    writeln!(f, "{}fields[] = {{", INDENT)?;
    for field in &self.fields {
      writeln!(f, "{0}{0}{1}", INDENT, field)?;
    }
    writeln!(f, "{}}}", INDENT)?;
    write!(f, "}}")
  }
}
