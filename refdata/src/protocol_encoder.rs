// refdata/src/protocol_encoder.rs
// Encoder for the messages the client sends to the gateway bridge.

use log::trace;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::base::RefDataError;
use crate::request::{CorrelationId, Request};

/// Bridge protocol version announced in StartSession.
pub const CLIENT_VERSION: i32 = 1;

/// Message tags for outgoing messages
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum OutgoingMessageType {
  StartSession = 1,
  OpenService = 2,
  SendRequest = 3,
  StopSession = 4,
}

impl OutgoingMessageType {
  pub fn name(&self) -> &'static str {
    match self {
      OutgoingMessageType::StartSession => "START_SESSION",
      OutgoingMessageType::OpenService => "OPEN_SERVICE",
      OutgoingMessageType::SendRequest => "SEND_REQUEST",
      OutgoingMessageType::StopSession => "STOP_SESSION",
    }
  }
}

/// Names an outgoing body by its leading type id, for logs.
pub fn identify_outgoing_type(msg_data: &[u8]) -> Option<&'static str> {
  let end_pos = msg_data.iter().position(|&b| b == 0)?;
  let id = std::str::from_utf8(&msg_data[..end_pos]).ok()?.parse::<i32>().ok()?;
  OutgoingMessageType::try_from(id).ok().map(|t| t.name())
}

/// Builds outgoing message bodies (framing is added by the connection).
#[derive(Debug, Default)]
pub struct Encoder {
  buffer: Vec<u8>,
}

impl Encoder {
  pub fn new() -> Self { Encoder { buffer: Vec::with_capacity(128) } }

  fn start(&mut self, msg_type: OutgoingMessageType) {
    self.buffer.clear();
    self.write_int(msg_type.into());
  }

  fn finish(&mut self) -> Vec<u8> {
    trace!("Encoded {} bytes: {:?}", self.buffer.len(), String::from_utf8_lossy(&self.buffer));
    std::mem::take(&mut self.buffer)
  }

  /// Fields are NUL-terminated, so they must not contain NUL themselves.
  fn write_str(&mut self, s: &str) -> Result<(), RefDataError> {
    if s.as_bytes().contains(&0) {
      return Err(RefDataError::InvalidParameter(format!("Field contains a NUL byte: {:?}", s)));
    }
    self.buffer.extend_from_slice(s.as_bytes());
    self.buffer.push(0);
    Ok(())
  }

  fn write_int(&mut self, v: i32) {
    self.buffer.extend_from_slice(v.to_string().as_bytes());
    self.buffer.push(0);
  }

  fn write_list(&mut self, items: &[String]) -> Result<(), RefDataError> {
    let len = i32::try_from(items.len())
      .map_err(|_| RefDataError::InvalidParameter(format!("Too many list entries: {}", items.len())))?;
    self.write_int(len);
    for item in items {
      self.write_str(item)?;
    }
    Ok(())
  }

  pub fn encode_start_session(&mut self, client_version: i32) -> Vec<u8> {
    self.start(OutgoingMessageType::StartSession);
    self.write_int(client_version);
    self.finish()
  }

  pub fn encode_open_service(&mut self, service: &str) -> Result<Vec<u8>, RefDataError> {
    self.start(OutgoingMessageType::OpenService);
    self.write_str(service)?;
    Ok(self.finish())
  }

  pub fn encode_send_request(&mut self, request: &Request, correlation_id: CorrelationId) -> Result<Vec<u8>, RefDataError> {
    self.start(OutgoingMessageType::SendRequest);
    self.write_str(&correlation_id.value().to_string())?;
    self.write_str(request.service())?;
    self.write_str(request.operation())?;
    self.write_list(request.securities())?;
    self.write_list(request.fields())?;
    Ok(self.finish())
  }

  pub fn encode_stop_session(&mut self) -> Vec<u8> {
    self.start(OutgoingMessageType::StopSession);
    self.finish()
  }
}
