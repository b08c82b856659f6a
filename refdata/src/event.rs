// refdata/src/event.rs
// Events yielded by a session poll and the messages they carry.

use std::fmt;
use crate::request::CorrelationId;

/// Tag of an event returned by `Session::next_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
  SessionStatus,
  ServiceStatus,
  RequestStatus,
  /// A chunk of the answer; more will follow.
  PartialResponse,
  /// The last chunk of the answer.
  Response,
  Admin,
  Unknown(i32),
}

impl EventType {
  pub fn from_code(code: i32) -> Self {
    match code {
      1 => EventType::SessionStatus,
      2 => EventType::ServiceStatus,
      3 => EventType::RequestStatus,
      4 => EventType::PartialResponse,
      5 => EventType::Response,
      6 => EventType::Admin,
      other => EventType::Unknown(other),
    }
  }

  pub fn code(&self) -> i32 {
    match self {
      EventType::SessionStatus => 1,
      EventType::ServiceStatus => 2,
      EventType::RequestStatus => 3,
      EventType::PartialResponse => 4,
      EventType::Response => 5,
      EventType::Admin => 6,
      EventType::Unknown(code) => *code,
    }
  }

  /// Partial and final responses carry answer content; everything else is housekeeping.
  pub fn is_response(&self) -> bool {
    matches!(self, EventType::PartialResponse | EventType::Response)
  }

  pub fn is_final(&self) -> bool {
    matches!(self, EventType::Response)
  }
}

impl fmt::Display for EventType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EventType::SessionStatus => write!(f, "SESSION_STATUS"),
      EventType::ServiceStatus => write!(f, "SERVICE_STATUS"),
      EventType::RequestStatus => write!(f, "REQUEST_STATUS"),
      EventType::PartialResponse => write!(f, "PARTIAL_RESPONSE"),
      EventType::Response => write!(f, "RESPONSE"),
      EventType::Admin => write!(f, "ADMIN"),
      EventType::Unknown(code) => write!(f, "UNKNOWN({})", code),
    }
  }
}

/// One message inside an event. The text is rendered as-is, never parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub message_type: String,
  pub correlation_id: Option<CorrelationId>,
  pub text: String,
  /// Error indications attached by the provider (e.g. unknown security).
  pub errors: Vec<String>,
}

impl Message {
  pub fn new(message_type: &str, text: &str) -> Self {
    Message {
      message_type: message_type.to_string(),
      correlation_id: None,
      text: text.to_string(),
      errors: Vec::new(),
    }
  }

  pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
    self.correlation_id = Some(id);
    self
  }

  pub fn with_error(mut self, error: &str) -> Self {
    self.errors.push(error.to_string());
    self
  }

  pub fn is_error(&self) -> bool { !self.errors.is_empty() }
}

impl fmt::Display for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
  pub event_type: EventType,
  pub messages: Vec<Message>,
}

impl Event {
  pub fn new(event_type: EventType, messages: Vec<Message>) -> Self {
    Event { event_type, messages }
  }

  pub fn partial(messages: Vec<Message>) -> Self { Event::new(EventType::PartialResponse, messages) }

  pub fn response(messages: Vec<Message>) -> Self { Event::new(EventType::Response, messages) }
}

impl<'a> IntoIterator for &'a Event {
  type Item = &'a Message;
  type IntoIter = std::slice::Iter<'a, Message>;

  fn into_iter(self) -> Self::IntoIter { self.messages.iter() }
}
