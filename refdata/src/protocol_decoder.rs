// refdata/src/protocol_decoder.rs
// Decoder for the messages the gateway bridge sends back.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::base::RefDataError;
use crate::event::{Event, EventType, Message};
use crate::protocol_dec_parser::FieldParser;
use crate::request::CorrelationId;

/// Message tags for incoming messages
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum IncomingMessageType {
  SessionStarted = 1,
  SessionStartFailure = 2,
  ServiceOpened = 3,
  ServiceOpenFailure = 4,
  Event = 5,
  SessionTerminated = 6,
}

/// A decoded gateway message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
  SessionStarted { server_version: i32, connection_time: String },
  SessionStartFailure { reason: String },
  ServiceOpened { service: String, operations: Vec<String> },
  ServiceOpenFailure { service: String, reason: String },
  Event(Event),
  SessionTerminated { reason: String },
}

pub fn decode_message(body: &[u8]) -> Result<IncomingMessage, RefDataError> {
  let mut parser = FieldParser::new(body);
  let type_id = parser.read_int()?;
  let msg_type = IncomingMessageType::try_from(type_id)
    .map_err(|_| RefDataError::ParseError(format!("Unknown incoming message type: {}", type_id)))?;

  let msg = match msg_type {
    IncomingMessageType::SessionStarted => IncomingMessage::SessionStarted {
      server_version: parser.read_int()?,
      connection_time: parser.read_string()?,
    },
    IncomingMessageType::SessionStartFailure => IncomingMessage::SessionStartFailure {
      reason: parser.read_string()?,
    },
    IncomingMessageType::ServiceOpened => IncomingMessage::ServiceOpened {
      service: parser.read_string()?,
      operations: parser.read_string_list()?,
    },
    IncomingMessageType::ServiceOpenFailure => IncomingMessage::ServiceOpenFailure {
      service: parser.read_string()?,
      reason: parser.read_string()?,
    },
    IncomingMessageType::Event => IncomingMessage::Event(decode_event(&mut parser)?),
    IncomingMessageType::SessionTerminated => IncomingMessage::SessionTerminated {
      reason: parser.read_string()?,
    },
  };

  if parser.remaining_fields() > 0 {
    log::debug!("Ignoring {} trailing field(s) in {:?} message", parser.remaining_fields(), msg_type);
  }
  Ok(msg)
}

fn decode_event(parser: &mut FieldParser) -> Result<Event, RefDataError> {
  let event_type = EventType::from_code(parser.read_int()?);
  let n_messages = parser.read_count()?;
  let mut messages = Vec::with_capacity(n_messages.min(parser.remaining_fields()));
  for _ in 0..n_messages {
    let message_type = parser.read_string()?;
    let correlation_id = match parser.read_u64()? {
      0 => None,
      id => Some(CorrelationId(id)),
    };
    let text = parser.read_string()?;
    let errors = parser.read_string_list()?;
    messages.push(Message { message_type, correlation_id, text, errors });
  }
  Ok(Event::new(event_type, messages))
}
