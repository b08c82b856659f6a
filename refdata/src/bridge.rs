// refdata/src/bridge.rs
// Session implementation speaking the gateway bridge protocol over a Connection.

use std::collections::{HashMap, VecDeque};
use log::{debug, info, warn};

use crate::base::RefDataError;
use crate::conn::Connection;
use crate::conn_log::{ConnectionLogger, LogDirection};
use crate::event::{Event, EventType, Message};
use crate::protocol_decoder::{decode_message, IncomingMessage};
use crate::protocol_encoder::{Encoder, CLIENT_VERSION};
use crate::request::{CorrelationId, Request, Service};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
  Idle,
  Started,
  Stopped,
}

/// A `Session` backed by the bridge protocol.
///
/// Events that arrive while `start` or `open_service` wait for their reply
/// are queued and handed out first by `next_event`.
pub struct BridgeSession<C: Connection> {
  conn: C,
  logger: Option<ConnectionLogger>,
  encoder: Encoder,
  state: SessionState,
  server_version: Option<i32>,
  services: HashMap<String, Service>,
  pending: VecDeque<Event>,
}

fn into_connection_error(e: RefDataError) -> RefDataError {
  match e {
    RefDataError::ConnectionError(_) => e,
    other => RefDataError::ConnectionError(other.to_string()),
  }
}

fn into_service_error(name: &str, e: RefDataError) -> RefDataError {
  match e {
    RefDataError::ServiceUnavailable(_) => e,
    other => RefDataError::ServiceUnavailable(format!("{}: {}", name, other)),
  }
}

impl<C: Connection> BridgeSession<C> {
  pub fn new(conn: C) -> Self {
    BridgeSession {
      conn,
      logger: None,
      encoder: Encoder::new(),
      state: SessionState::Idle,
      server_version: None,
      services: HashMap::new(),
      pending: VecDeque::new(),
    }
  }

  /// Record every frame of this session.
  pub fn with_logger(mut self, logger: ConnectionLogger) -> Self {
    self.logger = Some(logger);
    self
  }

  pub fn server_version(&self) -> Option<i32> { self.server_version }

  pub fn is_started(&self) -> bool { self.state == SessionState::Started }

  pub fn connection(&self) -> &C { &self.conn }

  fn send(&mut self, body: &[u8]) -> Result<(), RefDataError> {
    if let Some(logger) = &self.logger {
      logger.log_message(LogDirection::Send, body);
    }
    self.conn.write_frame(body)
  }

  fn recv(&mut self) -> Result<IncomingMessage, RefDataError> {
    let body = self.conn.read_frame()?;
    if let Some(logger) = &self.logger {
      logger.log_message(LogDirection::Recv, &body);
    }
    decode_message(&body)
  }

  fn require_started(&self) -> Result<(), RefDataError> {
    match self.state {
      SessionState::Started => Ok(()),
      _ => Err(RefDataError::NotConnected),
    }
  }

  fn terminated(&mut self, reason: &str) -> Event {
    warn!("Gateway terminated the session: {}", reason);
    self.state = SessionState::Stopped;
    if let Err(e) = self.conn.close() {
      warn!("Error closing connection after termination: {}", e);
    }
    Event::new(EventType::SessionStatus, vec![Message::new("SessionTerminated", reason)])
  }

  fn handshake(&mut self) -> Result<(), RefDataError> {
    self.conn.open()?;
    let body = self.encoder.encode_start_session(CLIENT_VERSION);
    self.send(&body)?;

    loop {
      match self.recv()? {
        IncomingMessage::SessionStarted { server_version, connection_time } => {
          info!("Session started (server version {}, connection time '{}')", server_version, connection_time);
          self.server_version = Some(server_version);
          self.state = SessionState::Started;
          return Ok(());
        }
        IncomingMessage::SessionStartFailure { reason } => {
          return Err(RefDataError::ConnectionError(format!("Session start rejected: {}", reason)));
        }
        IncomingMessage::SessionTerminated { reason } => {
          return Err(RefDataError::ConnectionError(format!("Session terminated during start: {}", reason)));
        }
        IncomingMessage::Event(event) => {
          debug!("Queueing {} event received during start", event.event_type);
          self.pending.push_back(event);
        }
        other => warn!("Ignoring unexpected message during start: {:?}", other),
      }
    }
  }

  fn open_service_inner(&mut self, name: &str) -> Result<(), RefDataError> {
    let body = self.encoder.encode_open_service(name)?;
    self.send(&body)?;

    loop {
      match self.recv()? {
        IncomingMessage::ServiceOpened { service, operations } if service == name => {
          info!("Service {} opened with {} operation(s)", name, operations.len());
          self.services.insert(service.clone(), Service::new(&service, operations));
          return Ok(());
        }
        IncomingMessage::ServiceOpenFailure { service, reason } if service == name => {
          return Err(RefDataError::ServiceUnavailable(format!("{}: {}", name, reason)));
        }
        IncomingMessage::SessionTerminated { reason } => {
          let event = self.terminated(&reason);
          self.pending.push_back(event);
          return Err(RefDataError::ServiceUnavailable(format!("{}: session terminated: {}", name, reason)));
        }
        IncomingMessage::Event(event) => {
          debug!("Queueing {} event received while opening {}", event.event_type, name);
          self.pending.push_back(event);
        }
        other => warn!("Ignoring unexpected message while opening {}: {:?}", name, other),
      }
    }
  }
}

impl<C: Connection> Session for BridgeSession<C> {
  fn start(&mut self) -> Result<(), RefDataError> {
    if self.state != SessionState::Idle {
      return Err(RefDataError::ConnectionError("Session was already started".to_string()));
    }
    let result = self.handshake().map_err(into_connection_error);
    if result.is_err() {
      if let Err(e) = self.conn.close() {
        warn!("Error closing connection after failed start: {}", e);
      }
    }
    result
  }

  fn open_service(&mut self, name: &str) -> Result<(), RefDataError> {
    self.require_started()?;
    if self.services.contains_key(name) {
      debug!("Service {} already open", name);
      return Ok(());
    }
    self.open_service_inner(name).map_err(|e| into_service_error(name, e))
  }

  fn get_service(&self, name: &str) -> Result<Service, RefDataError> {
    self.services.get(name).cloned()
      .ok_or_else(|| RefDataError::ServiceUnavailable(format!("{}: service has not been opened", name)))
  }

  fn send_request(&mut self, request: &Request, correlation_id: CorrelationId) -> Result<(), RefDataError> {
    self.require_started()?;
    let service = self.get_service(request.service())?;
    if !service.has_operation(request.operation()) {
      return Err(RefDataError::InvalidRequest(format!(
        "Service {} has no operation '{}'", service.name(), request.operation()
      )));
    }
    request.validate()?;

    let body = self.encoder.encode_send_request(request, correlation_id)?;
    info!("Sending {} (correlation id {}) for {} security(ies), {} field(s)",
          request.operation(), correlation_id, request.securities().len(), request.fields().len());
    self.send(&body)
  }

  fn next_event(&mut self) -> Result<Event, RefDataError> {
    if let Some(event) = self.pending.pop_front() {
      return Ok(event);
    }
    self.require_started()?;

    loop {
      match self.recv()? {
        IncomingMessage::Event(event) => return Ok(event),
        IncomingMessage::SessionTerminated { reason } => return Ok(self.terminated(&reason)),
        other => debug!("Ignoring non-event message while polling: {:?}", other),
      }
    }
  }

  fn stop(&mut self) -> Result<(), RefDataError> {
    if self.state == SessionState::Started {
      info!("Stopping session");
      let body = self.encoder.encode_stop_session();
      if let Err(e) = self.send(&body) {
        warn!("Could not notify gateway of session stop: {}", e);
      }
    }
    self.state = SessionState::Stopped;
    self.conn.close()
  }
}

impl<C: Connection> Drop for BridgeSession<C> {
  fn drop(&mut self) {
    if self.conn.is_connected() {
      debug!("Closing connection of dropped session");
      let _ = self.conn.close();
    }
  }
}
