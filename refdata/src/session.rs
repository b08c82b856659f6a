// refdata/src/session.rs
// The capability interface the driver needs from a market-data provider.

use crate::base::RefDataError;
use crate::event::Event;
use crate::request::{CorrelationId, Request, Service};

/// A live session with the provider.
///
/// Implementations own whatever resources back the session and release them
/// when dropped, so a session abandoned on an error path does not leak.
#[cfg_attr(test, mockall::automock)]
pub trait Session {
  /// Establish the session. Fails with `RefDataError::ConnectionError`.
  fn start(&mut self) -> Result<(), RefDataError>;

  /// Open a named service. Fails with `RefDataError::ServiceUnavailable`.
  fn open_service(&mut self, name: &str) -> Result<(), RefDataError>;

  /// Look up a service previously opened with `open_service`.
  fn get_service(&self, name: &str) -> Result<Service, RefDataError>;

  /// Submit a request. Does not wait for the answer.
  fn send_request(&mut self, request: &Request, correlation_id: CorrelationId) -> Result<(), RefDataError>;

  /// Block until the next event is available.
  fn next_event(&mut self) -> Result<Event, RefDataError>;

  /// End the session.
  fn stop(&mut self) -> Result<(), RefDataError>;
}

impl<S: Session + ?Sized> Session for Box<S> {
  fn start(&mut self) -> Result<(), RefDataError> { (**self).start() }

  fn open_service(&mut self, name: &str) -> Result<(), RefDataError> { (**self).open_service(name) }

  fn get_service(&self, name: &str) -> Result<Service, RefDataError> { (**self).get_service(name) }

  fn send_request(&mut self, request: &Request, correlation_id: CorrelationId) -> Result<(), RefDataError> {
    (**self).send_request(request, correlation_id)
  }

  fn next_event(&mut self) -> Result<Event, RefDataError> { (**self).next_event() }

  fn stop(&mut self) -> Result<(), RefDataError> { (**self).stop() }
}

impl<S: Session + ?Sized> Session for &mut S {
  fn start(&mut self) -> Result<(), RefDataError> { (**self).start() }

  fn open_service(&mut self, name: &str) -> Result<(), RefDataError> { (**self).open_service(name) }

  fn get_service(&self, name: &str) -> Result<Service, RefDataError> { (**self).get_service(name) }

  fn send_request(&mut self, request: &Request, correlation_id: CorrelationId) -> Result<(), RefDataError> {
    (**self).send_request(request, correlation_id)
  }

  fn next_event(&mut self) -> Result<Event, RefDataError> { (**self).next_event() }

  fn stop(&mut self) -> Result<(), RefDataError> { (**self).stop() }
}
