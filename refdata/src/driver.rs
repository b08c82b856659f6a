// refdata/src/driver.rs
// Runs one reference-data query against a session and renders the answer.

use std::io::Write;
use log::{debug, error, info, warn};

use crate::base::RefDataError;
use crate::config::QueryConfig;
use crate::event::{Event, EventType};
use crate::request::{CorrelationId, Request, Service};
use crate::session::Session;

/// Where the poll loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
  Waiting,
  PartialReceived,
  Done,
}

impl PollState {
  /// Only a final response ends the loop. Everything else keeps it polling.
  pub fn on_event(self, event_type: EventType) -> PollState {
    match self {
      PollState::Done => PollState::Done,
      _ if event_type.is_final() => PollState::Done,
      _ if event_type.is_response() => PollState::PartialReceived,
      state => state,
    }
  }
}

/// Summary of a completed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutcome {
  /// Number of `next_event` calls made.
  pub polls: usize,
  pub messages_rendered: usize,
  /// Error indications found in response messages, in arrival order.
  pub response_errors: Vec<String>,
}

impl QueryOutcome {
  pub fn has_response_errors(&self) -> bool { !self.response_errors.is_empty() }
}

/// Drives connect → open service → build request → send → poll → stop.
///
/// The driver owns the session. On a failed step it reports once and returns
/// without touching the session again; the session then releases its
/// resources when the driver is dropped.
pub struct ClientDriver<S: Session, W: Write> {
  session: S,
  out: W,
  correlation_id: CorrelationId,
  started: bool,
}

impl<S: Session, W: Write> ClientDriver<S, W> {
  pub fn new(session: S, out: W) -> Self {
    ClientDriver { session, out, correlation_id: CorrelationId(1), started: false }
  }

  pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
    self.correlation_id = correlation_id;
    self
  }

  pub fn session(&self) -> &S { &self.session }

  pub fn output(&self) -> &W { &self.out }

  pub fn into_parts(self) -> (S, W) { (self.session, self.out) }

  /// Run the whole workflow once.
  pub fn run(&mut self, query: &QueryConfig) -> Result<QueryOutcome, RefDataError> {
    if self.started {
      return Err(RefDataError::InternalError("Driver has already run its query".to_string()));
    }
    self.started = true;

    info!("Starting session");
    if let Err(e) = self.session.start() {
      return Err(self.report_failure("Failed to start session", e));
    }

    info!("Opening service {}", query.service);
    let service = match self.open_service(&query.service) {
      Ok(service) => service,
      Err(e) => {
        let context = format!("Failed to open {} service", query.service);
        return Err(self.report_failure(&context, e));
      }
    };

    let request = build_request(&service, query).map_err(|e| {
      error!("Failed to build {} request: {}", query.operation, e);
      e
    })?;
    self.submit(request)?;

    let outcome = self.poll_until_final()?;

    info!("Final response received after {} poll(s); stopping session", outcome.polls);
    self.session.stop()?;
    Ok(outcome)
  }

  fn open_service(&mut self, name: &str) -> Result<Service, RefDataError> {
    self.session.open_service(name)?;
    self.session.get_service(name)
  }

  /// The request is consumed here and gone once it has been handed to the session.
  fn submit(&mut self, request: Request) -> Result<(), RefDataError> {
    self.emit(&format!("Sending Request: {}", request))?;
    debug!("Submitting {} with correlation id {}", request.operation(), self.correlation_id);
    self.session.send_request(&request, self.correlation_id)
  }

  fn poll_until_final(&mut self) -> Result<QueryOutcome, RefDataError> {
    let mut state = PollState::Waiting;
    let mut outcome = QueryOutcome::default();

    while state != PollState::Done {
      let event = self.session.next_event()?;
      outcome.polls += 1;
      self.render_event(&event, &mut outcome)?;
      state = state.on_event(event.event_type);
      debug!("Poll #{}: {} event -> {:?}", outcome.polls, event.event_type, state);
    }
    Ok(outcome)
  }

  fn render_event(&mut self, event: &Event, outcome: &mut QueryOutcome) -> Result<(), RefDataError> {
    if !event.event_type.is_response() {
      debug!("Skipping {} event with {} message(s)", event.event_type, event.messages.len());
      return Ok(());
    }
    for message in event {
      self.emit(&message.to_string())?;
      outcome.messages_rendered += 1;
      if !message.is_error() {
        continue;
      }
      for err in &message.errors {
        warn!("{} carries an error: {}", message.message_type, err);
        outcome.response_errors.push(err.clone());
      }
    }
    Ok(())
  }

  fn report_failure(&mut self, context: &str, e: RefDataError) -> RefDataError {
    error!("{}: {}", context, e);
    if let Err(write_err) = self.emit(&format!("{}: {}", context, e)) {
      error!("Could not report failure: {}", write_err);
    }
    e
  }

  fn emit(&mut self, line: &str) -> Result<(), RefDataError> {
    writeln!(self.out, "{}", line)
      .and_then(|_| self.out.flush())
      .map_err(|e| RefDataError::OutputError(e.to_string()))
  }
}

/// Build the request for `query` from an opened service.
pub fn build_request(service: &Service, query: &QueryConfig) -> Result<Request, RefDataError> {
  let mut request = service.create_request(&query.operation)?;
  for security in &query.securities {
    request.append_security(security)?;
  }
  for field in &query.fields {
    request.append_field(field)?;
  }
  request.validate()?;
  Ok(request)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{SessionOptions, REFDATA_SERVICE, REFERENCE_DATA_REQUEST};
  use crate::event::Message;
  use crate::session::MockSession;
  use std::collections::VecDeque;

  /// Session fake that plays back a fixed list of events and records every call.
  struct ScriptedSession {
    start_result: Result<(), RefDataError>,
    open_result: Result<(), RefDataError>,
    events: VecDeque<Event>,
    calls: Vec<&'static str>,
    sent: Vec<(Request, CorrelationId)>,
  }

  impl ScriptedSession {
    fn new(events: Vec<Event>) -> Self {
      ScriptedSession {
        start_result: Ok(()),
        open_result: Ok(()),
        events: events.into(),
        calls: Vec::new(),
        sent: Vec::new(),
      }
    }

    fn count(&self, call: &str) -> usize {
      self.calls.iter().filter(|c| **c == call).count()
    }
  }

  impl Session for ScriptedSession {
    fn start(&mut self) -> Result<(), RefDataError> {
      self.calls.push("start");
      self.start_result.clone()
    }

    fn open_service(&mut self, _name: &str) -> Result<(), RefDataError> {
      self.calls.push("open_service");
      self.open_result.clone()
    }

    fn get_service(&self, name: &str) -> Result<Service, RefDataError> {
      Ok(Service::new(name, vec![REFERENCE_DATA_REQUEST.to_string()]))
    }

    fn send_request(&mut self, request: &Request, correlation_id: CorrelationId) -> Result<(), RefDataError> {
      self.calls.push("send_request");
      self.sent.push((request.clone(), correlation_id));
      Ok(())
    }

    fn next_event(&mut self) -> Result<Event, RefDataError> {
      self.calls.push("next_event");
      self.events.pop_front().ok_or(RefDataError::NotConnected)
    }

    fn stop(&mut self) -> Result<(), RefDataError> {
      self.calls.push("stop");
      Ok(())
    }
  }

  fn msg(text: &str) -> Message {
    Message::new("ReferenceDataResponse", text)
  }

  fn output_of<S: Session>(driver: &ClientDriver<S, Vec<u8>>) -> String {
    String::from_utf8(driver.output().clone()).unwrap()
  }

  #[test]
  fn start_failure_reports_once_and_stops_calling() {
    for opts in [SessionOptions::default(), SessionOptions::new("10.0.0.5", 8196), SessionOptions::new("gateway.local", 1)] {
      let mut session = MockSession::new();
      let reason = format!("cannot reach {}", opts.address());
      session.expect_start().times(1).returning(move || Err(RefDataError::ConnectionError(reason.clone())));
      session.expect_open_service().never();
      session.expect_get_service().never();
      session.expect_send_request().never();
      session.expect_next_event().never();
      session.expect_stop().never();

      let mut driver = ClientDriver::new(session, Vec::new());
      let err = driver.run(&QueryConfig::default()).unwrap_err();
      assert!(matches!(err, RefDataError::ConnectionError(_)));

      let out = output_of(&driver);
      assert_eq!(out.lines().count(), 1, "output: {}", out);
      assert!(out.starts_with("Failed to start session"));
      assert!(out.contains(&opts.address()));
    }
  }

  #[test]
  fn service_open_failure_reports_once_and_stops_calling() {
    let mut session = MockSession::new();
    session.expect_start().times(1).returning(|| Ok(()));
    session.expect_open_service()
      .withf(|name| name.to_string() == REFDATA_SERVICE)
      .times(1)
      .returning(|name| Err(RefDataError::ServiceUnavailable(name.to_string())));
    session.expect_get_service().never();
    session.expect_send_request().never();
    session.expect_next_event().never();
    session.expect_stop().never();

    let mut driver = ClientDriver::new(session, Vec::new());
    let err = driver.run(&QueryConfig::default()).unwrap_err();
    assert!(matches!(err, RefDataError::ServiceUnavailable(_)));

    let out = output_of(&driver);
    assert_eq!(out.lines().count(), 1);
    assert!(out.starts_with("Failed to open //blp/refdata service"));
  }

  #[test]
  fn submitted_request_holds_security_and_field() {
    let mut driver = ClientDriver::new(ScriptedSession::new(vec![Event::response(vec![msg("done")])]), Vec::new());
    driver.run(&QueryConfig::single("AAPL US Equity", "PX_LAST")).unwrap();

    let sent = &driver.session().sent;
    assert_eq!(sent.len(), 1);
    let (request, correlation_id) = &sent[0];
    assert_eq!(request.securities(), &["AAPL US Equity".to_string()]);
    assert_eq!(request.fields(), &["PX_LAST".to_string()]);
    assert_eq!(request.operation(), REFERENCE_DATA_REQUEST);
    assert_eq!(*correlation_id, CorrelationId(1));
    assert!(output_of(&driver).starts_with("Sending Request: ReferenceDataRequest = {"));
  }

  #[test]
  fn partials_then_final_render_in_order() {
    let events = vec![
      Event::partial(vec![msg("A")]),
      Event::partial(vec![msg("B")]),
      Event::response(vec![msg("C")]),
    ];
    let mut driver = ClientDriver::new(ScriptedSession::new(events), Vec::new());
    let outcome = driver.run(&QueryConfig::default()).unwrap();

    assert_eq!(outcome.polls, 3);
    assert_eq!(outcome.messages_rendered, 3);
    let out = output_of(&driver);
    let rendered: Vec<&str> = out.lines().filter(|l| ["A", "B", "C"].contains(l)).collect();
    assert_eq!(rendered, vec!["A", "B", "C"]);

    let session = driver.session();
    assert_eq!(session.count("next_event"), 3);
    assert_eq!(session.calls.last(), Some(&"stop"));
  }

  #[test]
  fn lone_final_response_needs_one_poll() {
    let mut driver = ClientDriver::new(ScriptedSession::new(vec![Event::response(vec![msg("X")])]), Vec::new());
    let outcome = driver.run(&QueryConfig::default()).unwrap();

    assert_eq!(outcome.polls, 1);
    let out = output_of(&driver);
    let after_request: Vec<&str> = out.lines().skip_while(|l| *l != "}").skip(1).collect();
    assert_eq!(after_request, vec!["X"]);
    assert_eq!(driver.session().count("next_event"), 1);
  }

  #[test]
  fn teardown_happens_once_after_final() {
    let events = vec![
      Event::new(EventType::RequestStatus, vec![Message::new("RequestAccepted", "queued")]),
      Event::partial(vec![msg("A")]),
      Event::response(vec![msg("B")]),
    ];
    let mut driver = ClientDriver::new(ScriptedSession::new(events), Vec::new());
    driver.run(&QueryConfig::default()).unwrap();

    let calls = &driver.session().calls;
    assert_eq!(driver.session().count("stop"), 1);
    let stop_at = calls.iter().position(|c| *c == "stop").unwrap();
    let last_poll = calls.iter().rposition(|c| *c == "next_event").unwrap();
    assert!(stop_at > last_poll);
    assert_eq!(stop_at, calls.len() - 1);
  }

  #[test]
  fn no_teardown_call_when_stream_breaks_before_final() {
    let mut driver = ClientDriver::new(ScriptedSession::new(vec![Event::partial(vec![msg("A")])]), Vec::new());
    let err = driver.run(&QueryConfig::default()).unwrap_err();
    assert_eq!(err, RefDataError::NotConnected);
    assert_eq!(driver.session().count("stop"), 0);
  }

  #[test]
  fn housekeeping_events_are_not_rendered() {
    let events = vec![
      Event::new(EventType::SessionStatus, vec![Message::new("SessionConnectionUp", "up")]),
      Event::new(EventType::Unknown(99), vec![Message::new("Mystery", "???")]),
      Event::response(vec![msg("C")]),
    ];
    let mut driver = ClientDriver::new(ScriptedSession::new(events), Vec::new());
    let outcome = driver.run(&QueryConfig::default()).unwrap();

    assert_eq!(outcome.polls, 3);
    assert_eq!(outcome.messages_rendered, 1);
    let out = output_of(&driver);
    assert!(!out.contains("up\n"));
    assert!(!out.contains("???"));
  }

  #[test]
  fn error_messages_are_rendered_and_collected() {
    let bad = Message::new("ReferenceDataResponse", "securityError = { category = BAD_SEC }")
      .with_error("BAD_SEC: Unknown/Invalid security [nid:123]");
    let events = vec![
      Event::partial(vec![bad]),
      Event::response(vec![msg("C")]),
    ];
    let mut driver = ClientDriver::new(ScriptedSession::new(events), Vec::new());
    let outcome = driver.run(&QueryConfig::single("NOPE US Equity", "PX_LAST")).unwrap();

    assert!(outcome.has_response_errors());
    assert_eq!(outcome.response_errors, vec!["BAD_SEC: Unknown/Invalid security [nid:123]".to_string()]);
    assert_eq!(outcome.polls, 2);
    assert!(output_of(&driver).contains("securityError = { category = BAD_SEC }"));
  }

  #[test]
  fn empty_security_is_rejected_before_sending() {
    let mut driver = ClientDriver::new(ScriptedSession::new(vec![]), Vec::new());
    let err = driver.run(&QueryConfig::single("", "PX_LAST")).unwrap_err();
    assert!(matches!(err, RefDataError::InvalidParameter(_)));
    assert_eq!(driver.session().count("send_request"), 0);
    assert_eq!(driver.session().count("stop"), 0);
  }

  #[test]
  fn driver_runs_only_once() {
    let mut driver = ClientDriver::new(ScriptedSession::new(vec![Event::response(vec![msg("X")])]), Vec::new());
    driver.run(&QueryConfig::default()).unwrap();
    assert!(matches!(driver.run(&QueryConfig::default()), Err(RefDataError::InternalError(_))));
    assert_eq!(driver.session().count("start"), 1);
  }

  #[test]
  fn poll_state_transitions() {
    use PollState::*;
    assert_eq!(Waiting.on_event(EventType::PartialResponse), PartialReceived);
    assert_eq!(PartialReceived.on_event(EventType::PartialResponse), PartialReceived);
    assert_eq!(PartialReceived.on_event(EventType::Response), Done);
    assert_eq!(Waiting.on_event(EventType::Response), Done);
    assert_eq!(Waiting.on_event(EventType::ServiceStatus), Waiting);
    assert_eq!(PartialReceived.on_event(EventType::Admin), PartialReceived);
    assert_eq!(Done.on_event(EventType::PartialResponse), Done);
  }
}
