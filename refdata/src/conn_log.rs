// refdata/src/conn_log.rs
// Records every bridge frame of a session into SQLite so it can be replayed.

use crate::base::RefDataError;
use crate::protocol_decoder::IncomingMessageType;
use crate::protocol_encoder;

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rusqlite::{params, Connection as DbConnection};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Stands in for NUL bytes in the human-readable payload column (U+00B7).
const CENTER_DOT: char = '·';

static INCOMING_TYPE_MAP: Lazy<HashMap<i32, &'static str>> = Lazy::new(|| {
  let mut m = HashMap::new();
  m.insert(IncomingMessageType::SessionStarted.into(), "SESSION_STARTED");
  m.insert(IncomingMessageType::SessionStartFailure.into(), "SESSION_START_FAILURE");
  m.insert(IncomingMessageType::ServiceOpened.into(), "SERVICE_OPENED");
  m.insert(IncomingMessageType::ServiceOpenFailure.into(), "SERVICE_OPEN_FAILURE");
  m.insert(IncomingMessageType::Event.into(), "EVENT");
  m.insert(IncomingMessageType::SessionTerminated.into(), "SESSION_TERMINATED");
  m
});

pub(crate) fn bytes_to_center_dot_string(bytes: &[u8]) -> String {
  String::from_utf8_lossy(bytes).replace('\0', &CENTER_DOT.to_string())
}

/// Parses the leading message type id of a body.
fn parse_message_type_id(payload: &[u8]) -> Option<i32> {
  let end_pos = payload.iter().position(|&b| b == 0)?;
  if end_pos == 0 { return None; }
  std::str::from_utf8(&payload[..end_pos]).ok()?.parse::<i32>().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
  Send,
  Recv,
}

impl fmt::Display for LogDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LogDirection::Send => write!(f, "SEND"),
      LogDirection::Recv => write!(f, "RECV"),
    }
  }
}

impl FromStr for LogDirection {
  type Err = RefDataError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "SEND" => Ok(LogDirection::Send),
      "RECV" => Ok(LogDirection::Recv),
      _ => Err(RefDataError::ParseError(format!("Invalid LogDirection string in log: {}", s))),
    }
  }
}

struct ConnectionLoggerInner {
  db: DbConnection,
  session_id: i64,
  start_time_instant: Instant,
}

/// Clones share the same database handle.
#[derive(Clone)]
pub struct ConnectionLogger {
  inner: Arc<Mutex<ConnectionLoggerInner>>,
}

impl ConnectionLogger {
  /// Opens (or creates) the log database and starts a fresh session record,
  /// replacing any earlier session with the same name.
  pub fn new<P: AsRef<Path>>(
    db_path: P,
    session_name: &str,
    host: &str,
    port: u16,
  ) -> Result<Self, RefDataError> {
    log::info!("Initializing connection logger at path: {:?}, Session Name: '{}'", db_path.as_ref(), session_name);
    let mut db = DbConnection::open(db_path)
      .map_err(|e| RefDataError::ConfigurationError(format!("Failed to open logger database: {}", e)))?;

    db.pragma_update(None, "journal_mode", "WAL")
      .map_err(|e| RefDataError::ConfigurationError(format!("Failed to set WAL mode: {}", e)))?;
    db.execute("PRAGMA foreign_keys = ON;", [])
      .map_err(|e| RefDataError::ConfigurationError(format!("Failed to enable foreign keys: {}", e)))?;

    create_tables(&db)?;
    let session_id = replace_session(&mut db, session_name, host, port)?;
    log::info!("Started logger session ID: {} for name '{}'", session_id, session_name);

    Ok(Self {
      inner: Arc::new(Mutex::new(ConnectionLoggerInner {
        db,
        session_id,
        start_time_instant: Instant::now(),
      })),
    })
  }

  /// Logs one frame body. Failures are reported through `log` and otherwise ignored,
  /// so a broken log never breaks the session it records.
  pub fn log_message(&self, direction: LogDirection, payload: &[u8]) {
    let message_type_id = parse_message_type_id(payload);
    let message_type_name = match direction {
      LogDirection::Send => protocol_encoder::identify_outgoing_type(payload),
      LogDirection::Recv => message_type_id.and_then(|id| INCOMING_TYPE_MAP.get(&id).copied()),
    };
    let payload_text = bytes_to_center_dot_string(payload);

    let guard = self.inner.lock();
    let relative_ms = guard.start_time_instant.elapsed().as_secs_f64() * 1000.0;
    match guard.db.execute(
      "INSERT INTO messages (session_id, direction, relative_timestamp_ms, message_type_id, message_type_name, payload_text, payload_bytes)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![guard.session_id, direction.to_string(), relative_ms, message_type_id, message_type_name, payload_text, payload],
    ) {
      Ok(_) => log::trace!(
        "Logged {} message: Type={}, RelTime={:.3}ms, Size={}",
        direction, message_type_name.unwrap_or("UNKNOWN"), relative_ms, payload.len()
      ),
      Err(e) => log::error!("Failed to log message to database: {}", e),
    }
  }
}

fn create_tables(db: &DbConnection) -> Result<(), RefDataError> {
  db.execute_batch(
    "BEGIN;
     CREATE TABLE IF NOT EXISTS sessions (
         session_id          INTEGER PRIMARY KEY AUTOINCREMENT,
         session_name        TEXT NOT NULL UNIQUE,
         start_time          TEXT NOT NULL,
         host                TEXT NOT NULL,
         port                INTEGER NOT NULL
     );
     CREATE TABLE IF NOT EXISTS messages (
         message_id            INTEGER PRIMARY KEY AUTOINCREMENT,
         session_id            INTEGER NOT NULL,
         direction             TEXT NOT NULL CHECK(direction IN ('SEND', 'RECV')),
         relative_timestamp_ms REAL NOT NULL,
         message_type_id       INTEGER NULL,
         message_type_name     TEXT NULL,
         payload_text          TEXT NOT NULL,
         payload_bytes         BLOB NOT NULL,
         FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
     );
     CREATE INDEX IF NOT EXISTS idx_sessions_name ON sessions (session_name);
     CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, message_id);
     COMMIT;"
  ).map_err(|e| RefDataError::ConfigurationError(format!("Failed to create logger tables: {}", e)))
}

fn replace_session(db: &mut DbConnection, session_name: &str, host: &str, port: u16) -> Result<i64, RefDataError> {
  let tx = db.transaction()
    .map_err(|e| RefDataError::LoggingError(format!("Failed to start logger transaction: {}", e)))?;

  // ON DELETE CASCADE removes the old messages too.
  let deleted = tx.execute("DELETE FROM sessions WHERE session_name = ?1", params![session_name])
    .map_err(|e| RefDataError::LoggingError(format!("Failed to delete previous session '{}': {}", session_name, e)))?;
  if deleted > 0 {
    log::warn!("Deleted {} previous log session(s) named '{}'", deleted, session_name);
  }

  tx.execute(
    "INSERT INTO sessions (session_name, start_time, host, port) VALUES (?1, ?2, ?3, ?4)",
    params![session_name, Utc::now().to_rfc3339(), host, port],
  ).map_err(|e| RefDataError::LoggingError(format!("Failed to insert new session '{}': {}", session_name, e)))?;
  let session_id = tx.last_insert_rowid();

  tx.commit()
    .map_err(|e| RefDataError::LoggingError(format!("Failed to commit logger transaction: {}", e)))?;
  Ok(session_id)
}
