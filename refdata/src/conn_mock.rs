// refdata/src/conn_mock.rs
// Replays a logged bridge conversation instead of talking to a gateway.

use crate::base::RefDataError;
use crate::conn::Connection;
use crate::conn_log::{bytes_to_center_dot_string, LogDirection};

use rusqlite::{params, Connection as DbConnection};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone)]
struct LoggedMessage {
  direction: LogDirection,
  message_type_name: Option<String>,
  payload_bytes: Vec<u8>,
}

/// A `Connection` backed by a recorded session.
///
/// Writes must match the next recorded SEND frame exactly; reads hand out the
/// next recorded RECV frame.
pub struct ReplayConnection {
  session_name: String,
  logged_messages: Vec<LoggedMessage>,
  message_iter_index: usize,
  connected: bool,
}

impl ReplayConnection {
  pub fn new<P: AsRef<Path>>(db_path: P, session_name: &str) -> Result<Self, RefDataError> {
    log::info!("Creating ReplayConnection for session '{}' from DB: {:?}", session_name, db_path.as_ref());

    let db = DbConnection::open(db_path)
      .map_err(|e| RefDataError::ConfigurationError(format!("Replay: Failed to open logger DB: {}", e)))?;

    let session_id: i64 = db.query_row(
      "SELECT session_id FROM sessions WHERE session_name = ?1",
      params![session_name],
      |row| row.get(0),
    ).map_err(|e| match e {
      rusqlite::Error::QueryReturnedNoRows => RefDataError::ConfigurationError(format!("Replay: Log session '{}' not found in database.", session_name)),
      _ => RefDataError::LoggingError(format!("Replay: Failed to query session '{}': {}", session_name, e)),
    })?;

    let logged_messages = {
      let mut stmt = db.prepare(
        "SELECT direction, message_type_name, payload_bytes
         FROM messages
         WHERE session_id = ?1
         ORDER BY message_id ASC"
      ).map_err(|e| RefDataError::LoggingError(format!("Replay: Failed to prepare message query: {}", e)))?;

      let rows = stmt.query_map(params![session_id], |row| {
        let direction_str: String = row.get(0)?;
        let direction = LogDirection::from_str(&direction_str)
          .map_err(|_| rusqlite::Error::InvalidColumnType(0, "LogDirection".into(), rusqlite::types::Type::Text))?;
        Ok(LoggedMessage {
          direction,
          message_type_name: row.get(1)?,
          payload_bytes: row.get(2)?,
        })
      }).map_err(|e| RefDataError::LoggingError(format!("Replay: Failed to query messages for session {}: {}", session_id, e)))?;

      rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| RefDataError::LoggingError(format!("Replay: Failed to map messages for session {}: {}", session_id, e)))?
    };

    log::info!("Replay: Loaded {} messages for session '{}'", logged_messages.len(), session_name);
    Ok(ReplayConnection {
      session_name: session_name.to_string(),
      logged_messages,
      message_iter_index: 0,
      connected: false,
    })
  }

  /// Number of recorded frames not yet consumed.
  pub fn remaining(&self) -> usize {
    self.logged_messages.len() - self.message_iter_index
  }

  fn next_logged(&self, wanted: LogDirection) -> Result<&LoggedMessage, RefDataError> {
    let index = self.message_iter_index;
    let msg = self.logged_messages.get(index).ok_or_else(|| RefDataError::ReplayError(format!(
      "Unexpected {}: end of session '{}' reached after {} messages", wanted, self.session_name, index
    )))?;
    if msg.direction != wanted {
      return Err(RefDataError::ReplayError(format!(
        "Unexpected {}: logged message #{} is {} ({})",
        wanted, index + 1, msg.direction, msg.message_type_name.as_deref().unwrap_or("UNKNOWN")
      )));
    }
    Ok(msg)
  }

  fn log_payload_mismatch(sent_data: &[u8], expected_data: &[u8]) {
    let max_len = 150;
    let render = |bytes: &[u8]| bytes_to_center_dot_string(&bytes[..max_len.min(bytes.len())]);
    log::error!("Replay mismatch detail:");
    log::error!(" > Sent    ({} bytes): '{}'", sent_data.len(), render(sent_data));
    log::error!(" > Expected({} bytes): '{}'", expected_data.len(), render(expected_data));
  }
}

impl Connection for ReplayConnection {
  fn open(&mut self) -> Result<(), RefDataError> {
    if self.connected {
      return Err(RefDataError::ConnectionError("Already connected".to_string()));
    }
    if self.logged_messages.is_empty() {
      return Err(RefDataError::ConnectionError(format!("Replay session '{}' has no messages", self.session_name)));
    }
    log::info!("Replay: connection to '{}' opened", self.session_name);
    self.connected = true;
    Ok(())
  }

  fn is_connected(&self) -> bool {
    self.connected
  }

  fn write_frame(&mut self, body: &[u8]) -> Result<(), RefDataError> {
    if !self.connected {
      return Err(RefDataError::NotConnected);
    }
    let expected = self.next_logged(LogDirection::Send)?;
    if body != expected.payload_bytes.as_slice() {
      Self::log_payload_mismatch(body, &expected.payload_bytes);
      return Err(RefDataError::ReplayError(format!(
        "Sent message mismatch at logged message #{} (expected {})",
        self.message_iter_index + 1, expected.message_type_name.as_deref().unwrap_or("UNKNOWN")
      )));
    }
    log::debug!("Replay: SEND #{} matches", self.message_iter_index + 1);
    self.message_iter_index += 1;
    Ok(())
  }

  fn read_frame(&mut self) -> Result<Vec<u8>, RefDataError> {
    if !self.connected {
      return Err(RefDataError::NotConnected);
    }
    let payload = self.next_logged(LogDirection::Recv)?.payload_bytes.clone();
    log::debug!("Replay: RECV #{} ({} bytes)", self.message_iter_index + 1, payload.len());
    self.message_iter_index += 1;
    Ok(payload)
  }

  fn close(&mut self) -> Result<(), RefDataError> {
    if self.connected {
      log::info!("Replay: connection to '{}' closed with {} message(s) left", self.session_name, self.remaining());
    }
    self.connected = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn_log::ConnectionLogger;

  fn recorded(frames: &[(LogDirection, &[u8])]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay.db");
    let logger = ConnectionLogger::new(&path, "golden", "127.0.0.1", 8194).unwrap();
    for (direction, body) in frames {
      logger.log_message(*direction, body);
    }
    (dir, path)
  }

  #[test]
  fn replays_in_recorded_order() {
    let (_dir, path) = recorded(&[
      (LogDirection::Send, &b"1\01\0"[..]),
      (LogDirection::Recv, &b"1\01\0now\0"[..]),
    ]);
    let mut conn = ReplayConnection::new(&path, "golden").unwrap();
    assert_eq!(conn.write_frame(b"1\01\0"), Err(RefDataError::NotConnected));
    conn.open().unwrap();
    conn.write_frame(b"1\01\0").unwrap();
    assert_eq!(conn.read_frame().unwrap(), b"1\01\0now\0".to_vec());
    assert_eq!(conn.remaining(), 0);
    assert!(matches!(conn.read_frame(), Err(RefDataError::ReplayError(_))));
  }

  #[test]
  fn mismatched_or_out_of_order_calls_fail() {
    let (_dir, path) = recorded(&[
      (LogDirection::Send, &b"2\0//blp/refdata\0"[..]),
      (LogDirection::Recv, &b"3\0//blp/refdata\00\0"[..]),
    ]);
    let mut conn = ReplayConnection::new(&path, "golden").unwrap();
    conn.open().unwrap();
    assert!(matches!(conn.read_frame(), Err(RefDataError::ReplayError(_))));
    assert!(matches!(conn.write_frame(b"2\0//blp/mktdata\0"), Err(RefDataError::ReplayError(_))));
    assert_eq!(conn.remaining(), 2);
  }

  #[test]
  fn missing_session_is_a_configuration_error() {
    let (_dir, path) = recorded(&[(LogDirection::Send, &b"4\0"[..])]);
    assert!(matches!(ReplayConnection::new(&path, "other"), Err(RefDataError::ConfigurationError(_))));
  }
}
