// refdata/src/conn.rs

use std::io::{self, ErrorKind, Read, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crate::base::RefDataError;
pub use socket::SocketConnection;

/// Prefix written once, raw, right after the TCP connect.
pub const MAGIC_PREFIX: &[u8; 4] = b"RDB\0";

const MAX_MSG_SIZE: usize = 10 * 1024 * 1024; // 10 MB limit

/// Frame-level transport to the gateway. Bodies go in and come out without
/// their length prefix.
pub trait Connection {
  /// Establish the transport. Fails with `RefDataError::ConnectionError`.
  fn open(&mut self) -> Result<(), RefDataError>;

  fn is_connected(&self) -> bool;

  fn write_frame(&mut self, body: &[u8]) -> Result<(), RefDataError>;

  /// Block until the next non-empty frame arrives.
  fn read_frame(&mut self) -> Result<Vec<u8>, RefDataError>;

  /// Close the transport. Closing twice is a no-op.
  fn close(&mut self) -> Result<(), RefDataError>;
}

fn io_to_socket_error(context: &str, e: io::Error) -> RefDataError {
  match e.kind() {
    ErrorKind::UnexpectedEof => RefDataError::SocketError(format!("{}: connection closed by gateway", context)),
    _ => RefDataError::SocketError(format!("{}: {}", context, e)),
  }
}

/// Read one length-prefixed frame and return its body. A zero length yields an empty body.
pub fn read_framed_message_body<R: Read>(reader: &mut R) -> Result<Vec<u8>, RefDataError> {
  let size = reader.read_u32::<BigEndian>()
    .map_err(|e| io_to_socket_error("Reading message size", e))? as usize;

  if size == 0 { return Ok(Vec::new()); }
  if size > MAX_MSG_SIZE { return Err(RefDataError::ParseError(format!("Message size too large: {}", size))); }

  let mut msg_buf = vec![0u8; size];
  reader.read_exact(&mut msg_buf)
    .map_err(|e| io_to_socket_error(&format!("Reading message body ({} bytes)", size), e))?;
  Ok(msg_buf)
}

/// Write one frame: 4-byte big-endian length, then the body.
pub fn write_framed_message<W: Write>(writer: &mut W, msg_body: &[u8]) -> Result<(), RefDataError> {
  if msg_body.len() > MAX_MSG_SIZE {
    return Err(RefDataError::InvalidParameter(format!("Message size too large: {}", msg_body.len())));
  }
  writer.write_u32::<BigEndian>(msg_body.len() as u32)
    .map_err(|e| io_to_socket_error("Writing message size", e))?;
  writer.write_all(msg_body).map_err(|e| io_to_socket_error("Writing message body", e))?;
  writer.flush().map_err(|e| io_to_socket_error("Flushing message", e))?;
  Ok(())
}

mod socket {
  use log::{debug, info, warn};
  use std::io::Write;
  use std::net::{Shutdown, TcpStream, ToSocketAddrs};

  use super::{read_framed_message_body, write_framed_message, Connection, MAGIC_PREFIX};
  use crate::base::RefDataError;
  use crate::config::SessionOptions;

  /// Blocking TCP connection to the gateway.
  pub struct SocketConnection {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
  }

  impl SocketConnection {
    /// Does not connect; `open` does.
    pub fn new(options: &SessionOptions) -> Self {
      SocketConnection {
        host: options.server_host.clone(),
        port: options.server_port,
        stream: None,
      }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, RefDataError> {
      self.stream.as_mut().ok_or(RefDataError::NotConnected)
    }
  }

  impl Connection for SocketConnection {
    fn open(&mut self) -> Result<(), RefDataError> {
      if self.stream.is_some() {
        return Err(RefDataError::ConnectionError("Already connected".to_string()));
      }

      info!("Connecting to gateway at {}:{}", self.host, self.port);
      let addrs: Vec<_> = (self.host.as_str(), self.port).to_socket_addrs()
        .map_err(|e| RefDataError::ConnectionError(format!("Cannot resolve {}:{}: {}", self.host, self.port, e)))?
        .collect();
      if addrs.is_empty() {
        return Err(RefDataError::ConnectionError(format!("No address found for {}:{}", self.host, self.port)));
      }

      let mut stream = TcpStream::connect(&addrs[..])
        .map_err(|e| RefDataError::ConnectionError(format!("Connect to {}:{} failed: {}", self.host, self.port, e)))?;
      if let Err(e) = stream.set_nodelay(true) {
        warn!("Could not set TCP_NODELAY: {}", e);
      }

      stream.write_all(MAGIC_PREFIX)
        .and_then(|_| stream.flush())
        .map_err(|e| RefDataError::ConnectionError(format!("Sending connection prefix: {}", e)))?;

      debug!("Connected to {:?}", stream.peer_addr().ok());
      self.stream = Some(stream);
      Ok(())
    }

    fn is_connected(&self) -> bool {
      self.stream.is_some()
    }

    fn write_frame(&mut self, body: &[u8]) -> Result<(), RefDataError> {
      write_framed_message(self.stream()?, body)
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, RefDataError> {
      let stream = self.stream()?;
      loop {
        let body = read_framed_message_body(stream)?;
        if !body.is_empty() {
          return Ok(body);
        }
        debug!("Skipping empty keep-alive frame");
      }
    }

    fn close(&mut self) -> Result<(), RefDataError> {
      if let Some(stream) = self.stream.take() {
        info!("Disconnecting from gateway {}:{}", self.host, self.port);
        if let Err(e) = stream.shutdown(Shutdown::Both) {
          if e.kind() != std::io::ErrorKind::NotConnected {
            warn!("Error shutting down socket: {}", e);
          }
        }
      }
      Ok(())
    }
  }

  impl Drop for SocketConnection {
    fn drop(&mut self) {
      if self.stream.is_some() {
        let _ = self.close();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::SessionOptions;
  use std::io::Cursor;
  use std::net::TcpListener;
  use std::thread;

  #[test]
  fn frames_round_trip_through_a_buffer() {
    let mut buf = Vec::new();
    write_framed_message(&mut buf, b"5\0body\0").unwrap();
    write_framed_message(&mut buf, b"").unwrap();
    assert_eq!(&buf[..4], &[0, 0, 0, 7]);

    let mut reader = Cursor::new(buf);
    assert_eq!(read_framed_message_body(&mut reader).unwrap(), b"5\0body\0".to_vec());
    assert!(read_framed_message_body(&mut reader).unwrap().is_empty());
    assert!(matches!(read_framed_message_body(&mut reader), Err(RefDataError::SocketError(_))));
  }

  #[test]
  fn oversized_and_truncated_frames_fail() {
    let mut huge = Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF]);
    assert!(matches!(read_framed_message_body(&mut huge), Err(RefDataError::ParseError(_))));

    let mut short = Cursor::new(vec![0, 0, 0, 9, b'a', b'b']);
    match read_framed_message_body(&mut short) {
      Err(RefDataError::SocketError(msg)) => assert!(msg.contains("closed by gateway")),
      other => panic!("unexpected: {:?}", other),
    }
  }

  #[test]
  fn socket_sends_prefix_and_skips_keep_alives() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let gateway = thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut prefix = [0u8; 4];
      stream.read_exact(&mut prefix).unwrap();
      assert_eq!(&prefix, MAGIC_PREFIX);
      let body = read_framed_message_body(&mut stream).unwrap();
      write_framed_message(&mut stream, b"").unwrap();
      write_framed_message(&mut stream, &body).unwrap();
    });

    let mut conn = SocketConnection::new(&SessionOptions::new("127.0.0.1", port));
    assert!(!conn.is_connected());
    conn.open().unwrap();
    conn.write_frame(b"echo\0").unwrap();
    assert_eq!(conn.read_frame().unwrap(), b"echo\0".to_vec());
    conn.close().unwrap();
    assert!(!conn.is_connected());
    assert_eq!(conn.write_frame(b"x\0"), Err(RefDataError::NotConnected));
    gateway.join().unwrap();
  }

  #[test]
  fn refused_connect_is_a_connection_error() {
    // Bind then drop to get a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let mut conn = SocketConnection::new(&SessionOptions::new("127.0.0.1", port));
    assert!(matches!(conn.open(), Err(RefDataError::ConnectionError(_))));
  }
}
