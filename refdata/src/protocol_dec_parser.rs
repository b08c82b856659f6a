// refdata/src/protocol_dec_parser.rs
// Cursor over the NUL-terminated text fields of a bridge message body.

use crate::base::RefDataError;

/// Upper bound on any length prefix inside a body, so a corrupt count cannot
/// make us allocate wildly.
const MAX_LIST_LEN: usize = 100_000;

pub struct FieldParser<'a> {
  data: &'a [u8],
  fields: Vec<(usize, usize)>, // (start, end) indices for each field
  current_field: usize,
}

impl<'a> FieldParser<'a> {
  pub fn new(data: &'a [u8]) -> Self {
    let mut parser = Self {
      data,
      fields: Vec::new(),
      current_field: 0,
    };
    parser.parse_fields();
    parser
  }

  fn parse_fields(&mut self) {
    let mut start = 0;
    for (i, &byte) in self.data.iter().enumerate() {
      if byte == 0 {
        self.fields.push((start, i));
        start = i + 1;
      }
    }
  }

  pub fn read_string(&mut self) -> Result<String, RefDataError> {
    let (start, end) = *self.fields.get(self.current_field)
      .ok_or_else(|| RefDataError::ParseError("Unexpected end of message".to_string()))?;
    self.current_field += 1;

    std::str::from_utf8(&self.data[start..end])
      .map(|s| s.to_string())
      .map_err(|e| RefDataError::ParseError(format!("Failed to parse string: {}", e)))
  }

  /// Empty fields read as zero.
  pub fn read_int(&mut self) -> Result<i32, RefDataError> {
    let s = self.read_string()?;
    if s.is_empty() {
      return Ok(0);
    }
    s.parse::<i32>()
      .map_err(|e| RefDataError::ParseError(format!("Failed to parse integer '{}': {}", s, e)))
  }

  pub fn read_u64(&mut self) -> Result<u64, RefDataError> {
    let s = self.read_string()?;
    if s.is_empty() {
      return Ok(0);
    }
    s.parse::<u64>()
      .map_err(|e| RefDataError::ParseError(format!("Failed to parse unsigned integer '{}': {}", s, e)))
  }

  /// Read a list length and sanity-check it against what is left in the body.
  pub fn read_count(&mut self) -> Result<usize, RefDataError> {
    let n = self.read_int()?;
    if n < 0 || n as usize > MAX_LIST_LEN {
      return Err(RefDataError::ParseError(format!("Invalid list length: {}", n)));
    }
    Ok(n as usize)
  }

  pub fn read_string_list(&mut self) -> Result<Vec<String>, RefDataError> {
    let n = self.read_count()?;
    if n > self.remaining_fields() {
      return Err(RefDataError::ParseError(format!(
        "List claims {} entries but only {} fields remain", n, self.remaining_fields()
      )));
    }
    (0..n).map(|_| self.read_string()).collect()
  }

  pub fn remaining_fields(&self) -> usize {
    self.fields.len().saturating_sub(self.current_field)
  }
}
