// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental JSONL stream parser.
//!
//! [`StreamParser`] buffers incoming bytes and yields complete [`Envelope`]
//! messages as full lines become available. Useful when data arrives in
//! arbitrary chunks (e.g. from a TCP socket) and lines may be split across
//! reads.
//!
//! # Examples
//!
//! ```
//! use wf_protocol::stream::StreamParser;
//! use wf_protocol::{Envelope, JsonlCodec};
//!
//! let mut parser = StreamParser::new();
//! let line = JsonlCodec::encode(&Envelope::Fatal {
//!     ref_id: None,
//!     error: "boom".into(),
//!     error_code: None,
//! }).unwrap();
//! let (first, second) = line.as_bytes().split_at(10);
//!
//! assert!(parser.push(first).unwrap().is_empty());
//! let envelopes = parser.push(second).unwrap();
//! assert_eq!(envelopes.len(), 1);
//! ```

use crate::{Envelope, JsonlCodec, ProtocolError};

/// Default maximum line length (16 MiB).
const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Incremental JSONL stream parser.
#[derive(Debug, Clone)]
pub struct StreamParser {
    buf: Vec<u8>,
    max_line_len: usize,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// Create a new parser with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    /// Create a parser with a custom maximum line length, in bytes.
    #[must_use]
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_len,
        }
    }

    /// Feed a chunk of bytes, returning every [`Envelope`] completed by it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Violation`] if a line exceeds the configured
    /// maximum length, or [`ProtocolError::Json`] if a completed line is not
    /// valid JSON.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Envelope>, ProtocolError> {
        self.buf.extend_from_slice(chunk);
        let mut envelopes = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > self.max_line_len {
                    return Err(ProtocolError::Violation(format!(
                        "line exceeds maximum length of {} bytes",
                        self.max_line_len
                    )));
                }
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            envelopes.push(JsonlCodec::decode(trimmed)?);
        }
        Ok(envelopes)
    }

    /// Number of unterminated bytes currently buffered.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_push_yields_complete_lines() {
        let mut parser = StreamParser::new();
        let env = Envelope::Fatal {
            ref_id: None,
            error: "boom".into(),
            error_code: None,
        };
        let line = JsonlCodec::encode(&env).unwrap();
        let envelopes = parser.push(line.as_bytes()).unwrap();
        assert_eq!(envelopes, vec![env]);
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn split_line_across_two_pushes() {
        let mut parser = StreamParser::new();
        let env = Envelope::Fatal {
            ref_id: None,
            error: "boom".into(),
            error_code: None,
        };
        let line = JsonlCodec::encode(&env).unwrap();
        let (first, second) = line.as_bytes().split_at(line.len() / 2);
        assert!(parser.push(first).unwrap().is_empty());
        assert!(parser.pending_bytes() > 0);
        let envelopes = parser.push(second).unwrap();
        assert_eq!(envelopes, vec![env]);
    }

    #[test]
    fn oversized_line_is_rejected() {
        let mut parser = StreamParser::with_max_line_len(8);
        let result = parser.push(b"this line is definitely too long");
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut parser = StreamParser::new();
        let env = Envelope::Fatal {
            ref_id: None,
            error: "x".into(),
            error_code: None,
        };
        let mut chunk = JsonlCodec::encode(&env).unwrap();
        chunk.push_str(&JsonlCodec::encode(&env).unwrap());
        let envelopes = parser.push(chunk.as_bytes()).unwrap();
        assert_eq!(envelopes.len(), 2);
    }
}
