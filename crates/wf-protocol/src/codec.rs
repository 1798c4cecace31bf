// SPDX-License-Identifier: MIT OR Apache-2.0
//! Whole-buffer JSONL batch encoder/decoder.
//!
//! Complements [`crate::JsonlCodec`] (single envelope, writer-oriented) with
//! a string-oriented API for cases that already hold the full payload in
//! memory, such as an HTTP request body.

use crate::{Envelope, JsonlCodec, ProtocolError};

/// Encodes/decodes a complete in-memory JSONL batch.
#[derive(Debug, Clone, Copy)]
pub struct StreamingCodec;

impl StreamingCodec {
    /// Encode multiple envelopes into a single JSONL string.
    #[must_use]
    pub fn encode_batch(envelopes: &[Envelope]) -> String {
        let mut out = String::new();
        for env in envelopes {
            if let Ok(line) = JsonlCodec::encode(env) {
                out.push_str(&line);
            }
        }
        out
    }

    /// Decode a JSONL string into a vec of results, one per non-blank line.
    pub fn decode_batch(input: &str) -> Vec<Result<Envelope, ProtocolError>> {
        input
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| JsonlCodec::decode(l.trim()))
            .collect()
    }

    /// Count the number of non-blank lines in a JSONL string.
    #[must_use]
    pub fn line_count(input: &str) -> usize {
        input.lines().filter(|l| !l.trim().is_empty()).count()
    }

    /// Validate each non-blank line in a JSONL string.
    ///
    /// Returns `(line_number, error)` pairs for lines that fail to parse,
    /// where `line_number` is 1-based.
    pub fn validate_jsonl(input: &str) -> Vec<(usize, ProtocolError)> {
        input
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .filter_map(|(idx, l)| JsonlCodec::decode(l.trim()).err().map(|e| (idx + 1, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceInfo;

    fn register() -> Envelope {
        Envelope::register(
            "w1",
            "vu-runner",
            "10.0.0.1:9000",
            ResourceInfo {
                cpu_cores: 4,
                memory_mb: 4096,
                max_vus: 100,
                current_load: 0.0,
            },
        )
    }

    #[test]
    fn encode_then_decode_batch_preserves_order() {
        let envelopes = vec![register(), register()];
        let batch = StreamingCodec::encode_batch(&envelopes);
        assert_eq!(StreamingCodec::line_count(&batch), 2);
        let decoded = StreamingCodec::decode_batch(&batch);
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(Result::is_ok));
    }

    #[test]
    fn validate_jsonl_reports_bad_line_numbers() {
        let input = "not json\n{\"t\":\"fatal\",\"error\":\"x\"}\nalso bad";
        let errors = StreamingCodec::validate_jsonl(input);
        assert_eq!(errors.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 3]);
    }
}
