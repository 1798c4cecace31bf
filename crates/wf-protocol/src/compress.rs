// SPDX-License-Identifier: MIT OR Apache-2.0
//! Optional payload compression for large envelopes (bulk `MetricsReport`
//! snapshots, batched `TaskUpdate`s) before they cross the wire.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::ProtocolError;

/// Gzip-compress `data` at the default compression level.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the encoder fails.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a gzip-compressed buffer produced by [`gzip_compress`].
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the stream is not valid gzip.
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Zstd-compress `data` at the given level (0 selects zstd's default).
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the encoder fails.
pub fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, ProtocolError> {
    Ok(zstd::stream::encode_all(data, level)?)
}

/// Decompress a zstd-compressed buffer produced by [`zstd_compress`].
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the stream is not valid zstd.
pub fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Ok(zstd::stream::decode_all(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_roundtrips() {
        let payload = b"metrics snapshot payload".repeat(50);
        let compressed = gzip_compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(gzip_decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn zstd_roundtrips() {
        let payload = b"metrics snapshot payload".repeat(50);
        let compressed = zstd_compress(&payload, 3).unwrap();
        assert_eq!(zstd_decompress(&compressed).unwrap(), payload);
    }
}
