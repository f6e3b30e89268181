//! Gzip compression of finished batch buffers

use crate::HecError;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Gzip-encode a request body.
///
/// Returns a cheaply cloneable buffer so each retry attempt can re-send
/// the same wire bytes.
pub fn gzip(body: &[u8]) -> Result<Bytes, HecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body).map_err(HecError::Compression)?;
    let compressed = encoder.finish().map_err(HecError::Compression)?;
    Ok(Bytes::from(compressed))
}
