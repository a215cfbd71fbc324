//! Payload Codec Module
//!
//! Serializes values to JSON and gzips payloads above the compression threshold.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Encoded Value ==
/// Stored representation of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    /// Serialized length before compression
    pub original_size: usize,
}

impl EncodedValue {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

// == Encode ==
/// Serializes `value` and compresses it when warranted.
///
/// `compress` overrides the threshold: `Some(false)` always stores raw,
/// `Some(true)` always attempts compression. A compressed payload is only
/// kept when it is smaller than the raw one.
pub fn encode<T: Serialize + ?Sized>(
    value: &T,
    threshold: usize,
    compress: Option<bool>,
) -> Result<EncodedValue> {
    let raw = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    let original_size = raw.len();

    let wants_compression = compress.unwrap_or(original_size > threshold);
    if wants_compression {
        let packed = gzip(&raw)?;
        if packed.len() < original_size {
            return Ok(EncodedValue {
                bytes: packed,
                compressed: true,
                original_size,
            });
        }
    }

    Ok(EncodedValue {
        bytes: raw,
        compressed: false,
        original_size,
    })
}

// == Decode ==
/// Restores a value from its stored representation.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], compressed: bool) -> Result<T> {
    if compressed {
        let raw = gunzip(bytes)?;
        serde_json::from_slice(&raw).map_err(|e| CacheError::Deserialization(e.to_string()))
    } else {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CacheError::Compression(e.to_string()))
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    Ok(out)
}
