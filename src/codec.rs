//! Payload codec for blob-tier cache values.
//!
//! Values are serialized to canonical JSON; anything larger than
//! [`COMPRESSION_THRESHOLD`] is zstd-compressed. The zstd magic bytes double
//! as the "compressed" tag: raw JSON can never begin with them, so a reader
//! auto-detects the right path without an explicit envelope.
//!
//! # Example
//!
//! ```
//! use recall_cache::codec;
//!
//! let value = vec!["a".to_string(), "b".to_string()];
//! let stored = codec::encode(&value).unwrap();
//! let back: Vec<String> = codec::decode(&stored).unwrap();
//! assert_eq!(value, back);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialized payloads above this many bytes are stored compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Zstd magic bytes (little-endian): 0xFD2FB528
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Compression level 3 balances speed against ratio for cache-sized payloads.
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("deserialize failed: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),
}

/// Check whether stored bytes carry the compressed tag.
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Serialize a value to its cache-storable representation.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(value).map_err(CodecError::Serialize)?;

    if json.len() > COMPRESSION_THRESHOLD {
        zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
            .map_err(|e| CodecError::Compress(e.to_string()))
    } else {
        Ok(json)
    }
}

/// Reverse of [`encode`]. Sniffs the compressed tag and decompresses when
/// present; plain payloads are parsed directly.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    if is_compressed(data) {
        let json = zstd::decode_all(data).map_err(|e| CodecError::Decompress(e.to_string()))?;
        serde_json::from_slice(&json).map_err(CodecError::Deserialize)
    } else {
        serde_json::from_slice(data).map_err(CodecError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn roundtrip_small_value() {
        let value = json!({"question": "capital of France?", "answer": "Paris"});
        let stored = encode(&value).unwrap();
        assert!(!is_compressed(&stored));
        assert_eq!(decode::<Value>(&stored).unwrap(), value);
    }

    #[test]
    fn roundtrip_empty_value() {
        let value = json!({});
        let stored = encode(&value).unwrap();
        assert_eq!(decode::<Value>(&stored).unwrap(), value);

        let empty = String::new();
        let stored = encode(&empty).unwrap();
        assert_eq!(decode::<String>(&stored).unwrap(), empty);
    }

    #[test]
    fn boundary_at_threshold_stays_raw() {
        // A JSON string serializes to its length plus two quote bytes, so
        // 1022 chars lands exactly on the 1024-byte threshold (not above it).
        let value = "x".repeat(COMPRESSION_THRESHOLD - 2);
        let stored = encode(&value).unwrap();
        assert_eq!(stored.len(), COMPRESSION_THRESHOLD);
        assert!(!is_compressed(&stored));
        assert_eq!(decode::<String>(&stored).unwrap(), value);
    }

    #[test]
    fn boundary_above_threshold_is_compressed() {
        let value = "x".repeat(COMPRESSION_THRESHOLD - 1);
        let stored = encode(&value).unwrap();
        assert!(is_compressed(&stored));
        assert_eq!(decode::<String>(&stored).unwrap(), value);
    }

    #[test]
    fn large_repetitive_payload_shrinks() {
        let value = json!({"explanation": "spaced repetition ".repeat(500)});
        let stored = encode(&value).unwrap();
        assert!(is_compressed(&stored));
        assert!(stored.len() < serde_json::to_vec(&value).unwrap().len());
        assert_eq!(decode::<Value>(&stored).unwrap(), value);
    }

    #[test]
    fn unrecognized_payload_is_an_error() {
        let err = decode::<Value>(b"not json at all").unwrap_err();
        assert!(matches!(err, CodecError::Deserialize(_)));
    }

    #[test]
    fn truncated_compressed_payload_is_an_error() {
        let value = "y".repeat(4096);
        let mut stored = encode(&value).unwrap();
        assert!(is_compressed(&stored));
        stored.truncate(8);
        let err = decode::<String>(&stored).unwrap_err();
        assert!(matches!(err, CodecError::Decompress(_)));
    }
}
