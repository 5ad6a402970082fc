//! Encode/decode the per-entry metadata tuple `(atime, etime, size)` as bytes.
//!
//! The wire representation is a fixed 24-byte little-endian triple of `i64`s —
//! simple enough to validate on decode, which is how `Corrupt` gets detected for a
//! truncated or tampered record (see `original_source/include/core/cache_codec.h`).
use crate::error::{Error, ErrorKind, Result};

const RECORD_LEN: usize = 24;

/// Encode `(atime, etime, size)` into a fixed-length byte record.
pub fn encode(atime: i64, etime: i64, size: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_LEN);
    buf.extend_from_slice(&atime.to_le_bytes());
    buf.extend_from_slice(&etime.to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

/// Decode a record produced by [`encode`]. Fails with [`ErrorKind::Corrupt`] if
/// `bytes` isn't exactly [`RECORD_LEN`] long.
pub fn decode(bytes: &[u8]) -> Result<(i64, i64, i64)> {
    if bytes.len() != RECORD_LEN {
        return Err(Error::new(
            ErrorKind::Corrupt,
            format!("metadata record has length {}, expected {RECORD_LEN}", bytes.len()),
        ));
    }
    let atime = i64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let etime = i64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let size = i64::from_le_bytes(bytes[16..24].try_into().unwrap());
    Ok((atime, etime, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let bytes = encode(123, 456, 789);
        assert_eq!(decode(&bytes).unwrap(), (123, 456, 789));
    }

    #[test]
    fn zero_etime_means_never_expires() {
        let bytes = encode(1, 0, 2);
        assert_eq!(decode(&bytes).unwrap(), (1, 0, 2));
    }

    #[test]
    fn rejects_truncated_record() {
        let bytes = encode(1, 2, 3);
        let err = decode(&bytes[..10]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
