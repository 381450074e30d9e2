//! Self-describing, versioned checkpoint container (§6 "Persisted
//! state layout").
//!
//! Framing: `magic(4) | format_version(2) | shard_id(2) | checkpoint_id(8) |
//! uncompressed_size(8) | lz4_payload(..) | crc32(4)`. The payload itself is
//! an opaque byte string — `gatekeeper-core` is responsible for encoding the
//! profile/ensemble/policy state with `bincode` before handing it here, and
//! for decoding it after `decode_container` hands the bytes back. This
//! separation keeps the storage crate free of a dependency on `Profile`.

use crate::error::{Result, StorageError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const MAGIC: [u8; 4] = *b"GKCP";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 8;
const FOOTER_LEN: usize = 4;

/// Successfully decoded checkpoint container.
pub struct DecodedCheckpoint {
    pub shard_id: u16,
    pub checkpoint_id: u64,
    pub payload: Vec<u8>,
}

/// Frame, compress (lz4), and checksum a shard's serialized state.
pub fn encode_container(shard_id: u16, checkpoint_id: u64, payload: &[u8]) -> Vec<u8> {
    let compressed = lz4_flex::block::compress_prepend_size(payload);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len() + FOOTER_LEN);
    out.extend_from_slice(&MAGIC);
    out.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
    out.write_u16::<LittleEndian>(shard_id).unwrap();
    out.write_u64::<LittleEndian>(checkpoint_id).unwrap();
    out.write_u64::<LittleEndian>(payload.len() as u64).unwrap();
    out.extend_from_slice(&compressed);

    let checksum = crc32fast::hash(&out[4..]);
    out.write_u32::<LittleEndian>(checksum).unwrap();
    out
}

/// Parse and validate a checkpoint blob produced by `encode_container`.
pub fn decode_container(bytes: &[u8]) -> Result<DecodedCheckpoint> {
    if bytes.len() < HEADER_LEN + FOOTER_LEN {
        return Err(StorageError::Malformed("checkpoint blob too short".into()));
    }
    if bytes[0..4] != MAGIC {
        return Err(StorageError::BadMagic);
    }

    let mut header = Cursor::new(&bytes[4..HEADER_LEN]);
    let format_version = header.read_u16::<LittleEndian>().unwrap();
    if format_version != FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion(format_version));
    }
    let shard_id = header.read_u16::<LittleEndian>().unwrap();
    let checkpoint_id = header.read_u64::<LittleEndian>().unwrap();
    let uncompressed_size = header.read_u64::<LittleEndian>().unwrap() as usize;

    let body_end = bytes.len() - FOOTER_LEN;
    let body = &bytes[4..body_end];
    let expected_checksum = (&bytes[body_end..])
        .read_u32::<LittleEndian>()
        .unwrap();
    let actual_checksum = crc32fast::hash(body);
    if actual_checksum != expected_checksum {
        return Err(StorageError::ChecksumMismatch {
            expected: expected_checksum,
            actual: actual_checksum,
        });
    }

    let compressed_payload = &bytes[HEADER_LEN..body_end];
    let payload = lz4_flex::block::decompress_size_prepended(compressed_payload)
        .map_err(|e| StorageError::Decompress(e.to_string()))?;
    if payload.len() != uncompressed_size {
        return Err(StorageError::Malformed(format!(
            "uncompressed size mismatch: header said {}, got {}",
            uncompressed_size,
            payload.len()
        )));
    }

    Ok(DecodedCheckpoint {
        shard_id,
        checkpoint_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let payload = b"hello gatekeeper checkpoint payload".to_vec();
        let blob = encode_container(3, 42, &payload);
        let decoded = decode_container(&blob).unwrap();
        assert_eq!(decoded.shard_id, 3);
        assert_eq!(decoded.checkpoint_id, 42);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut blob = encode_container(0, 0, b"x");
        blob[0] = b'Z';
        assert!(matches!(decode_container(&blob), Err(StorageError::BadMagic)));
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let mut blob = encode_container(0, 0, b"some payload data");
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(
            decode_container(&blob),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let blob = vec![0u8; 3];
        assert!(decode_container(&blob).is_err());
    }
}
