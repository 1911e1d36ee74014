//! Checksummed frame codec shared by the on-disk files.
//!
//! Every file starts with a 5-byte header (4 magic bytes + format version),
//! followed by frames of `[len: u32 LE][msgpack payload][crc32: u32 LE]`.

use crate::error::{ChainError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};

/// Size of the file header.
pub const HEADER_SIZE: u64 = 5;

/// Frame overhead besides the payload (length prefix + checksum).
const FRAME_OVERHEAD: u64 = 8;

/// Sanity bound on a single payload.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Write the file header.
pub fn write_header(writer: &mut impl Write, magic: &[u8; 4], version: u8) -> Result<()> {
    writer.write_all(magic)?;
    writer.write_all(&[version])?;
    Ok(())
}

/// Read and verify the file header.
pub fn read_header(reader: &mut impl Read, magic: &[u8; 4], version: u8) -> Result<()> {
    let mut found = [0u8; 4];
    reader.read_exact(&mut found)?;
    if &found != magic {
        return Err(ChainError::InvalidFormat(format!(
            "bad magic {:?}, expected {:?}",
            found, magic
        )));
    }

    let mut found_version = [0u8; 1];
    reader.read_exact(&mut found_version)?;
    if found_version[0] != version {
        return Err(ChainError::InvalidFormat(format!(
            "unsupported version: {}",
            found_version[0]
        )));
    }
    Ok(())
}

/// Encode and write one frame. Returns the number of bytes written.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> Result<u64> {
    let encoded = rmp_serde::to_vec(value)?;
    if encoded.len() > MAX_FRAME_LEN {
        return Err(ChainError::Serialization(format!(
            "frame too large: {} bytes",
            encoded.len()
        )));
    }

    writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
    writer.write_all(&encoded)?;
    writer.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;

    Ok(encoded.len() as u64 + FRAME_OVERHEAD)
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of file at a frame boundary, and the
/// frame together with its encoded size otherwise.
pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<Option<(T, u64)>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(ChainError::Corruption(format!("frame too large: {} bytes", len)));
    }

    let mut encoded = vec![0u8; len];
    reader.read_exact(&mut encoded).map_err(truncated)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes).map_err(truncated)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(&encoded);
    if stored != computed {
        return Err(ChainError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    let value = rmp_serde::from_slice(&encoded)?;
    Ok(Some((value, len as u64 + FRAME_OVERHEAD)))
}

fn truncated(e: std::io::Error) -> ChainError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ChainError::Corruption("truncated frame".into())
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frames_in_sequence() {
        let mut buf = Vec::new();
        write_header(&mut buf, b"TST\0", 1).unwrap();
        let a = write_frame(&mut buf, &vec![1u32, 2, 3]).unwrap();
        write_frame(&mut buf, &"second".to_string()).unwrap();

        let mut cursor = Cursor::new(buf);
        read_header(&mut cursor, b"TST\0", 1).unwrap();

        let (first, size): (Vec<u32>, u64) = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(size, a);

        let (second, _): (String, u64) = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(second, "second");

        assert!(read_frame::<String>(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_header_rejects_wrong_magic() {
        let mut buf = Vec::new();
        write_header(&mut buf, b"AAA\0", 1).unwrap();
        let result = read_header(&mut Cursor::new(buf), b"BBB\0", 1);
        assert!(matches!(result, Err(ChainError::InvalidFormat(_))));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &"payload".to_string()).unwrap();
        buf[6] ^= 0xff;

        let result = read_frame::<String>(&mut Cursor::new(buf));
        assert!(matches!(result, Err(ChainError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_frame_is_corruption() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &"payload".to_string()).unwrap();
        buf.truncate(buf.len() - 2);

        let result = read_frame::<String>(&mut Cursor::new(buf));
        assert!(matches!(result, Err(ChainError::Corruption(_))));
    }
}
