//! Length-prefixed, checksummed postcard frames.
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────────┐
//! │ len u32 LE │ crc u32 LE │ postcard payload    │
//! └────────────┴────────────┴─────────────────────┘
//! ```

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ProtocolError;

pub const FRAME_HEADER_SIZE: usize = 8;
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), ProtocolError> {
    let payload = postcard::to_allocvec(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` when the peer closed the stream
/// between frames.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, ProtocolError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let (len, crc) = header.split_at(4);
    let length = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
    let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    let actual = crc32fast::hash(&payload);
    if actual != expected {
        return Err(ProtocolError::Crc { expected, actual });
    }
    Ok(Some(postcard::from_bytes(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &(7u8, String::from("ok"))).unwrap();

        let payload = &buf[FRAME_HEADER_SIZE..];
        assert_eq!(&buf[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&buf[4..8], &crc32fast::hash(payload).to_le_bytes());

        let decoded: Option<(u8, String)> = read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, Some((7, "ok".to_string())));
    }

    #[test]
    fn test_consecutive_frames_then_eof() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &1u32).unwrap();
        write_frame(&mut buf, &2u32).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame::<_, u32>(&mut cursor).unwrap(), Some(1));
        assert_eq!(read_frame::<_, u32>(&mut cursor).unwrap(), Some(2));
        assert_eq!(read_frame::<_, u32>(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &String::from("payload")).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        let err = read_frame::<_, String>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ProtocolError::Crc { .. }));
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        let err = read_frame::<_, u32>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge(_)));
    }

    #[test]
    fn test_truncated_payload_is_io_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &String::from("truncated")).unwrap();
        buf.truncate(buf.len() - 2);

        let err = read_frame::<_, String>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
