//! Length-delimited frame codec.
//!
//! Wire shape: `0x00 | varint(payload_len) | varint(message_type) | payload`.
//! The leading `0x00` marks the plaintext transport; any other leading byte
//! belongs to the encrypted-transport alternative this daemon doesn't speak.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::varint::{decode_varint, encode_varint, VarintError};

/// Frames larger than this are rejected outright.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

const PLAINTEXT_INDICATOR: u8 = 0x00;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("varint exceeds 10 bytes without a terminator")]
    VarintOverflow,

    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_LEN}-byte limit")]
    PayloadTooLarge(usize),

    #[error("leading byte 0x{0:02x} is not the plaintext indicator")]
    UnsupportedTransport(u8),

    #[error("stream closed mid-frame")]
    ShortRead,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<VarintError> for FrameError {
    fn from(e: VarintError) -> Self {
        match e {
            VarintError::Overflow => FrameError::VarintOverflow,
            VarintError::Truncated => FrameError::ShortRead,
        }
    }
}

/// A decoded frame: a message type tag plus its raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: u32,
    pub payload: Vec<u8>,
}

/// Encode a frame. Fails only if the payload exceeds [`MAX_PAYLOAD_LEN`].
pub fn encode_frame(message_type: u32, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(1 + 10 + 10 + payload.len());
    out.push(PLAINTEXT_INDICATOR);
    write_varint_to(payload.len() as u64, &mut out);
    write_varint_to(message_type as u64, &mut out);
    out.extend_from_slice(payload);
    Ok(out)
}

fn write_varint_to(value: u64, out: &mut Vec<u8>) {
    out.extend(encode_varint(value));
}

/// Decode a single frame from the front of `buf`, returning the frame and
/// the number of bytes consumed. Used for round-trip tests and for callers
/// that already have the whole stream buffered.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    if buf.is_empty() {
        return Err(FrameError::ShortRead);
    }
    let indicator = buf[0];
    if indicator != PLAINTEXT_INDICATOR {
        return Err(FrameError::UnsupportedTransport(indicator));
    }
    let mut pos = 1;

    let (payload_len, consumed) = decode_varint(&buf[pos..])?;
    pos += consumed;
    if payload_len as usize > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload_len as usize));
    }

    let (message_type, consumed) = decode_varint(&buf[pos..])?;
    pos += consumed;

    let payload_len = payload_len as usize;
    if buf.len() - pos < payload_len {
        return Err(FrameError::ShortRead);
    }
    let payload = buf[pos..pos + payload_len].to_vec();
    pos += payload_len;

    Ok((
        Frame {
            message_type: message_type as u32,
            payload,
        },
        pos,
    ))
}

/// Read one frame from an async byte stream.
///
/// Returns `Ok(None)` when the stream closes cleanly between frames (normal
/// termination per spec §4.1); any EOF encountered after the leading byte
/// has been read is a [`FrameError::ShortRead`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, FrameError> {
    let indicator = match reader.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(FrameError::Io(e)),
    };
    if indicator != PLAINTEXT_INDICATOR {
        return Err(FrameError::UnsupportedTransport(indicator));
    }

    let payload_len = read_varint_async(reader).await?;
    if payload_len as usize > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload_len as usize));
    }
    let message_type = read_varint_async(reader).await?;

    let mut payload = vec![0u8; payload_len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::ShortRead,
            _ => FrameError::Io(e),
        })?;

    Ok(Some(Frame {
        message_type: message_type as u32,
        payload,
    }))
}

async fn read_varint_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, FrameError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..crate::varint::MAX_VARINT_BYTES {
        let byte = reader.read_u8().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::ShortRead,
            _ => FrameError::Io(e),
        })?;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(FrameError::VarintOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_is_identity() {
        let payload = b"hello world".to_vec();
        let encoded = encode_frame(7, &payload).unwrap();
        let (frame, consumed) = decode_frame(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.message_type, 7);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn empty_payload_round_trips() {
        let encoded = encode_frame(1, &[]).unwrap();
        let (frame, consumed) = decode_frame(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn oversized_payload_is_rejected_at_encode_time() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode_frame(1, &payload),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn non_plaintext_indicator_is_unsupported_transport() {
        let buf = [0x01u8, 0x00, 0x00];
        assert!(matches!(
            decode_frame(&buf),
            Err(FrameError::UnsupportedTransport(0x01))
        ));
    }

    #[test]
    fn truncated_frame_is_short_read() {
        let encoded = encode_frame(2, b"abcdef").unwrap();
        let truncated = &encoded[..encoded.len() - 2];
        assert!(matches!(decode_frame(truncated), Err(FrameError::ShortRead)));
    }

    #[tokio::test]
    async fn async_read_matches_sync_decode() {
        let payload = b"streamed payload".to_vec();
        let encoded = encode_frame(42, &payload).unwrap();
        let mut cursor = std::io::Cursor::new(encoded);
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame.message_type, 42);
        assert_eq!(frame.payload, payload);
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_normal_termination() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_short_read() {
        let encoded = encode_frame(3, b"0123456789").unwrap();
        let truncated = encoded[..encoded.len() - 3].to_vec();
        let mut cursor = std::io::Cursor::new(truncated);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::ShortRead));
    }

    #[tokio::test]
    async fn two_frames_back_to_back() {
        let mut buf = encode_frame(1, b"first").unwrap();
        buf.extend(encode_frame(2, b"second").unwrap());
        let mut cursor = std::io::Cursor::new(buf);
        let a = read_frame(&mut cursor).await.unwrap().unwrap();
        let b = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(a.payload, b"first");
        assert_eq!(b.payload, b"second");
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }
}
