//! Codec for framing signal messages on a byte stream.
//!
//! Frame format:
//! - Length: 4 bytes, big endian, size of the body
//! - Body: UTF-8 JSON encoding of a [`SignalMessage`]

use crate::message::SignalMessage;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix.
pub const HEADER_SIZE: usize = 4;

/// Default upper bound on a frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame body larger than the configured limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced or encoded body size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Body was not a valid signal message
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// Underlying stream failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Length-delimited JSON codec for [`SignalMessage`].
#[derive(Debug, Clone)]
pub struct SignalCodec {
    max_frame_size: usize,
}

impl Default for SignalCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalCodec {
    /// Create a codec with [`DEFAULT_MAX_FRAME_SIZE`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom frame size limit.
    #[must_use]
    pub const fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for SignalCodec {
    type Item = SignalMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header: &[u8] = src.as_ref();
        let body_len = header.get_u32() as usize;
        if body_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        let frame_len = HEADER_SIZE + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_len);
        let message = serde_json::from_slice(&body)?;
        Ok(Some(message))
    }
}

impl Encoder<SignalMessage> for SignalCodec {
    type Error = CodecError;

    fn encode(&mut self, item: SignalMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            });
        }

        // Bounded by max_frame_size, which callers keep well under u32::MAX
        #[allow(clippy::cast_possible_truncation)]
        let body_len = body.len() as u32;

        dst.reserve(HEADER_SIZE + body.len());
        dst.put_u32(body_len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::message::{SessionDescription, SignalPayload};

    fn offer(id: u64) -> SignalMessage {
        SignalMessage::request(id, SignalPayload::Offer(SessionDescription::offer("v=0")))
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = SignalCodec::new();
        let mut encoded = BytesMut::new();
        codec.encode(offer(3), &mut encoded).unwrap();

        let mut partial = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&encoded[encoded.len() - 1..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(offer(3)));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_short_header() {
        let mut codec = SignalCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut codec = SignalCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(offer(1), &mut buf).unwrap();
        codec.encode(offer(2), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().id, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().id, 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_announcement() {
        let mut codec = SignalCodec::with_max_frame_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { size: 17, max: 16 }));
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let mut codec = SignalCodec::with_max_frame_size(8);
        let mut buf = BytesMut::new();
        let err = codec.encode(offer(1), &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { max: 8, .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage_body() {
        let mut codec = SignalCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.extend_from_slice(b"{x}");

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::InvalidMessage(_))
        ));
    }
}
