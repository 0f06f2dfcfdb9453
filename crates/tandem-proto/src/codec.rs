//! Stream framing.
//!
//! Each frame is a 4-byte big-endian payload length followed by a CBOR
//! encoded [`Message`].
//!
//! ```text
//! ┌──────────────┬─────────────────────────┐
//! │ len: u32 BE  │ CBOR payload (len bytes)│
//! └──────────────┴─────────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{error::ProtocolError, message::Message};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest accepted payload.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Encode `message` into a complete frame.
pub fn encode_frame(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut payload = Vec::new();
    message.encode(&mut payload)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: payload.len(), max: MAX_FRAME_SIZE });
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    // Bounded by MAX_FRAME_SIZE above
    #[allow(clippy::cast_possible_truncation)]
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
/// buffer is left untouched in that case. On success the frame is consumed.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
    }

    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    let payload = buf.split_to(len);
    Message::decode(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::PROTOCOL_VERSION;

    #[test]
    fn partial_frame_waits_for_more() {
        let frame = encode_frame(&Message::ToggleReady).expect("encode");

        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(decode_frame(&mut buf).expect("decode").is_none());
        assert_eq!(buf.len(), frame.len() - 1, "partial frame must not be consumed");

        buf.put_slice(&frame[frame.len() - 1..]);
        assert_eq!(decode_frame(&mut buf).expect("decode"), Some(Message::ToggleReady));
        assert!(buf.is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.put_slice(&encode_frame(&Message::Hello { version: PROTOCOL_VERSION }).expect("a"));
        buf.put_slice(&encode_frame(&Message::StartSession).expect("b"));

        assert_eq!(
            decode_frame(&mut buf).expect("first"),
            Some(Message::Hello { version: PROTOCOL_VERSION })
        );
        assert_eq!(decode_frame(&mut buf).expect("second"), Some(Message::StartSession));
        assert_eq!(decode_frame(&mut buf).expect("empty"), None);
    }

    #[test]
    fn oversized_header_rejected() {
        let mut buf = BytesMut::from(&hex!("00 01 00 01")[..]);
        let result = decode_frame(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { size: 65_537, .. })));
    }

    #[test]
    fn header_is_big_endian_length() {
        let frame = encode_frame(&Message::StartSession).expect("encode");
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - FRAME_HEADER_SIZE);
    }
}
