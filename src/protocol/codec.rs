//! Wire framing.
//!
//! Every message travels as one frame: a big-endian `u32` payload length
//! followed by the JSON payload. Stream transports feed raw bytes into a
//! [`FrameDecoder`]; message transports carry one whole frame per message
//! and use [`decode`] directly.

use crate::error::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

const HEADER_LEN: usize = 4;

/// Frames above this size are rejected as corrupt.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a message as a complete frame.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, TransportError> {
    let payload = serde_json::to_vec(message).map_err(|e| TransportError::Protocol(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode exactly one complete frame.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, TransportError> {
    if frame.len() < HEADER_LEN {
        return Err(TransportError::Protocol("truncated frame header".into()));
    }
    let mut header = &frame[..HEADER_LEN];
    let len = header.get_u32() as usize;
    let payload = &frame[HEADER_LEN..];
    if payload.len() != len {
        return Err(TransportError::Protocol(format!(
            "frame length {} does not match header {}",
            payload.len(),
            len
        )));
    }
    serde_json::from_slice(payload).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Reassembles frames from an arbitrarily chunked byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes received but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, header included, if one has fully arrived.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = (&self.buf[..HEADER_LEN]).get_u32() as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!("frame of {} bytes exceeds limit", len)));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        Ok(Some(self.buf.split_to(HEADER_LEN + len).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, ServerMessage};
    use crate::sync::VectorClock;

    #[test]
    fn test_frame_layout() {
        let frame = encode(&ServerMessage::Ack { batch: 3 }).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let json: serde_json::Value = serde_json::from_slice(&frame[4..]).unwrap();
        assert_eq!(json["type"], "ack");
    }

    #[test]
    fn test_decoder_handles_split_and_coalesced_chunks() {
        let hello = encode(&ClientMessage::Hello {
            replica: "a".into(),
            known: VectorClock::new(),
        })
        .unwrap();
        let rename = encode(&ClientMessage::Rename { title: "Notes".into() }).unwrap();
        let mut stream = hello.to_vec();
        stream.extend_from_slice(&rename);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream[..3]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&stream[3..]);

        let first = decoder.next_frame().unwrap().unwrap();
        let second = decoder.next_frame().unwrap().unwrap();
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);

        assert!(matches!(decode(&first).unwrap(), ClientMessage::Hello { .. }));
        assert_eq!(
            decode::<ClientMessage>(&second).unwrap(),
            ClientMessage::Rename { title: "Notes".into() }
        );
    }

    #[test]
    fn test_rejects_bad_frames() {
        assert!(decode::<ServerMessage>(&[0, 0]).is_err());
        assert!(decode::<ServerMessage>(&[0, 0, 0, 9, b'{', b'}']).is_err());
        assert!(decode::<ServerMessage>(&[0, 0, 0, 2, b'{', b'}']).is_err());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(decoder.next_frame(), Err(TransportError::Protocol(_))));
    }
}
