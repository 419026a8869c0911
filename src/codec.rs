//! Length-prefixed line framing used by apcupsd's network information server.
//!
//! Every frame is a 2-byte big-endian length followed by exactly that many
//! ASCII bytes. Requests and response lines share the same framing.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Encoded `status` command: length 6 followed by the literal bytes.
pub const STATUS_REQUEST: [u8; 8] = [0x00, 0x06, b's', b't', b'a', b't', b'u', b's'];

const HEADER_LEN: usize = 2;
const PREVIEW_CHARS: usize = 32;

/// Decode one complete frame into its text line.
pub fn decode_line(frame: &[u8]) -> Result<String, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::TooShort { len: frame.len() });
    }
    let expected = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let payload = &frame[HEADER_LEN..];
    if expected != payload.len() {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: payload.len(),
            preview: String::from_utf8_lossy(payload)
                .chars()
                .take(PREVIEW_CHARS)
                .collect(),
        });
    }
    Ok(String::from_utf8_lossy(payload).into_owned())
}

/// Prepend the 2-byte big-endian length to `payload`.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::TooLong { len: payload.len() })?;
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u16(len);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// Cuts whole frames (header included) out of a byte stream.
///
/// Frames are handed out raw so the caller decides what a malformed line
/// means; see [`crate::status::classify`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(total)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let leftover = src.remaining();
                src.clear();
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream closed with {leftover} byte(s) of a partial frame"),
                ))
            }
        }
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame =
            encode_frame(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
