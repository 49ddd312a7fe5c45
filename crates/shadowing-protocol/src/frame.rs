//! Binary frame codec for the streaming TTS backend.
//!
//! Only wire version 1 is implemented: a 4-byte header (header size 1),
//! followed on outbound frames by a big-endian `u32` payload length and the
//! JSON payload. The older variant without a length field is not supported.
//!
//! ```text
//! byte 0: version (high nibble) | header size in 4-byte words (low nibble)
//! byte 1: message type (high nibble) | flags (low nibble)
//! byte 2: serialization (high nibble) | compression (low nibble)
//! byte 3: reserved
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

pub const PROTOCOL_VERSION: u8 = 0x1;
pub const HEADER_SIZE_WORDS: u8 = 0x1;
pub const SERIALIZATION_JSON: u8 = 0x1;
pub const COMPRESSION_NONE: u8 = 0x0;

/// Errors raised while building outbound frames.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to serialize request payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload of {0} bytes does not fit in a u32 length field")]
    PayloadTooLarge(usize),
}

/// Message types carried in the high nibble of the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    FullClientRequest,
    AudioOnlyResponse,
    ErrorResponse,
    Other(u8),
}

impl MessageType {
    pub fn from_nibble(value: u8) -> Self {
        match value {
            0x1 => MessageType::FullClientRequest,
            0xB => MessageType::AudioOnlyResponse,
            0xF => MessageType::ErrorResponse,
            other => MessageType::Other(other),
        }
    }

    pub fn nibble(&self) -> u8 {
        match self {
            MessageType::FullClientRequest => 0x1,
            MessageType::AudioOnlyResponse => 0xB,
            MessageType::ErrorResponse => 0xF,
            MessageType::Other(value) => *value,
        }
    }
}

/// Parsed form of the fixed 4-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub header_size: u8,
    pub message_type: MessageType,
    pub flags: u8,
    pub serialization: u8,
    pub compression: u8,
}

impl FrameHeader {
    /// Header of a JSON full-client-request with no flags.
    pub fn full_client_request() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            header_size: HEADER_SIZE_WORDS,
            message_type: MessageType::FullClientRequest,
            flags: 0,
            serialization: SERIALIZATION_JSON,
            compression: COMPRESSION_NONE,
        }
    }

    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < 4 {
            return None;
        }
        Some(Self {
            version: frame[0] >> 4,
            header_size: frame[0] & 0x0F,
            message_type: MessageType::from_nibble(frame[1] >> 4),
            flags: frame[1] & 0x0F,
            serialization: frame[2] >> 4,
            compression: frame[2] & 0x0F,
        })
    }

    /// Header length in bytes.
    pub fn len(&self) -> usize {
        self.header_size as usize * 4
    }

    pub fn is_empty(&self) -> bool {
        self.header_size == 0
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.version << 4) | (self.header_size & 0x0F),
            (self.message_type.nibble() << 4) | (self.flags & 0x0F),
            (self.serialization << 4) | (self.compression & 0x0F),
            0x00,
        ]
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Audio block of an audio response. Empty when the frame was too short
    /// to carry one.
    Audio(Bytes),
    /// Error response from the service.
    Error { code: u32, message: String },
    /// Any other message type, or a frame shorter than its header.
    Unrecognized,
}

/// Serialize `request` as JSON and wrap it in a full-client-request frame.
pub fn encode_request<T: Serialize>(request: &T) -> Result<Bytes, FrameError> {
    let payload = serde_json::to_vec(request)?;
    let length =
        u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_slice(&FrameHeader::full_client_request().to_bytes());
    buf.put_u32(length);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode one inbound frame. Never panics on truncated or padded input.
pub fn decode_frame(frame: &[u8]) -> InboundFrame {
    let Some(header) = FrameHeader::parse(frame) else {
        return InboundFrame::Unrecognized;
    };
    let payload = frame.get(header.len().max(4)..).unwrap_or_default();

    match header.message_type {
        MessageType::AudioOnlyResponse => InboundFrame::Audio(extract_audio(payload)),
        MessageType::ErrorResponse => {
            let mut reader = PayloadReader::new(payload);
            let code = reader.read_u32().unwrap_or(0);
            let message = String::from_utf8_lossy(reader.rest()).into_owned();
            InboundFrame::Error { code, message }
        }
        _ => InboundFrame::Unrecognized,
    }
}

// event code, length-prefixed session id, length-prefixed audio block
fn extract_audio(payload: &[u8]) -> Bytes {
    let mut reader = PayloadReader::new(payload);
    let audio = reader
        .read_u32()
        .and_then(|_event| reader.read_prefixed())
        .and_then(|_session_id| reader.read_prefixed());
    match audio {
        Some(block) => Bytes::copy_from_slice(block),
        None => Bytes::new(),
    }
}

struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos.checked_add(4)?)?;
        self.pos += 4;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_prefixed(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u32()? as usize;
        let end = self.pos.checked_add(len)?;
        let block = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(block)
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn audio_frame(session_id: &[u8], audio: &[u8], padding: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x11, 0xB0, 0x10, 0x00];
        frame.extend_from_slice(&352u32.to_be_bytes());
        frame.extend_from_slice(&(session_id.len() as u32).to_be_bytes());
        frame.extend_from_slice(session_id);
        frame.extend_from_slice(&(audio.len() as u32).to_be_bytes());
        frame.extend_from_slice(audio);
        frame.extend_from_slice(padding);
        frame
    }

    #[test]
    fn test_encode_request_layout() {
        let request = json!({"req_params": {"text": "Hi."}});
        let frame = encode_request(&request).unwrap();
        let payload = serde_json::to_vec(&request).unwrap();

        assert_eq!(&frame[..4], &[0x11, 0x10, 0x10, 0x00]);
        assert_eq!(&frame[4..8], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&frame[8..], payload.as_slice());
    }

    #[test]
    fn test_header_parse_of_encoded_request() {
        let frame = encode_request(&json!({})).unwrap();
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header, FrameHeader::full_client_request());
        assert_eq!(header.len(), 4);
    }

    #[test]
    fn test_decode_audio_extracts_exact_block() {
        let audio = [1u8, 2, 3, 4, 5, 250];
        let frame = audio_frame(b"session-42", &audio, &[]);
        assert_eq!(decode_frame(&frame), InboundFrame::Audio(Bytes::copy_from_slice(&audio)));
    }

    #[test]
    fn test_decode_audio_ignores_trailing_padding() {
        let audio = [9u8; 17];
        let frame = audio_frame(b"abc", &audio, &[0, 0, 0, 0, 0xFF]);
        assert_eq!(decode_frame(&frame), InboundFrame::Audio(Bytes::copy_from_slice(&audio)));
    }

    #[test]
    fn test_decode_truncated_audio_yields_no_data() {
        let mut frame = audio_frame(b"abc", &[7u8; 32], &[]);
        frame.truncate(frame.len() - 10);
        assert_eq!(decode_frame(&frame), InboundFrame::Audio(Bytes::new()));

        // header and event code only
        assert_eq!(
            decode_frame(&[0x11, 0xB0, 0x10, 0x00, 0, 0, 1, 96]),
            InboundFrame::Audio(Bytes::new())
        );
    }

    #[test]
    fn test_decode_error_frame() {
        let mut frame = vec![0x11, 0xF0, 0x10, 0x00];
        frame.extend_from_slice(&45000001u32.to_be_bytes());
        frame.extend_from_slice("invalid speaker".as_bytes());

        assert_eq!(
            decode_frame(&frame),
            InboundFrame::Error {
                code: 45000001,
                message: "invalid speaker".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_short_error_frame() {
        assert_eq!(
            decode_frame(&[0x11, 0xF0, 0x10, 0x00, 0x01]),
            InboundFrame::Error {
                code: 0,
                message: "\u{1}".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_unrecognized() {
        assert_eq!(decode_frame(&[]), InboundFrame::Unrecognized);
        assert_eq!(decode_frame(&[0x11, 0xB0]), InboundFrame::Unrecognized);
        assert_eq!(
            decode_frame(&[0x11, 0x90, 0x10, 0x00, 1, 2, 3]),
            InboundFrame::Unrecognized
        );
    }

    #[test]
    fn test_decode_respects_larger_header_size() {
        let audio = [4u8, 5, 6];
        let mut frame = vec![0x12, 0xB0, 0x10, 0x00, 0xAA, 0xBB, 0xCC, 0xDD];
        frame.extend_from_slice(&audio_frame(b"", &audio, &[])[4..]);
        assert_eq!(decode_frame(&frame), InboundFrame::Audio(Bytes::copy_from_slice(&audio)));
    }
}
