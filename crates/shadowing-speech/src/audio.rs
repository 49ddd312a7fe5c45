//! Byte-level helpers: base64 decoding, ordered concatenation and the
//! minimal WAV container used for PCM downloads.

use crate::error::{SynthesisError, SynthesisResult};
use crate::types::{AudioArtifact, AudioEncoding, AudioPayload};
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the RIFF/WAVE header written by [`wav_header`].
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const MONO: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Decode a standard base64 audio field.
pub fn decode_base64(data: &str) -> SynthesisResult<Bytes> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map(Bytes::from)
        .map_err(|e| SynthesisError::protocol(format!("invalid base64 audio data: {e}")))
}

/// Concatenate byte buffers in iteration order.
pub fn concat_chunks<I, B>(chunks: I) -> Bytes
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut buf = BytesMut::new();
    for chunk in chunks {
        buf.put_slice(chunk.as_ref());
    }
    buf.freeze()
}

// largest data length whose RIFF chunk size still fits in a u32
const MAX_WAV_DATA_LEN: u32 = u32::MAX - 36;

/// 44-byte header for `data_len` bytes of mono 16-bit PCM.
pub fn wav_header(data_len: u32, sample_rate: u32) -> [u8; WAV_HEADER_LEN] {
    let block_align = MONO * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate.saturating_mul(u32::from(block_align));

    let mut buf = BytesMut::with_capacity(WAV_HEADER_LEN);
    buf.put_slice(b"RIFF");
    buf.put_u32_le(data_len.saturating_add(36));
    buf.put_slice(b"WAVE");
    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(PCM_FORMAT_TAG);
    buf.put_u16_le(MONO);
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align);
    buf.put_u16_le(BITS_PER_SAMPLE);
    buf.put_slice(b"data");
    buf.put_u32_le(data_len);

    let mut header = [0u8; WAV_HEADER_LEN];
    header.copy_from_slice(&buf);
    header
}

/// Prepend a WAV header to raw PCM bytes.
pub fn wrap_pcm_as_wav(pcm: &[u8], sample_rate: u32) -> Bytes {
    // RIFF sizes are u32; longer inputs are clamped in the header only
    let data_len = u32::try_from(pcm.len())
        .unwrap_or(u32::MAX)
        .min(MAX_WAV_DATA_LEN);
    let mut buf = BytesMut::with_capacity(WAV_HEADER_LEN + pcm.len());
    buf.put_slice(&wav_header(data_len, sample_rate));
    buf.put_slice(pcm);
    buf.freeze()
}

/// Little-endian 16-bit PCM as normalized `f32` samples. A trailing odd
/// byte is dropped.
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

impl AudioPayload {
    /// Merge payloads in order. All parts must share one encoding.
    pub fn concat(parts: &[AudioPayload]) -> SynthesisResult<AudioPayload> {
        let Some(first) = parts.first() else {
            return Err(SynthesisError::protocol("no audio parts to merge"));
        };
        if let Some(other) = parts.iter().find(|p| p.encoding != first.encoding) {
            return Err(SynthesisError::protocol(format!(
                "cannot merge {:?} audio with {:?} audio",
                first.encoding, other.encoding
            )));
        }
        Ok(AudioPayload::new(
            concat_chunks(parts.iter().map(|p| &p.data)),
            first.encoding,
        ))
    }

    /// Turn the payload into a downloadable artifact. PCM gets a WAV header,
    /// MP3 is passed through untouched.
    pub fn into_artifact(self) -> AudioArtifact {
        let mime_type = self.encoding.mime_type();
        let bytes = match self.encoding {
            AudioEncoding::Pcm16 { sample_rate } => wrap_pcm_as_wav(&self.data, sample_rate),
            AudioEncoding::Mp3 => self.data,
        };
        AudioArtifact { bytes, mime_type }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    #[test]
    fn test_wav_header_fields() {
        let pcm = vec![0x11u8; 1000];
        let wav = wrap_pcm_as_wav(&pcm, 24000);

        assert_eq!(wav.len(), WAV_HEADER_LEN + 1000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(le_u32(&wav, 4), 36 + 1000);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(le_u32(&wav, 16), 16);
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        assert_eq!(le_u32(&wav, 24), 24000);
        assert_eq!(le_u32(&wav, 28), 48000);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(le_u32(&wav, 40), 1000);
        assert_eq!(&wav[44..], pcm.as_slice());
    }

    #[test]
    fn test_empty_pcm_header() {
        let header = wav_header(0, 16000);
        assert_eq!(le_u32(&header, 4), 36);
        assert_eq!(le_u32(&header, 40), 0);
    }

    #[test]
    fn test_header_sizes_saturate_near_u32_max() {
        let header = wav_header(u32::MAX - 10, u32::MAX);
        assert_eq!(le_u32(&header, 4), u32::MAX);
        assert_eq!(le_u32(&header, 28), u32::MAX);
        assert_eq!(le_u32(&header, 40), u32::MAX - 10);

        let header = wav_header(MAX_WAV_DATA_LEN, 24000);
        assert_eq!(le_u32(&header, 4), u32::MAX);
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("AAEC").unwrap(), Bytes::from_static(&[0, 1, 2]));
        assert!(matches!(
            decode_base64("not base64!"),
            Err(SynthesisError::Protocol(_))
        ));
    }

    #[test]
    fn test_concat_preserves_order() {
        let merged = concat_chunks([&b"ab"[..], &b""[..], &b"cde"[..]]);
        assert_eq!(merged, Bytes::from_static(b"abcde"));
    }

    #[test]
    fn test_pcm16_to_f32() {
        let samples = pcm16_to_f32(&[0x00, 0x00, 0x00, 0x80, 0xFF, 0x7F, 0x01]);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], -1.0);
        assert!((samples[2] - 32767.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_payload_concat_rejects_mixed_encodings() {
        let pcm = AudioPayload::new(vec![1u8, 2], AudioEncoding::Pcm16 { sample_rate: 24000 });
        let mp3 = AudioPayload::new(vec![3u8], AudioEncoding::Mp3);
        assert!(AudioPayload::concat(&[pcm.clone(), mp3]).is_err());
        assert!(AudioPayload::concat(&[]).is_err());

        let merged = AudioPayload::concat(&[pcm.clone(), pcm]).unwrap();
        assert_eq!(merged.data, Bytes::from_static(&[1, 2, 1, 2]));
    }

    #[test]
    fn test_mp3_artifact_is_not_wrapped() {
        let artifact = AudioPayload::new(vec![0xFFu8, 0xFB, 0x90], AudioEncoding::Mp3).into_artifact();
        assert_eq!(artifact.mime_type, "audio/mpeg");
        assert_eq!(artifact.bytes, Bytes::from_static(&[0xFF, 0xFB, 0x90]));

        let artifact = AudioPayload::new(vec![0u8; 4], AudioEncoding::Pcm16 { sample_rate: 24000 })
            .into_artifact();
        assert_eq!(artifact.mime_type, "audio/wav");
        assert_eq!(artifact.bytes.len(), WAV_HEADER_LEN + 4);
    }
}
