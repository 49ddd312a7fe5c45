use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The interchangeable audio backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Platform speech engine, no byte access
    #[default]
    OnDevice,
    /// Single HTTP request/response
    OneShot,
    /// Persistent binary-framed WebSocket connection
    Streaming,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::OnDevice => write!(f, "on-device"),
            BackendKind::OneShot => write!(f, "one-shot"),
            BackendKind::Streaming => write!(f, "streaming"),
        }
    }
}

/// One sentence to synthesize. Text, voice and speed form the cache key.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>, speed: f32) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            speed,
        }
    }
}

/// Sample format of an [`AudioPayload`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Raw 16-bit little-endian mono PCM
    Pcm16 { sample_rate: u32 },
    Mp3,
}

impl AudioEncoding {
    /// MIME type of the downloadable artifact built from this encoding.
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioEncoding::Pcm16 { .. } => "audio/wav",
            AudioEncoding::Mp3 => "audio/mpeg",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            AudioEncoding::Pcm16 { .. } => "wav",
            AudioEncoding::Mp3 => "mp3",
        }
    }
}

/// Decoded audio bytes produced by one backend call
#[derive(Clone, Debug, PartialEq)]
pub struct AudioPayload {
    pub data: Bytes,
    pub encoding: AudioEncoding,
}

impl AudioPayload {
    pub fn new(data: impl Into<Bytes>, encoding: AudioEncoding) -> Self {
        Self {
            data: data.into(),
            encoding,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Serialize for AudioPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("AudioPayload", 2)?;

        // Serialize audio bytes as base64
        let base64_data =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &self.data);

        state.serialize_field("data", &base64_data)?;
        state.serialize_field("encoding", &self.encoding)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for AudioPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct AudioPayloadHelper {
            data: String,
            encoding: AudioEncoding,
        }

        let helper = AudioPayloadHelper::deserialize(deserializer)?;

        let data = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &helper.data)
            .map_err(serde::de::Error::custom)?;

        Ok(AudioPayload {
            data: Bytes::from(data),
            encoding: helper.encoding,
        })
    }
}

/// Download-ready merged audio
#[derive(Clone, Debug, PartialEq)]
pub struct AudioArtifact {
    pub bytes: Bytes,
    pub mime_type: &'static str,
}

/// How a rendered utterance or audio clip ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Finished,
    /// Cancelled or cut off; expected, not an error
    Interrupted,
}
