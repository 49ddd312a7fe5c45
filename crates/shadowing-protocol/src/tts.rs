//! JSON bodies exchanged with the cloud TTS backends.

use serde::{Deserialize, Serialize};

/// Application-level success code of the one-shot HTTP backend.
pub const ONE_SHOT_SUCCESS_CODE: i64 = 3000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: String,
}

/// First and only request frame sent on a streaming connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingRequest {
    pub user: UserInfo,
    pub req_params: StreamingReqParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingReqParams {
    pub text: String,
    pub speaker: String,
    pub audio_params: AudioParams,
    pub reqid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub speed_ratio: f32,
}

impl AudioParams {
    /// 24 kHz 16-bit PCM, the only format the streaming adapter requests.
    pub fn pcm(sample_rate: u32, speed_ratio: f32) -> Self {
        Self {
            format: "pcm".to_string(),
            sample_rate,
            speed_ratio,
        }
    }
}

/// Body of the one-shot synthesis POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneShotRequestBody {
    pub app: OneShotApp,
    pub user: UserInfo,
    pub audio: OneShotAudio,
    pub request: OneShotRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneShotApp {
    pub appid: String,
    pub token: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneShotAudio {
    pub voice_type: String,
    pub encoding: String,
    pub speed_ratio: f32,
    pub rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneShotRequest {
    pub reqid: String,
    pub text: String,
    pub operation: String,
}

/// Response of the one-shot backend. `data` is base64 audio on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneShotResponse {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reqid: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl OneShotResponse {
    pub fn is_success(&self) -> bool {
        self.code == ONE_SHOT_SUCCESS_CODE
    }
}
