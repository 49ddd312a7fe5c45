//! One-shot HTTP backend: one POST per sentence, base64 audio in a JSON body.

use crate::audio::decode_base64;
use crate::config::{Credentials, OneShotConfig};
use crate::error::{SynthesisError, SynthesisResult};
use crate::provider::SpeechSynthesizer;
use crate::types::{AudioPayload, BackendKind, SynthesisRequest};
use async_trait::async_trait;
use log::debug;
use reqwest::Url;
use shadowing_protocol::{
    OneShotApp, OneShotAudio, OneShotRequest, OneShotRequestBody, OneShotResponse, UserInfo,
};

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Cloud synthesizer speaking the one-shot JSON protocol
pub struct OneShotSynthesizer {
    client: reqwest::Client,
    credentials: Credentials,
    config: OneShotConfig,
}

impl OneShotSynthesizer {
    pub fn new(credentials: Credentials, config: OneShotConfig) -> SynthesisResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                SynthesisError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            credentials,
            config,
        })
    }

    /// Where the POST goes: the endpoint itself, or the proxy with the
    /// endpoint passed as its `url` query parameter.
    pub fn request_url(&self) -> SynthesisResult<Url> {
        match &self.config.proxy_url {
            Some(proxy) => Url::parse_with_params(proxy, &[("url", self.config.endpoint.as_str())])
                .map_err(|e| SynthesisError::Configuration(format!("invalid proxy_url {proxy}: {e}"))),
            None => Url::parse(&self.config.endpoint).map_err(|e| {
                SynthesisError::Configuration(format!(
                    "invalid endpoint {}: {e}",
                    self.config.endpoint
                ))
            }),
        }
    }

    fn request_body(
        &self,
        app_id: &str,
        token: &str,
        request: &SynthesisRequest,
    ) -> OneShotRequestBody {
        OneShotRequestBody {
            app: OneShotApp {
                appid: app_id.to_string(),
                token: token.to_string(),
                cluster: self.config.cluster.clone(),
            },
            user: UserInfo {
                uid: self.config.uid.clone(),
            },
            audio: OneShotAudio {
                voice_type: request.voice.clone(),
                encoding: self.config.encoding.as_str().to_string(),
                speed_ratio: request.speed,
                rate: self.config.sample_rate,
            },
            request: OneShotRequest {
                reqid: uuid::Uuid::new_v4().to_string(),
                text: request.text.clone(),
                operation: "query".to_string(),
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OneShotSynthesizer {
    fn kind(&self) -> BackendKind {
        BackendKind::OneShot
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> SynthesisResult<AudioPayload> {
        let (app_id, token) = self.credentials.require(BackendKind::OneShot)?;
        let url = self.request_url()?;
        let body = self.request_body(app_id, token, request);

        debug!(
            "POST {} ({} chars, voice {})",
            self.config.endpoint,
            request.text.len(),
            request.voice
        );

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::unreachable(BackendKind::OneShot, &self.config.endpoint, e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            SynthesisError::transport(
                BackendKind::OneShot,
                format!("failed to read response body: {e}"),
            )
        })?;

        let parsed: OneShotResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(SynthesisError::Application {
                    backend: BackendKind::OneShot,
                    code: i64::from(status.as_u16()),
                    message: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                });
            }
            Err(e) => {
                return Err(SynthesisError::protocol(format!(
                    "unparseable one-shot response: {e}"
                )));
            }
        };

        if !parsed.is_success() {
            return Err(SynthesisError::Application {
                backend: BackendKind::OneShot,
                code: parsed.code,
                message: parsed.message.unwrap_or_default(),
            });
        }

        let data = parsed
            .data
            .filter(|data| !data.trim().is_empty())
            .ok_or_else(|| SynthesisError::protocol("one-shot response carried no audio data"))?;
        let bytes = decode_base64(&data)?;
        if bytes.is_empty() {
            return Err(SynthesisError::protocol("one-shot response decoded to zero bytes"));
        }

        Ok(AudioPayload::new(
            bytes,
            self.config.encoding.audio_encoding(self.config.sample_rate),
        ))
    }
}
