//! Session configuration, loaded from a plain JSON settings file.

use crate::error::{SynthesisError, SynthesisResult};
use crate::types::{AudioEncoding, BackendKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const APP_ID_ENV: &str = "SHADOWING_APP_ID";
pub const ACCESS_TOKEN_ENV: &str = "SHADOWING_ACCESS_TOKEN";
pub const PROXY_URL_ENV: &str = "SHADOWING_PROXY_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level settings for one shadowing session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowingConfig {
    /// Active audio backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Cloud voice identifier
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Synthesis speed ratio sent to cloud backends (0.2 - 3.0)
    #[serde(default = "default_speed")]
    pub speed: f32,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub one_shot: OneShotConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub on_device: OnDeviceConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_voice() -> String {
    "en_female_amanda_mars_bigtts".to_string()
}

fn default_speed() -> f32 {
    1.0
}

impl Default for ShadowingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            voice: default_voice(),
            speed: default_speed(),
            credentials: Credentials::default(),
            playback: PlaybackConfig::default(),
            one_shot: OneShotConfig::default(),
            streaming: StreamingConfig::default(),
            on_device: OnDeviceConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ShadowingConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ShadowingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill credentials and proxy from the environment when they are unset.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.credentials.app_id.is_none() {
            self.credentials.app_id = non_empty(APP_ID_ENV);
        }
        if self.credentials.access_token.is_none() {
            self.credentials.access_token = non_empty(ACCESS_TOKEN_ENV);
        }
        if self.one_shot.proxy_url.is_none() {
            self.one_shot.proxy_url = non_empty(PROXY_URL_ENV);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.2..=3.0).contains(&self.speed) {
            return Err(ConfigError::ValidationError(format!(
                "speed must be between 0.2 and 3.0, got {}",
                self.speed
            )));
        }
        if self.voice.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "voice must not be empty".to_string(),
            ));
        }
        if self.playback.rate <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "playback.rate must be positive, got {}",
                self.playback.rate
            )));
        }
        if self.one_shot.sample_rate == 0 || self.streaming.sample_rate == 0 {
            return Err(ConfigError::ValidationError(
                "sample_rate must be positive".to_string(),
            ));
        }
        if self.one_shot.timeout_secs == 0 || self.streaming.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// App credentials shared by both cloud backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Credentials {
    pub fn new(app_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            access_token: Some(access_token.into()),
        }
    }

    /// App id and token, or a configuration error naming the backend.
    pub fn require(&self, backend: BackendKind) -> SynthesisResult<(&str, &str)> {
        let app_id = self.app_id.as_deref().filter(|v| !v.is_empty());
        let token = self.access_token.as_deref().filter(|v| !v.is_empty());
        match (app_id, token) {
            (Some(app_id), Some(token)) => Ok((app_id, token)),
            (None, _) => Err(SynthesisError::Configuration(format!(
                "missing app id for the {backend} backend"
            ))),
            (_, None) => Err(SynthesisError::Configuration(format!(
                "missing access token for the {backend} backend"
            ))),
        }
    }
}

/// Sequencer behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Local playback rate multiplier
    #[serde(default = "default_rate")]
    pub rate: f32,

    /// Pause between sentences
    #[serde(default = "default_delay_ms")]
    pub inter_sentence_delay_ms: u64,

    /// Repeat the current sentence instead of advancing
    #[serde(default)]
    pub loop_current: bool,

    /// External player used for synthesized audio when no audio device
    /// support is compiled in
    #[serde(default)]
    pub player: PlayerConfig,
}

fn default_rate() -> f32 {
    1.0
}

fn default_delay_ms() -> u64 {
    500
}

impl PlaybackConfig {
    pub fn inter_sentence_delay(&self) -> Duration {
        Duration::from_millis(self.inter_sentence_delay_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            inter_sentence_delay_ms: default_delay_ms(),
            loop_current: false,
            player: PlayerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_program")]
    pub program: String,
    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
}

fn default_player_program() -> String {
    "ffplay".to_string()
}

fn default_player_args() -> Vec<String> {
    ["-nodisp", "-autoexit", "-loglevel", "quiet"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: default_player_program(),
            args: default_player_args(),
        }
    }
}

/// Encoding requested from the one-shot backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HttpEncoding {
    #[default]
    Mp3,
    Pcm,
}

impl HttpEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpEncoding::Mp3 => "mp3",
            HttpEncoding::Pcm => "pcm",
        }
    }

    pub fn audio_encoding(&self, sample_rate: u32) -> AudioEncoding {
        match self {
            HttpEncoding::Mp3 => AudioEncoding::Mp3,
            HttpEncoding::Pcm => AudioEncoding::Pcm16 { sample_rate },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneShotConfig {
    #[serde(default = "default_one_shot_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default)]
    pub encoding: HttpEncoding,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_one_shot_timeout")]
    pub timeout_secs: u64,
    /// Request-rewriting proxy; the real endpoint is passed as `?url=`
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default = "default_uid")]
    pub uid: String,
}

fn default_one_shot_endpoint() -> String {
    "https://openspeech.bytedance.com/api/v1/tts".to_string()
}

fn default_cluster() -> String {
    "volcano_tts".to_string()
}

fn default_sample_rate() -> u32 {
    24000
}

fn default_one_shot_timeout() -> u64 {
    30
}

fn default_uid() -> String {
    "shadowing-learner".to_string()
}

impl OneShotConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OneShotConfig {
    fn default() -> Self {
        Self {
            endpoint: default_one_shot_endpoint(),
            cluster: default_cluster(),
            encoding: HttpEncoding::default(),
            sample_rate: default_sample_rate(),
            timeout_secs: default_one_shot_timeout(),
            proxy_url: None,
            uid: default_uid(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_streaming_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_resource_id")]
    pub resource_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Hard wall-clock limit for one streaming call
    #[serde(default = "default_streaming_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_uid")]
    pub uid: String,
}

fn default_streaming_endpoint() -> String {
    "wss://openspeech.bytedance.com/api/v3/tts/unidirectional/stream".to_string()
}

fn default_resource_id() -> String {
    "seed-tts-1.0".to_string()
}

fn default_streaming_timeout() -> u64 {
    20
}

impl StreamingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_streaming_endpoint(),
            resource_id: default_resource_id(),
            sample_rate: default_sample_rate(),
            timeout_secs: default_streaming_timeout(),
            uid: default_uid(),
        }
    }
}

/// Platform speech command used by the on-device backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnDeviceConfig {
    #[serde(default = "default_speech_program")]
    pub program: String,
    /// Flag preceding the voice name; the voice is omitted when unset
    #[serde(default = "default_voice_flag")]
    pub voice_flag: String,
    /// Flag preceding the words-per-minute value
    #[serde(default = "default_rate_flag")]
    pub rate_flag: String,
    /// Words per minute at rate 1.0
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: u32,
    #[serde(default)]
    pub voice: Option<String>,
}

#[cfg(target_os = "macos")]
fn default_speech_program() -> String {
    "say".to_string()
}

#[cfg(not(target_os = "macos"))]
fn default_speech_program() -> String {
    "espeak-ng".to_string()
}

fn default_voice_flag() -> String {
    "-v".to_string()
}

#[cfg(target_os = "macos")]
fn default_rate_flag() -> String {
    "-r".to_string()
}

#[cfg(not(target_os = "macos"))]
fn default_rate_flag() -> String {
    "-s".to_string()
}

fn default_words_per_minute() -> u32 {
    175
}

impl Default for OnDeviceConfig {
    fn default() -> Self {
        Self {
            program: default_speech_program(),
            voice_flag: default_voice_flag(),
            rate_flag: default_rate_flag(),
            words_per_minute: default_words_per_minute(),
            voice: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Cache file; defaults to the platform cache directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_cache_enabled() -> bool {
    true
}

impl CacheConfig {
    /// Resolved cache file location, if any can be determined.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            dirs::cache_dir().map(|dir| dir.join("shadowing").join("audio-cache.json"))
        })
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            path: None,
        }
    }
}
