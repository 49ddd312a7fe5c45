use crate::cache::ResponseCache;
use crate::config::ShadowingConfig;
use crate::error::{SynthesisError, SynthesisResult};
use crate::provider::{AudioSink, CachedSynthesizer, SpeechSynthesizer};
use crate::providers::{OnDeviceSpeaker, OneShotSynthesizer, StreamingSynthesizer};
use crate::types::BackendKind;
use log::info;
use std::sync::Arc;

/// The active audio backend of a session.
///
/// The on-device engine renders by itself; every other backend produces bytes
/// that are rendered through an [`AudioSink`].
#[derive(Clone)]
pub enum Backend {
    OnDevice(Arc<OnDeviceSpeaker>),
    Synthesized {
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
    },
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::OnDevice(_) => BackendKind::OnDevice,
            Backend::Synthesized { synthesizer, .. } => synthesizer.kind(),
        }
    }

    /// Stop whatever is speaking or rendering.
    pub fn cancel(&self) {
        match self {
            Backend::OnDevice(speaker) => speaker.cancel(),
            Backend::Synthesized { sink, .. } => sink.stop(),
        }
    }

    /// Backend for `config.backend`, rendering synthesized audio through `sink`.
    pub fn from_config(
        config: &ShadowingConfig,
        cache: Option<Arc<ResponseCache>>,
        sink: Arc<dyn AudioSink>,
    ) -> SynthesisResult<Self> {
        let backend = match config.backend {
            BackendKind::OnDevice => {
                Backend::OnDevice(Arc::new(OnDeviceSpeaker::from_config(&config.on_device)))
            }
            BackendKind::OneShot | BackendKind::Streaming => Backend::Synthesized {
                synthesizer: synthesizer_from_config(config, cache)?,
                sink,
            },
        };
        info!("Using the {} backend", backend.kind());
        Ok(backend)
    }

    /// Like [`Backend::from_config`] with the default output for this build:
    /// the audio device with the `playback` feature, an external player otherwise.
    pub fn with_default_sink(
        config: &ShadowingConfig,
        cache: Option<Arc<ResponseCache>>,
    ) -> SynthesisResult<Self> {
        Self::from_config(config, cache, default_sink(config))
    }
}

#[cfg(feature = "playback")]
fn default_sink(_config: &ShadowingConfig) -> Arc<dyn AudioSink> {
    Arc::new(crate::playback::RodioSink::new())
}

#[cfg(not(feature = "playback"))]
fn default_sink(config: &ShadowingConfig) -> Arc<dyn AudioSink> {
    Arc::new(crate::playback::CommandAudioSink::new(
        config.playback.player.clone(),
    ))
}

/// Byte-producing synthesizer for the configured cloud backend, wrapped in
/// the cache when one is given.
pub fn synthesizer_from_config(
    config: &ShadowingConfig,
    cache: Option<Arc<ResponseCache>>,
) -> SynthesisResult<Arc<dyn SpeechSynthesizer>> {
    let inner: Arc<dyn SpeechSynthesizer> = match config.backend {
        BackendKind::OnDevice => {
            return Err(SynthesisError::Configuration(
                "the on-device backend does not produce audio bytes; choose one_shot or streaming"
                    .to_string(),
            ));
        }
        BackendKind::OneShot => Arc::new(OneShotSynthesizer::new(
            config.credentials.clone(),
            config.one_shot.clone(),
        )?),
        BackendKind::Streaming => Arc::new(StreamingSynthesizer::new(
            config.credentials.clone(),
            config.streaming.clone(),
        )),
    };

    Ok(match cache {
        Some(cache) => Arc::new(CachedSynthesizer::new(inner, cache)),
        None => inner,
    })
}
