use crate::cache::ResponseCache;
use crate::error::SynthesisResult;
use crate::types::{AudioPayload, BackendKind, RenderOutcome, SynthesisRequest};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

/// Backend that turns one sentence into audio bytes
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Which backend answers requests
    fn kind(&self) -> BackendKind;

    /// Synthesize a single sentence (required)
    ///
    /// # Arguments
    /// * `request` - Sentence text, voice and speed
    ///
    /// # Returns
    /// Non-empty audio payload, or the backend's error
    async fn synthesize(&self, request: &SynthesisRequest) -> SynthesisResult<AudioPayload>;
}

/// Output device for synthesized audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Render `payload` at the given playback rate until it finishes or
    /// [`AudioSink::stop`] is called.
    async fn play(&self, payload: &AudioPayload, rate: f32) -> SynthesisResult<RenderOutcome>;

    /// Cut off whatever is rendering. No-op when idle.
    fn stop(&self);
}

/// Synthesizer decorator that consults a [`ResponseCache`] first and stores
/// every successful result.
#[derive(Clone)]
pub struct CachedSynthesizer {
    inner: Arc<dyn SpeechSynthesizer>,
    cache: Arc<ResponseCache>,
}

impl CachedSynthesizer {
    pub fn new(inner: Arc<dyn SpeechSynthesizer>, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}

#[async_trait]
impl SpeechSynthesizer for CachedSynthesizer {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> SynthesisResult<AudioPayload> {
        if let Some(payload) = self.cache.lookup(request) {
            return Ok(payload);
        }

        let payload = self.inner.synthesize(request).await?;
        debug!(
            "Caching {} bytes from the {} backend",
            payload.len(),
            self.inner.kind()
        );
        if self.cache.path().is_some() {
            let cache = Arc::clone(&self.cache);
            let request = request.clone();
            let stored = payload.clone();
            // file-backed stores touch the disk
            if let Err(e) = tokio::task::spawn_blocking(move || cache.store(&request, stored)).await
            {
                warn!("Failed to cache synthesized audio: {}", e);
            }
        } else {
            self.cache.store(request, payload.clone());
        }
        Ok(payload)
    }
}
