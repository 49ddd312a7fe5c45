use crate::error::{SynthesisError, SynthesisResult};
use crate::provider::SpeechSynthesizer;
use crate::types::{AudioPayload, SynthesisRequest};
use log::{debug, info};
use std::sync::Arc;

/// Synthesizes a whole sentence list into one payload, one call at a time.
pub struct BatchAssembler {
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl BatchAssembler {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synthesizer }
    }

    pub async fn synthesize_all(
        &self,
        sentences: &[String],
        voice: &str,
        speed: f32,
    ) -> SynthesisResult<AudioPayload> {
        self.synthesize_all_with_progress(sentences, voice, speed, |_, _| {})
            .await
    }

    /// Sequential synthesis in input order. `on_progress(step, total)` is
    /// called with the 1-based step as each step begins. The first failure
    /// aborts the batch and is returned unchanged.
    pub async fn synthesize_all_with_progress<F>(
        &self,
        sentences: &[String],
        voice: &str,
        speed: f32,
        mut on_progress: F,
    ) -> SynthesisResult<AudioPayload>
    where
        F: FnMut(usize, usize) + Send,
    {
        if sentences.is_empty() {
            return Err(SynthesisError::Configuration(
                "no sentences to synthesize".to_string(),
            ));
        }

        let total = sentences.len();
        let mut parts = Vec::with_capacity(total);
        for (i, sentence) in sentences.iter().enumerate() {
            on_progress(i + 1, total);
            debug!("Batch step {}/{}", i + 1, total);
            let request = SynthesisRequest::new(sentence.as_str(), voice, speed);
            parts.push(self.synthesizer.synthesize(&request).await?);
        }

        let merged = AudioPayload::concat(&parts)?;
        info!(
            "Assembled {} sentences into {} bytes",
            total,
            merged.len()
        );
        Ok(merged)
    }
}
