//! On-device speech: the platform engine renders audio itself and never
//! hands bytes back, so it cannot be cached or exported.

use crate::config::OnDeviceConfig;
use crate::error::{SynthesisError, SynthesisResult};
use crate::types::RenderOutcome;
use async_trait::async_trait;
use log::{debug, info};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Notify;

/// Platform speech engine capability
#[async_trait]
pub trait UtteranceEngine: Send + Sync {
    /// Speak `text` and resolve once the utterance ends.
    ///
    /// Cancellation resolves with [`RenderOutcome::Interrupted`]; only genuine
    /// engine faults are errors.
    async fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
        rate: f32,
    ) -> SynthesisResult<RenderOutcome>;

    /// Interrupt the utterance in progress, if any.
    fn cancel(&self);
}

/// Engine that shells out to a speech command such as `espeak-ng` or `say`
pub struct CommandUtteranceEngine {
    config: OnDeviceConfig,
    cancel: Notify,
}

impl CommandUtteranceEngine {
    pub fn new(config: OnDeviceConfig) -> Self {
        Self {
            config,
            cancel: Notify::new(),
        }
    }

    fn command(&self, text: &str, voice: Option<&str>, rate: f32) -> Command {
        let words_per_minute = (self.config.words_per_minute as f32 * rate).round().max(1.0) as u32;

        let mut command = Command::new(&self.config.program);
        if let Some(voice) = voice {
            command.arg(&self.config.voice_flag).arg(voice);
        }
        command
            .arg(&self.config.rate_flag)
            .arg(words_per_minute.to_string())
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl UtteranceEngine for CommandUtteranceEngine {
    async fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
        rate: f32,
    ) -> SynthesisResult<RenderOutcome> {
        if text.trim().is_empty() {
            return Ok(RenderOutcome::Finished);
        }

        // Registered before spawning so a cancel issued meanwhile is not lost
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);

        let program = &self.config.program;
        let mut child = self.command(text, voice, rate).spawn().map_err(|e| {
            SynthesisError::Playback(format!("failed to start speech command {program}: {e}"))
        })?;
        debug!("Speaking {} chars with {}", text.len(), program);

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| {
                    SynthesisError::Playback(format!("speech command {program} failed: {e}"))
                })?;
                if status.success() {
                    Ok(RenderOutcome::Finished)
                } else if status.code().is_none() {
                    // Terminated by a signal
                    Ok(RenderOutcome::Interrupted)
                } else {
                    Err(SynthesisError::Playback(format!(
                        "speech command {program} exited with {status}"
                    )))
                }
            }
            _ = &mut cancelled => {
                let _ = child.kill().await;
                info!("Utterance interrupted");
                Ok(RenderOutcome::Interrupted)
            }
        }
    }

    fn cancel(&self) {
        self.cancel.notify_waiters();
    }
}

/// On-device backend: a speech engine plus the voice to speak with
#[derive(Clone)]
pub struct OnDeviceSpeaker {
    engine: Arc<dyn UtteranceEngine>,
    voice: Option<String>,
}

impl OnDeviceSpeaker {
    pub fn new(engine: Arc<dyn UtteranceEngine>) -> Self {
        Self {
            engine,
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn from_config(config: &OnDeviceConfig) -> Self {
        Self {
            engine: Arc::new(CommandUtteranceEngine::new(config.clone())),
            voice: config.voice.clone(),
        }
    }

    pub async fn speak(&self, text: &str, rate: f32) -> SynthesisResult<RenderOutcome> {
        self.engine.speak(text, self.voice.as_deref(), rate).await
    }

    pub fn cancel(&self) {
        self.engine.cancel();
    }
}
