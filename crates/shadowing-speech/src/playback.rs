//! Audio output for synthesized payloads.
//!
//! [`CommandAudioSink`] hands each clip to an external player and is always
//! available. [`RodioSink`] renders on the default output device and needs the
//! `playback` feature.

use crate::config::PlayerConfig;
use crate::error::{SynthesisError, SynthesisResult};
use crate::provider::AudioSink;
use crate::types::{AudioPayload, RenderOutcome};
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
pub enum AudioPlayerError {
    #[error("Failed to initialize audio output stream: {0}")]
    InitFailed(String),
    #[error("Failed to decode audio: {0}")]
    DecodeFailed(String),
    #[error("Failed to launch audio player {program}: {message}")]
    LaunchFailed { program: String, message: String },
}

impl From<AudioPlayerError> for SynthesisError {
    fn from(err: AudioPlayerError) -> Self {
        SynthesisError::Playback(err.to_string())
    }
}

/// Sink that writes each clip to a temporary file and runs a player on it
pub struct CommandAudioSink {
    config: PlayerConfig,
    stop: Notify,
}

impl CommandAudioSink {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            stop: Notify::new(),
        }
    }

    fn rate_args(&self, rate: f32) -> Vec<String> {
        if (rate - 1.0).abs() < f32::EPSILON {
            return Vec::new();
        }
        match self.program_name() {
            "ffplay" => vec!["-af".to_string(), format!("atempo={rate}")],
            "afplay" => vec!["-r".to_string(), rate.to_string()],
            _ => Vec::new(),
        }
    }

    fn program_name(&self) -> &str {
        std::path::Path::new(&self.config.program)
            .file_stem()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

/// Temporary clip file removed on drop
struct ClipFile(PathBuf);

impl Drop for ClipFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[async_trait]
impl AudioSink for CommandAudioSink {
    async fn play(&self, payload: &AudioPayload, rate: f32) -> SynthesisResult<RenderOutcome> {
        let stopped = self.stop.notified();
        tokio::pin!(stopped);

        let artifact = payload.clone().into_artifact();
        let clip = ClipFile(std::env::temp_dir().join(format!(
            "shadowing-{}.{}",
            uuid::Uuid::new_v4(),
            payload.encoding.file_extension()
        )));
        tokio::fs::write(&clip.0, &artifact.bytes)
            .await
            .map_err(|e| SynthesisError::Playback(format!("failed to write audio clip: {e}")))?;

        let program = &self.config.program;
        let mut child = Command::new(program)
            .args(&self.config.args)
            .args(self.rate_args(rate))
            .arg(&clip.0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AudioPlayerError::LaunchFailed {
                program: program.clone(),
                message: e.to_string(),
            })?;
        debug!("Playing {} bytes with {}", artifact.bytes.len(), program);

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| {
                    SynthesisError::Playback(format!("audio player {program} failed: {e}"))
                })?;
                match status.code() {
                    Some(0) => Ok(RenderOutcome::Finished),
                    None => Ok(RenderOutcome::Interrupted),
                    Some(_) => Err(SynthesisError::Playback(format!(
                        "audio player {program} exited with {status}"
                    ))),
                }
            }
            _ = &mut stopped => {
                let _ = child.kill().await;
                Ok(RenderOutcome::Interrupted)
            }
        }
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }
}

#[cfg(feature = "playback")]
pub use device::RodioSink;

#[cfg(feature = "playback")]
mod device {
    use super::AudioPlayerError;
    use crate::audio::pcm16_to_f32;
    use crate::error::{SynthesisError, SynthesisResult};
    use crate::provider::AudioSink;
    use crate::types::{AudioEncoding, AudioPayload, RenderOutcome};
    use async_trait::async_trait;
    use rodio::{Decoder, OutputStreamBuilder, Sink};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Sink rendering on the default output device
    #[derive(Default)]
    pub struct RodioSink {
        // bumped by stop()
        epoch: Arc<AtomicU64>,
    }

    /// Cut-off conditions polled by one blocking render
    struct RenderControl {
        cancelled: Arc<AtomicBool>,
        epoch: Arc<AtomicU64>,
        started: u64,
    }

    impl RenderControl {
        fn should_stop(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
                || self.epoch.load(Ordering::SeqCst) != self.started
        }
    }

    /// Cancels its render when the `play` future completes or is dropped.
    struct CancelOnDrop(Arc<AtomicBool>);

    impl Drop for CancelOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl RodioSink {
        pub fn new() -> Self {
            Self::default()
        }

        fn begin(&self) -> (CancelOnDrop, RenderControl) {
            let cancelled = Arc::new(AtomicBool::new(false));
            let control = RenderControl {
                cancelled: cancelled.clone(),
                epoch: self.epoch.clone(),
                started: self.epoch.load(Ordering::SeqCst),
            };
            (CancelOnDrop(cancelled), control)
        }
    }

    fn render(
        payload: AudioPayload,
        rate: f32,
        control: RenderControl,
    ) -> Result<RenderOutcome, AudioPlayerError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| AudioPlayerError::InitFailed(e.to_string()))?;
        let sink = Sink::connect_new(stream.mixer());
        sink.set_speed(rate);

        match payload.encoding {
            AudioEncoding::Pcm16 { sample_rate } => {
                let samples = pcm16_to_f32(&payload.data);
                sink.append(rodio::buffer::SamplesBuffer::new(1, sample_rate, samples));
            }
            AudioEncoding::Mp3 => {
                let decoder = Decoder::new(Cursor::new(payload.data.to_vec()))
                    .map_err(|e| AudioPlayerError::DecodeFailed(e.to_string()))?;
                sink.append(decoder);
            }
        }

        while !sink.empty() {
            if control.should_stop() {
                sink.stop();
                return Ok(RenderOutcome::Interrupted);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(RenderOutcome::Finished)
    }

    #[async_trait]
    impl AudioSink for RodioSink {
        async fn play(
            &self,
            payload: &AudioPayload,
            rate: f32,
        ) -> SynthesisResult<RenderOutcome> {
            // an aborted caller drops the guard, which ends the blocking render
            let (_guard, control) = self.begin();
            let payload = payload.clone();

            let outcome = tokio::task::spawn_blocking(move || render(payload, rate, control))
                .await
                .map_err(|e| SynthesisError::Playback(format!("playback thread failed: {e}")))??;
            Ok(outcome)
        }

        fn stop(&self) {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

}
