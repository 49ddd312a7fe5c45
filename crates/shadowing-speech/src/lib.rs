//! # Shadowing Speech
//!
//! Audio acquisition and playback orchestration for sentence-by-sentence
//! shadowing practice.
//!
//! A passage is split into sentences and each sentence is rendered through one
//! of three interchangeable backends:
//!
//! - **On-device**: the platform speech engine speaks directly; no bytes.
//! - **One-shot**: a single HTTP request per sentence returning base64 audio.
//! - **Streaming**: a binary-framed WebSocket connection per sentence.
//!
//! ## Architecture
//!
//! - `SpeechSynthesizer`: byte-producing capability of the cloud backends
//! - `AudioSink`: renders synthesized audio
//! - `CachedSynthesizer`: decorator backed by the `ResponseCache`
//! - `Backend`: the active backend of a session
//! - `PlaybackSequencer`: play / pause / stop / next / previous / seek over a
//!   sentence list, with watch snapshots and broadcast events
//! - `BatchAssembler`: whole-passage synthesis into one downloadable artifact
//!
//! ## Features
//!
//! - `playback`: render on the default output device through rodio instead of
//!   an external player command
//!
//! ## Example
//!
//! ```rust,no_run
//! use shadowing_speech::{Backend, PlaybackSequencer, SequencerOptions, ShadowingConfig};
//!
//! async fn practice(config: ShadowingConfig) {
//!     let backend = Backend::with_default_sink(&config, None).unwrap();
//!     let sequencer = PlaybackSequencer::new(backend, SequencerOptions::from_config(&config));
//!     let mut events = sequencer.events();
//!
//!     sequencer.load_passage("Hello there. How are you today?");
//!     sequencer.play();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```

pub mod audio;
mod backend;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod playback;
mod provider;
pub mod providers;
pub mod sequencer;
pub mod splitter;
pub mod types;

pub use backend::{Backend, synthesizer_from_config};
pub use batch::BatchAssembler;
pub use cache::{CacheEntry, ResponseCache, cache_key};
pub use config::{ConfigError, Credentials, HttpEncoding, ShadowingConfig};
pub use error::{SynthesisError, SynthesisResult};
pub use provider::{AudioSink, CachedSynthesizer, SpeechSynthesizer};
pub use providers::{
    CommandUtteranceEngine, FrameConnection, FrameConnector, OnDeviceSpeaker, OneShotSynthesizer,
    StreamingSynthesizer, UtteranceEngine, WebSocketConnector,
};
pub use sequencer::{
    LoopMode, PlaybackEvent, PlaybackSequencer, PlaybackSnapshot, PlaybackStatus,
    SequencerOptions,
};
pub use splitter::split_sentences;
pub use types::{
    AudioArtifact, AudioEncoding, AudioPayload, BackendKind, RenderOutcome, SynthesisRequest,
};

#[cfg(feature = "playback")]
pub use playback::RodioSink;
pub use playback::CommandAudioSink;
