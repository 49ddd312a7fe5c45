//! Playback sequencer: plays an ordered sentence list one sentence at a time.
//!
//! One driver task runs per active playback. Every transport call bumps a
//! generation counter under the session lock; a driver only commits results
//! while its captured generation is current, so a stale synthesis or render
//! can never touch the session after `pause`, `stop`, `next` and friends. The
//! driver task is also aborted, which drops whatever it was awaiting.

use crate::backend::Backend;
use crate::config::ShadowingConfig;
use crate::error::SynthesisError;
use crate::splitter::split_sentences;
use crate::types::{AudioPayload, BackendKind, RenderOutcome, SynthesisRequest};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    /// Synthesizing the sentence
    Loading(usize),
    /// Rendering the sentence, or waiting out the pause after it
    Playing(usize),
    Paused(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Sequential,
    RepeatCurrent,
}

/// Observable state of the sequencer
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub index: usize,
    pub status: PlaybackStatus,
    pub loop_mode: LoopMode,
    pub sentence_count: usize,
    pub rate: f32,
}

impl PlaybackSnapshot {
    pub fn is_playing(&self) -> bool {
        matches!(self.status, PlaybackStatus::Playing(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, PlaybackStatus::Loading(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Audio for the sentence started rendering
    SentenceStarted {
        index: usize,
    },
    SentenceFinished {
        index: usize,
    },
    Error {
        index: usize,
        backend: BackendKind,
        error: SynthesisError,
    },
    /// The last sentence finished; the sequencer is back at index 0
    Finished,
}

/// Session settings the sequencer starts with
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerOptions {
    pub voice: String,
    pub speed: f32,
    pub rate: f32,
    pub inter_sentence_delay: Duration,
    pub loop_mode: LoopMode,
}

impl SequencerOptions {
    pub fn from_config(config: &ShadowingConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            speed: config.speed,
            rate: config.playback.rate,
            inter_sentence_delay: config.playback.inter_sentence_delay(),
            loop_mode: if config.playback.loop_current {
                LoopMode::RepeatCurrent
            } else {
                LoopMode::Sequential
            },
        }
    }
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self::from_config(&ShadowingConfig::default())
    }
}

struct SessionState {
    sentences: Vec<String>,
    index: usize,
    status: PlaybackStatus,
    loop_mode: LoopMode,
    rate: f32,
    delay: Duration,
    voice: String,
    speed: f32,
    // sentence queued behind the inter-sentence pause
    upcoming: Option<usize>,
    // synthesized audio by sentence index, for the current passage only
    session_audio: HashMap<usize, AudioPayload>,
}

impl SessionState {
    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            index: self.index,
            status: self.status,
            loop_mode: self.loop_mode,
            sentence_count: self.sentences.len(),
            rate: self.rate,
        }
    }

    fn is_active(&self) -> bool {
        matches!(
            self.status,
            PlaybackStatus::Loading(_) | PlaybackStatus::Playing(_)
        )
    }
}

/// What the driver needs to render one sentence
struct Step {
    index: usize,
    text: String,
    voice: String,
    speed: f32,
}

struct Shared {
    backend: Backend,
    state: Mutex<SessionState>,
    generation: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
    snapshots: watch::Sender<PlaybackSnapshot>,
    events: broadcast::Sender<PlaybackEvent>,
}

/// Sentence-by-sentence playback over one [`Backend`].
///
/// Transport calls are synchronous and must be made from within a Tokio
/// runtime; playback itself runs on a spawned task.
pub struct PlaybackSequencer {
    shared: Arc<Shared>,
}

impl PlaybackSequencer {
    pub fn new(backend: Backend, options: SequencerOptions) -> Self {
        let state = SessionState {
            sentences: Vec::new(),
            index: 0,
            status: PlaybackStatus::Idle,
            loop_mode: options.loop_mode,
            rate: options.rate,
            delay: options.inter_sentence_delay,
            voice: options.voice,
            speed: options.speed,
            upcoming: None,
            session_audio: HashMap::new(),
        };
        let (snapshots, _) = watch::channel(state.snapshot());
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            shared: Arc::new(Shared {
                backend,
                state: Mutex::new(state),
                generation: AtomicU64::new(0),
                driver: Mutex::new(None),
                snapshots,
                events,
            }),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.shared.backend.kind()
    }

    /// Split `text` and load the sentences.
    pub fn load_passage(&self, text: &str) {
        self.set_sentences(split_sentences(text));
    }

    /// Stop playback and replace the sentence list. The index returns to 0
    /// and audio memoized for the previous passage is dropped.
    pub fn set_sentences(&self, sentences: Vec<String>) {
        {
            let mut state = self.shared.lock_state();
            self.shared.invalidate();
            info!("Loaded {} sentences", sentences.len());
            state.sentences = sentences;
            state.index = 0;
            state.status = PlaybackStatus::Idle;
            state.upcoming = None;
            state.session_audio.clear();
        }
        self.shared.cancel_driver();
        self.shared.publish();
    }

    /// Start or resume at the current index. No-op while already active or
    /// when nothing is loaded.
    pub fn play(&self) {
        let generation = {
            let mut state = self.shared.lock_state();
            if state.sentences.is_empty() || state.is_active() {
                return;
            }
            if state.index >= state.sentences.len() {
                state.index = 0;
            }
            state.status = PlaybackStatus::Loading(state.index);
            self.shared.invalidate()
        };
        self.shared.publish();
        self.shared.spawn_driver(generation);
    }

    /// Hold at the current sentence, or at the next one when paused between
    /// sentences.
    pub fn pause(&self) {
        {
            let mut state = self.shared.lock_state();
            let (PlaybackStatus::Loading(index) | PlaybackStatus::Playing(index)) = state.status
            else {
                return;
            };
            self.shared.invalidate();
            let index = state.upcoming.take().unwrap_or(index);
            state.index = index;
            state.status = PlaybackStatus::Paused(index);
        }
        self.shared.cancel_driver();
        self.shared.publish();
    }

    /// Return to idle. The index is kept, so `play` starts from the same
    /// sentence.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.status == PlaybackStatus::Idle {
                return;
            }
            self.shared.invalidate();
            if let Some(next) = state.upcoming.take() {
                state.index = next;
            }
            state.status = PlaybackStatus::Idle;
        }
        self.shared.cancel_driver();
        self.shared.publish();
    }

    pub fn toggle_play_pause(&self) {
        match self.snapshot().status {
            PlaybackStatus::Idle | PlaybackStatus::Paused(_) => self.play(),
            PlaybackStatus::Loading(_) | PlaybackStatus::Playing(_) => self.pause(),
        }
    }

    /// Move to the next sentence. Returns false at the last sentence.
    pub fn next(&self) -> bool {
        self.jump(|index, len| (index + 1 < len).then_some(index + 1))
    }

    /// Move to the previous sentence. Returns false at the first sentence.
    pub fn previous(&self) -> bool {
        self.jump(|index, _| index.checked_sub(1))
    }

    /// Move to `index`. Returns false when it is out of range.
    pub fn seek(&self, index: usize) -> bool {
        self.jump(|_, len| (index < len).then_some(index))
    }

    fn jump<F>(&self, target: F) -> bool
    where
        F: FnOnce(usize, usize) -> Option<usize>,
    {
        let resume = {
            let mut state = self.shared.lock_state();
            let Some(index) = target(state.index, state.sentences.len()) else {
                return false;
            };
            self.shared.invalidate();
            let resume = state.is_active();
            state.upcoming = None;
            state.index = index;
            state.status = match state.status {
                PlaybackStatus::Paused(_) => PlaybackStatus::Paused(index),
                _ => PlaybackStatus::Idle,
            };
            debug!("Moved to sentence {}", index);
            resume
        };
        self.shared.cancel_driver();
        self.shared.publish();
        if resume {
            self.play();
        }
        true
    }

    pub fn set_loop_mode(&self, loop_mode: LoopMode) {
        self.shared.lock_state().loop_mode = loop_mode;
        self.shared.publish();
    }

    /// Flip between sequential and repeat-current; returns the new mode.
    pub fn toggle_loop(&self) -> LoopMode {
        let mode = {
            let mut state = self.shared.lock_state();
            state.loop_mode = match state.loop_mode {
                LoopMode::Sequential => LoopMode::RepeatCurrent,
                LoopMode::RepeatCurrent => LoopMode::Sequential,
            };
            state.loop_mode
        };
        self.shared.publish();
        mode
    }

    /// Playback rate for sentences rendered from now on.
    pub fn set_rate(&self, rate: f32) {
        self.shared.lock_state().rate = rate;
        self.shared.publish();
    }

    pub fn set_delay(&self, delay: Duration) {
        self.shared.lock_state().delay = delay;
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.lock_state().snapshot()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for PlaybackSequencer {
    fn drop(&mut self) {
        self.shared.invalidate();
        self.shared.cancel_driver();
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retire the running driver; returns the new generation.
    fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self) {
        let snapshot = self.lock_state().snapshot();
        self.snapshots.send_replace(snapshot);
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }

    fn cancel_driver(&self) {
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.backend.cancel();
    }

    fn spawn_driver(self: &Arc<Self>, generation: u64) {
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move { shared.run(generation).await });
        let previous = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn run(self: Arc<Self>, generation: u64) {
        loop {
            let Some(step) = self.begin_sentence(generation) else {
                return;
            };

            match self.render(generation, &step).await {
                Ok(RenderOutcome::Finished) => {}
                Ok(RenderOutcome::Interrupted) => {
                    self.settle_interrupted(generation);
                    return;
                }
                Err(error) => {
                    self.fail(generation, step.index, error);
                    return;
                }
            }

            let Some(delay) = self.advance(generation, step.index) else {
                return;
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn begin_sentence(&self, generation: u64) -> Option<Step> {
        let step = {
            let mut state = self.lock_state();
            if !self.is_current(generation) {
                return None;
            }
            if let Some(next) = state.upcoming.take() {
                state.index = next;
            }
            let index = state.index;
            let text = state.sentences.get(index)?.clone();
            state.status = PlaybackStatus::Loading(index);
            Step {
                index,
                text,
                voice: state.voice.clone(),
                speed: state.speed,
            }
        };
        self.publish();
        Some(step)
    }

    async fn render(
        &self,
        generation: u64,
        step: &Step,
    ) -> Result<RenderOutcome, SynthesisError> {
        match &self.backend {
            Backend::OnDevice(speaker) => {
                let Some(rate) = self.mark_playing(generation, step.index) else {
                    return Ok(RenderOutcome::Interrupted);
                };
                speaker.speak(&step.text, rate).await
            }
            Backend::Synthesized { synthesizer, sink } => {
                let memoized = self.lock_state().session_audio.get(&step.index).cloned();
                let payload = match memoized {
                    Some(payload) => payload,
                    None => {
                        let request =
                            SynthesisRequest::new(step.text.as_str(), step.voice.as_str(), step.speed);
                        let payload = synthesizer.synthesize(&request).await?;
                        if !self.remember(generation, step.index, &payload) {
                            return Ok(RenderOutcome::Interrupted);
                        }
                        payload
                    }
                };
                let Some(rate) = self.mark_playing(generation, step.index) else {
                    return Ok(RenderOutcome::Interrupted);
                };
                sink.play(&payload, rate).await
            }
        }
    }

    fn remember(&self, generation: u64, index: usize, payload: &AudioPayload) -> bool {
        let mut state = self.lock_state();
        if !self.is_current(generation) {
            debug!("Discarding stale audio for sentence {}", index);
            return false;
        }
        state.session_audio.insert(index, payload.clone());
        true
    }

    /// Loading -> Playing; returns the rate to render at, or `None` if stale.
    fn mark_playing(&self, generation: u64, index: usize) -> Option<f32> {
        let rate = {
            let mut state = self.lock_state();
            if !self.is_current(generation) {
                return None;
            }
            state.status = PlaybackStatus::Playing(index);
            state.rate
        };
        self.emit(PlaybackEvent::SentenceStarted { index });
        self.publish();
        Some(rate)
    }

    /// Natural completion of `index`; returns the pause before the next
    /// sentence, or `None` when playback ended or the driver is stale. The
    /// status stays `Playing(index)` until the pause is over.
    fn advance(&self, generation: u64, index: usize) -> Option<Duration> {
        let delay = {
            let mut state = self.lock_state();
            if !self.is_current(generation) {
                return None;
            }
            self.emit(PlaybackEvent::SentenceFinished { index });

            let next = match state.loop_mode {
                LoopMode::RepeatCurrent => index,
                LoopMode::Sequential => index + 1,
            };
            if next >= state.sentences.len() {
                state.index = 0;
                state.status = PlaybackStatus::Idle;
                self.emit(PlaybackEvent::Finished);
                info!("Finished playing {} sentences", state.sentences.len());
                None
            } else {
                state.upcoming = Some(next);
                Some(state.delay)
            }
        };
        self.publish();
        delay
    }

    fn fail(&self, generation: u64, index: usize, error: SynthesisError) {
        {
            let mut state = self.lock_state();
            if !self.is_current(generation) {
                debug!("Discarding stale error for sentence {}: {}", index, error);
                return;
            }
            state.status = PlaybackStatus::Idle;
        }
        let backend = error.backend().unwrap_or_else(|| self.backend.kind());
        error!("Sentence {} failed on the {} backend: {}", index, backend, error);
        self.emit(PlaybackEvent::Error {
            index,
            backend,
            error,
        });
        self.publish();
    }

    // Interrupted from outside the sequencer, e.g. the engine was killed
    fn settle_interrupted(&self, generation: u64) {
        {
            let mut state = self.lock_state();
            if !self.is_current(generation) {
                return;
            }
            state.status = PlaybackStatus::Idle;
        }
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SynthesisResult;
    use crate::provider::{AudioSink, SpeechSynthesizer};
    use crate::providers::{OnDeviceSpeaker, UtteranceEngine};
    use crate::types::AudioEncoding;
    use async_trait::async_trait;

    /// Echoes the text as audio after a per-sentence latency.
    #[derive(Default)]
    struct MockSynthesizer {
        slow: HashMap<String, Duration>,
        fail_on: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for MockSynthesizer {
        fn kind(&self) -> BackendKind {
            BackendKind::OneShot
        }

        async fn synthesize(&self, request: &SynthesisRequest) -> SynthesisResult<AudioPayload> {
            self.calls.lock().unwrap().push(request.text.clone());
            let latency = self
                .slow
                .get(&request.text)
                .copied()
                .unwrap_or(Duration::from_millis(100));
            tokio::time::sleep(latency).await;
            if self.fail_on.as_deref() == Some(request.text.as_str()) {
                return Err(SynthesisError::Application {
                    backend: BackendKind::OneShot,
                    code: 3001,
                    message: "rejected".to_string(),
                });
            }
            Ok(AudioPayload::new(
                request.text.clone().into_bytes(),
                AudioEncoding::Mp3,
            ))
        }
    }

    /// Records what it renders; each clip takes one second.
    #[derive(Default)]
    struct RecordingSink {
        played: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, payload: &AudioPayload, _rate: f32) -> SynthesisResult<RenderOutcome> {
            self.played
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&payload.data).into_owned());
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(RenderOutcome::Finished)
        }

        fn stop(&self) {}
    }

    struct Harness {
        synth: Arc<MockSynthesizer>,
        sink: Arc<RecordingSink>,
        sequencer: PlaybackSequencer,
    }

    fn harness(synth: MockSynthesizer, loop_mode: LoopMode) -> Harness {
        let synth = Arc::new(synth);
        let sink = Arc::new(RecordingSink::default());
        let backend = Backend::Synthesized {
            synthesizer: synth.clone(),
            sink: sink.clone(),
        };
        let sequencer = PlaybackSequencer::new(
            backend,
            SequencerOptions {
                voice: "amy".to_string(),
                speed: 1.0,
                rate: 1.0,
                inter_sentence_delay: Duration::from_millis(500),
                loop_mode,
            },
        );
        Harness {
            synth,
            sink,
            sequencer,
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<PlaybackEvent>) -> PlaybackEvent {
        tokio::time::timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("event within deadline")
            .expect("event channel open")
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_all_sentences_in_order() {
        let h = harness(MockSynthesizer::default(), LoopMode::Sequential);
        h.sequencer.load_passage("One. Two! Three?");
        let mut events = h.sequencer.events();

        h.sequencer.play();

        let mut seen = Vec::new();
        loop {
            let event = next_event(&mut events).await;
            let done = event == PlaybackEvent::Finished;
            seen.push(event);
            if done {
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                PlaybackEvent::SentenceStarted { index: 0 },
                PlaybackEvent::SentenceFinished { index: 0 },
                PlaybackEvent::SentenceStarted { index: 1 },
                PlaybackEvent::SentenceFinished { index: 1 },
                PlaybackEvent::SentenceStarted { index: 2 },
                PlaybackEvent::SentenceFinished { index: 2 },
                PlaybackEvent::Finished,
            ]
        );
        assert_eq!(*h.sink.played.lock().unwrap(), vec!["One.", "Two!", "Three?"]);

        let snapshot = h.sequencer.snapshot();
        assert_eq!(snapshot.status, PlaybackStatus::Idle);
        assert_eq!(snapshot.index, 0);
        assert_eq!(snapshot.sentence_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_discards_in_flight_synthesis() {
        let synth = MockSynthesizer {
            slow: HashMap::from([("Slow one.".to_string(), Duration::from_secs(10))]),
            ..MockSynthesizer::default()
        };
        let h = harness(synth, LoopMode::Sequential);
        h.sequencer.load_passage("Slow one. Fast two.");
        let mut events = h.sequencer.events();

        h.sequencer.play();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Loading(0));

        assert!(h.sequencer.next());
        let mut started = Vec::new();
        loop {
            match next_event(&mut events).await {
                PlaybackEvent::SentenceStarted { index } => started.push(index),
                PlaybackEvent::Finished => break,
                _ => {}
            }
        }
        assert_eq!(started, vec![1]);
        // let the abandoned call's deadline pass too
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(*h.sink.played.lock().unwrap(), vec!["Fast two."]);
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_current_replays_same_sentence() {
        let h = harness(MockSynthesizer::default(), LoopMode::RepeatCurrent);
        h.sequencer.load_passage("Again. Never.");
        let mut events = h.sequencer.events();

        h.sequencer.play();
        let mut finished = 0;
        while finished < 3 {
            if let PlaybackEvent::SentenceFinished { index } = next_event(&mut events).await {
                assert_eq!(index, 0);
                finished += 1;
            }
        }
        h.sequencer.stop();

        assert!(h.sink.played.lock().unwrap().iter().all(|s| s == "Again."));
        // memoized after the first synthesis
        assert_eq!(*h.synth.calls.lock().unwrap(), vec!["Again."]);
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Idle);
        assert_eq!(h.sequencer.snapshot().index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_same_sentence() {
        let h = harness(MockSynthesizer::default(), LoopMode::Sequential);
        h.sequencer.load_passage("First. Second.");
        let mut snapshots = h.sequencer.subscribe();

        h.sequencer.play();
        snapshots
            .wait_for(|s| s.status == PlaybackStatus::Playing(0))
            .await
            .unwrap();

        h.sequencer.pause();
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Paused(0));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Paused(0));

        h.sequencer.play();
        snapshots
            .wait_for(|s| s.status == PlaybackStatus::Playing(1))
            .await
            .unwrap();

        assert_eq!(*h.synth.calls.lock().unwrap(), vec!["First.", "Second."]);
        assert_eq!(
            *h.sink.played.lock().unwrap(),
            vec!["First.", "First.", "Second."]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_sentences_is_not_loading() {
        let h = harness(MockSynthesizer::default(), LoopMode::Sequential);
        h.sequencer.load_passage("First. Second. Third.");
        let mut events = h.sequencer.events();

        h.sequencer.play();
        while next_event(&mut events).await != (PlaybackEvent::SentenceFinished { index: 0 }) {}

        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = h.sequencer.snapshot();
        assert_eq!(snapshot.status, PlaybackStatus::Playing(0));
        assert!(!snapshot.is_loading());

        // the pause resumes at the sentence that was about to play
        h.sequencer.pause();
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Paused(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*h.sink.played.lock().unwrap(), vec!["First."]);

        h.sequencer.play();
        assert_eq!(
            next_event(&mut events).await,
            PlaybackEvent::SentenceStarted { index: 1 }
        );
        assert_eq!(*h.sink.played.lock().unwrap(), vec!["First.", "Second."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_failure_emits_error_and_stops() {
        let synth = MockSynthesizer {
            fail_on: Some("Bad.".to_string()),
            ..MockSynthesizer::default()
        };
        let h = harness(synth, LoopMode::Sequential);
        h.sequencer.load_passage("Good. Bad. Never.");
        let mut events = h.sequencer.events();

        h.sequencer.play();
        let error = loop {
            if let event @ PlaybackEvent::Error { .. } = next_event(&mut events).await {
                break event;
            }
        };

        assert!(matches!(
            error,
            PlaybackEvent::Error {
                index: 1,
                backend: BackendKind::OneShot,
                error: SynthesisError::Application { code: 3001, .. },
            }
        ));
        let snapshot = h.sequencer.snapshot();
        assert_eq!(snapshot.status, PlaybackStatus::Idle);
        assert_eq!(snapshot.index, 1);
        assert_eq!(*h.synth.calls.lock().unwrap(), vec!["Good.", "Bad."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_while_paused_stays_paused() {
        let h = harness(MockSynthesizer::default(), LoopMode::Sequential);
        h.sequencer.load_passage("A. B. C.");
        let mut snapshots = h.sequencer.subscribe();

        h.sequencer.play();
        snapshots
            .wait_for(|s| s.is_playing())
            .await
            .unwrap();
        h.sequencer.pause();

        assert!(h.sequencer.seek(2));
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Paused(2));
        assert!(!h.sequencer.seek(3));
        assert!(!h.sequencer.next());
        assert!(h.sequencer.previous());
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Paused(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_passage_resets_session() {
        let h = harness(MockSynthesizer::default(), LoopMode::Sequential);
        h.sequencer.load_passage("A. B.");
        let mut snapshots = h.sequencer.subscribe();
        h.sequencer.play();
        snapshots
            .wait_for(|s| s.is_playing())
            .await
            .unwrap();

        h.sequencer.load_passage("C. D. E.");

        let snapshot = h.sequencer.snapshot();
        assert_eq!(snapshot.status, PlaybackStatus::Idle);
        assert_eq!(snapshot.index, 0);
        assert_eq!(snapshot.sentence_count, 3);
        assert_eq!(h.sequencer.toggle_loop(), LoopMode::RepeatCurrent);
    }

    #[tokio::test]
    async fn test_play_without_sentences_is_noop() {
        let h = harness(MockSynthesizer::default(), LoopMode::Sequential);
        h.sequencer.play();
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Idle);
        h.sequencer.load_passage("");
        h.sequencer.play();
        assert_eq!(h.sequencer.snapshot().status, PlaybackStatus::Idle);
    }

    struct RecordingEngine {
        spoken: Mutex<Vec<(String, f32)>>,
    }

    #[async_trait]
    impl UtteranceEngine for RecordingEngine {
        async fn speak(
            &self,
            text: &str,
            _voice: Option<&str>,
            rate: f32,
        ) -> SynthesisResult<RenderOutcome> {
            self.spoken.lock().unwrap().push((text.to_string(), rate));
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(RenderOutcome::Finished)
        }

        fn cancel(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_device_backend_speaks_directly() {
        let engine = Arc::new(RecordingEngine {
            spoken: Mutex::new(Vec::new()),
        });
        let backend = Backend::OnDevice(Arc::new(OnDeviceSpeaker::new(engine.clone())));
        let sequencer = PlaybackSequencer::new(backend, SequencerOptions::default());
        sequencer.set_rate(0.8);
        sequencer.set_delay(Duration::ZERO);
        sequencer.load_passage("Hello there. Bye.");
        let mut events = sequencer.events();

        sequencer.play();
        loop {
            if next_event(&mut events).await == PlaybackEvent::Finished {
                break;
            }
        }

        assert_eq!(sequencer.backend_kind(), BackendKind::OnDevice);
        assert_eq!(
            *engine.spoken.lock().unwrap(),
            vec![("Hello there.".to_string(), 0.8), ("Bye.".to_string(), 0.8)]
        );
    }
}
