//! Voice conversation controller.
//!
//! Orchestrates the continuous voice loop: captured audio levels feed
//! the VAD, a speech-end edge stops capture and transcribes the turn,
//! the transcript is delivered over the turn channel to whoever is
//! composing responses, and the finished response comes back through
//! [`SpeechHandoff`] to be spoken aloud before listening resumes.
//!
//! A single session-active flag is checked at the top of every async
//! continuation, so completions that land after `end_session` fall
//! through without touching state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use solace_core::config::VoiceConfig;
use solace_core::error::SolaceError;

use crate::services::{CaptureDevice, SpeakOptions, SpeechSynthesizer, TranscriptionService};
use crate::state::{StateMachine, VoiceMode};
use crate::vad::{frame_level_db, normalize_level, EnergyVad, VadConfig, VadEvent};

/// A completed voice turn: the user's recognized utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTurn {
    pub transcript: String,
}

/// Sender half of the response channel, paired with the session-active
/// flag so producers can tell whether anyone is listening.
///
/// The chat side holds one of these and calls [`SpeechHandoff::deliver`]
/// when a full response is ready; text delivered while no session is
/// running is dropped.
#[derive(Clone)]
pub struct SpeechHandoff {
    active: Arc<AtomicBool>,
    tx: mpsc::Sender<String>,
}

impl SpeechHandoff {
    pub fn new(active: Arc<AtomicBool>, tx: mpsc::Sender<String>) -> Self {
        Self { active, tx }
    }

    /// Whether a voice session is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Queues text for synthesis. Returns false if the session is
    /// inactive or the channel is full or closed.
    pub fn deliver(&self, text: String) -> bool {
        if !self.is_active() {
            debug!("Speech handoff skipped: no active voice session");
            return false;
        }
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!("Speech handoff dropped: {}", e);
                false
            }
        }
    }
}

/// Drives a hands-free conversation session over injected capture,
/// transcription, and synthesis services.
pub struct VoiceController<C, T, S> {
    state: StateMachine,
    active: Arc<AtomicBool>,
    capture: C,
    transcriber: T,
    synthesizer: S,
    vad: Mutex<EnergyVad>,
    audio_level: Mutex<f32>,
    transcript: Mutex<String>,
    turn_tx: mpsc::Sender<VoiceTurn>,
    options: SpeakOptions,
}

impl<C, T, S> VoiceController<C, T, S>
where
    C: CaptureDevice,
    T: TranscriptionService,
    S: SpeechSynthesizer,
{
    /// Creates a controller in the idle state. Completed turns are sent
    /// over `turn_tx`.
    pub fn new(
        capture: C,
        transcriber: T,
        synthesizer: S,
        config: &VoiceConfig,
        turn_tx: mpsc::Sender<VoiceTurn>,
    ) -> Self {
        Self {
            state: StateMachine::new(),
            active: Arc::new(AtomicBool::new(false)),
            capture,
            transcriber,
            synthesizer,
            vad: Mutex::new(EnergyVad::new(VadConfig::from(config))),
            audio_level: Mutex::new(0.0),
            transcript: Mutex::new(String::new()),
            turn_tx,
            options: SpeakOptions::from(config),
        }
    }

    /// Current session mode.
    pub fn mode(&self) -> VoiceMode {
        self.state.current()
    }

    /// Whether a session is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Normalized audio level in [0, 1] for meter display.
    pub fn audio_level(&self) -> f32 {
        *self.audio_level.lock().expect("level mutex poisoned")
    }

    /// The most recent recognized utterance.
    pub fn transcript(&self) -> String {
        self.transcript
            .lock()
            .expect("transcript mutex poisoned")
            .clone()
    }

    /// Creates a response channel bound to this session's active flag.
    ///
    /// Hand the [`SpeechHandoff`] to the response producer and feed the
    /// receiver to [`VoiceController::run_speech_loop`].
    pub fn handoff_pair(&self) -> (SpeechHandoff, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        (SpeechHandoff::new(Arc::clone(&self.active), tx), rx)
    }

    /// Starts a new session: transitions to listening and begins
    /// capturing audio.
    pub async fn start_session(&self) -> Result<(), SolaceError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(SolaceError::Voice(
                "Voice session already active".to_string(),
            ));
        }
        if let Err(e) = self.state.transition(VoiceMode::Listening) {
            self.active.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.vad.lock().expect("vad mutex poisoned").reset();
        self.transcript
            .lock()
            .expect("transcript mutex poisoned")
            .clear();

        if let Err(e) = self.capture.start().await {
            self.active.store(false, Ordering::SeqCst);
            self.state.reset();
            return Err(e);
        }
        info!("Voice session started");
        Ok(())
    }

    /// Feeds one audio level sample (in dBFS) to the session.
    ///
    /// Updates the display meter, advances the VAD, and reacts to the
    /// speech edges it emits. Samples arriving outside a session are
    /// ignored.
    pub async fn process_level(&self, level_db: f32) {
        if !self.is_active() {
            return;
        }
        *self.audio_level.lock().expect("level mutex poisoned") = normalize_level(level_db);

        let event = self.vad.lock().expect("vad mutex poisoned").push(level_db);
        match event {
            Some(VadEvent::SpeechStart) => debug!("Speech detected at {:.1} dBFS", level_db),
            Some(VadEvent::SpeechEnd) => self.handle_speech_end().await,
            None => {}
        }
    }

    /// Feeds one PCM frame, deriving its level first.
    pub async fn process_frame(&self, samples: &[f32]) {
        self.process_level(frame_level_db(samples)).await;
    }

    /// Finishes the current turn: stops capture, transcribes, and
    /// delivers the transcript over the turn channel.
    ///
    /// Silence, transcription failures, and a closed turn channel all
    /// resume listening instead of wedging the session. Calls that land
    /// after `end_session`, or outside the listening mode, are ignored.
    pub async fn handle_speech_end(&self) {
        if !self.is_active() {
            debug!("Ignoring speech end: session inactive");
            return;
        }
        if self.state.current() != VoiceMode::Listening {
            debug!("Ignoring speech end in {} mode", self.state.current());
            return;
        }
        if self.state.transition(VoiceMode::Processing).is_err() {
            return;
        }

        let clip = match self.capture.stop().await {
            Ok(clip) => clip,
            Err(e) => {
                warn!("Failed to stop capture: {}", e);
                self.resume_listening().await;
                return;
            }
        };

        let text = match self.transcriber.transcribe(&clip, &self.options.language).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("Transcription failed: {}", e);
                self.resume_listening().await;
                return;
            }
        };

        if !self.is_active() {
            debug!("Discarding transcript: session ended");
            return;
        }
        if text.is_empty() {
            debug!("Empty transcription, resuming listening");
            self.resume_listening().await;
            return;
        }

        *self.transcript.lock().expect("transcript mutex poisoned") = text.clone();
        info!("Voice turn transcribed ({} chars)", text.len());

        if self.turn_tx.send(VoiceTurn { transcript: text }).await.is_err() {
            warn!("Voice turn receiver dropped, resuming listening");
            self.resume_listening().await;
        }
        // The session stays in processing until speak_response or
        // end_session moves it on.
    }

    /// Speaks a finished response, then resumes listening.
    ///
    /// A no-op when no session is active, including when the session
    /// ended while the response was being composed.
    pub async fn speak_response(&self, text: &str) -> Result<(), SolaceError> {
        if !self.is_active() {
            debug!("Ignoring speak request: session inactive");
            return Ok(());
        }
        self.state.transition(VoiceMode::Speaking)?;

        let result = self.synthesizer.speak(text, &self.options).await;
        if let Err(e) = &result {
            warn!("Synthesis failed: {}", e);
        }

        if self.is_active() {
            self.resume_listening().await;
        }
        result
    }

    /// Ends the session: flags it inactive first so in-flight
    /// continuations become no-ops, then stops playback and capture and
    /// returns to idle.
    pub async fn end_session(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            debug!("End session: no active session");
            return;
        }

        self.synthesizer.stop();
        if self.capture.is_capturing() {
            if let Err(e) = self.capture.stop().await {
                warn!("Failed to stop capture during teardown: {}", e);
            }
        }

        if self.state.current() != VoiceMode::Idle && self.state.transition(VoiceMode::Idle).is_err()
        {
            self.state.reset();
        }
        *self.audio_level.lock().expect("level mutex poisoned") = 0.0;
        info!("Voice session ended");
    }

    /// Consumes the response channel, speaking each delivery in order.
    /// Returns when the sending side closes.
    pub async fn run_speech_loop(&self, mut responses: mpsc::Receiver<String>) {
        while let Some(text) = responses.recv().await {
            if let Err(e) = self.speak_response(&text).await {
                warn!("Failed to speak response: {}", e);
            }
        }
        debug!("Speech loop closed");
    }

    async fn resume_listening(&self) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.state.transition(VoiceMode::Listening) {
            debug!("Not resuming listening: {}", e);
            return;
        }
        self.vad.lock().expect("vad mutex poisoned").reset();
        if let Err(e) = self.capture.start().await {
            warn!("Failed to restart capture: {}", e);
        }
    }
}
