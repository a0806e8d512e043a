//! Collaborator traits for the voice loop.
//!
//! Capture, transcription, and synthesis are injected into the
//! controller through these traits. The in-memory mocks below exercise
//! the loop end-to-end in tests and offline development; the embedding
//! application binds real audio backends to the same traits.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use solace_core::config::VoiceConfig;
use solace_core::error::SolaceError;

/// A captured audio segment handed from the capture device to the
/// transcription service.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub id: Uuid,
    /// Backend-specific locator for the audio data, such as a file path
    /// or an in-memory handle.
    pub uri: String,
    pub duration_secs: f32,
}

impl AudioClip {
    pub fn new(uri: impl Into<String>, duration_secs: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri: uri.into(),
            duration_secs,
        }
    }
}

/// Synthesis parameters derived from voice configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOptions {
    pub language: String,
    /// Named voice to use, or the backend default when unset.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

impl From<&VoiceConfig> for SpeakOptions {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            language: config.language.clone(),
            voice: config.voice.clone(),
            rate: config.rate,
            pitch: config.pitch,
        }
    }
}

/// Microphone capture.
pub trait CaptureDevice: Send + Sync {
    /// Begins capturing a new segment.
    fn start(&self) -> impl Future<Output = Result<(), SolaceError>> + Send;

    /// Stops capturing and returns the finished segment.
    fn stop(&self) -> impl Future<Output = Result<AudioClip, SolaceError>> + Send;

    /// Whether a capture is currently in progress.
    fn is_capturing(&self) -> bool;
}

/// Speech-to-text over captured segments.
pub trait TranscriptionService: Send + Sync {
    /// Transcribes a captured segment in the given language.
    fn transcribe(
        &self,
        clip: &AudioClip,
        language: &str,
    ) -> impl Future<Output = Result<String, SolaceError>> + Send;
}

/// Text-to-speech playback.
pub trait SpeechSynthesizer: Send + Sync {
    /// Speaks `text`, resolving when playback finishes or is stopped.
    fn speak(
        &self,
        text: &str,
        options: &SpeakOptions,
    ) -> impl Future<Output = Result<(), SolaceError>> + Send;

    /// Interrupts any in-flight playback.
    fn stop(&self);

    /// Whether playback is currently in progress.
    fn is_speaking(&self) -> bool;
}

/// In-memory capture device for tests and offline development.
///
/// Clones share state, so a test can keep a handle on a device after
/// moving it into a controller.
#[derive(Clone)]
pub struct MockCaptureDevice {
    capturing: Arc<AtomicBool>,
    clip_duration_secs: f32,
    starts: Arc<AtomicUsize>,
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self {
            capturing: Arc::new(AtomicBool::new(false)),
            clip_duration_secs: 2.5,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the duration reported by clips this device produces.
    pub fn with_clip_duration(mut self, secs: f32) -> Self {
        self.clip_duration_secs = secs;
        self
    }

    /// Number of times capture has been started.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Default for MockCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for MockCaptureDevice {
    async fn start(&self) -> Result<(), SolaceError> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            return Err(SolaceError::Capture(
                "Capture already in progress".to_string(),
            ));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Mock capture started");
        Ok(())
    }

    async fn stop(&self) -> Result<AudioClip, SolaceError> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Err(SolaceError::Capture("No capture in progress".to_string()));
        }
        tracing::debug!("Mock capture stopped");
        Ok(AudioClip::new("mock://clip", self.clip_duration_secs))
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

/// Scripted transcription results, popped in call order. Clones share
/// the script.
///
/// An exhausted script yields empty text, which the voice controller
/// treats the same as silence.
#[derive(Clone)]
pub struct MockTranscriptionService {
    script: Arc<Mutex<VecDeque<Result<String, SolaceError>>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriptionService {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(results: Vec<Result<String, SolaceError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(results.into())),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delays each transcription, for tests that race teardown against
    /// an in-flight turn.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTranscriptionService {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptionService for MockTranscriptionService {
    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<String, SolaceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if clip.duration_secs <= 0.0 {
            return Err(SolaceError::Transcription("Clip has no audio".to_string()));
        }
        tracing::debug!(clip = %clip.id, language, "Mock transcription");
        self.script
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Records spoken text instead of playing audio. Clones share the
/// recording.
#[derive(Clone)]
pub struct MockSynthesizer {
    spoken: Arc<Mutex<Vec<String>>>,
    speaking: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            spoken: Arc::new(Mutex::new(Vec::new())),
            speaking: Arc::new(AtomicBool::new(false)),
            stops: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Delays each playback, for tests that interrupt mid-speech.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Everything spoken so far, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().expect("spoken mutex poisoned").clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<(), SolaceError> {
        self.speaking.store(true, Ordering::SeqCst);
        tracing::debug!(language = %options.language, chars = text.len(), "Mock synthesis");
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.spoken
            .lock()
            .expect("spoken mutex poisoned")
            .push(text.to_string());
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}
