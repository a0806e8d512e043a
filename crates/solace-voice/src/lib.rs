//! Solace Voice crate - hands-free conversation loop.
//!
//! Provides the energy-threshold voice activity detector, the
//! idle/listening/processing/speaking state machine, the collaborator
//! traits for audio capture, transcription, and speech synthesis, and
//! the controller that strings them together into a continuous
//! voice turn-taking loop.

pub mod controller;
pub mod services;
pub mod state;
pub mod vad;

pub use controller::{SpeechHandoff, VoiceController, VoiceTurn};
pub use services::{
    AudioClip, CaptureDevice, MockCaptureDevice, MockSynthesizer, MockTranscriptionService,
    SpeakOptions, SpeechSynthesizer, TranscriptionService,
};
pub use state::{StateMachine, VoiceMode};
pub use vad::{frame_level_db, normalize_level, EnergyVad, VadConfig, VadEvent};
