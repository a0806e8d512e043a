//! Voice session state machine.
//!
//! Tracks the lifecycle of a hands-free conversation turn and enforces
//! valid transitions between modes. Invalid transitions are rejected
//! with an error rather than silently corrupting session state.

use std::fmt;
use std::sync::{Arc, Mutex};

use solace_core::error::SolaceError;

/// Modes of a voice session.
///
/// A session cycles listening -> processing -> speaking -> listening
/// until it is ended. Processing may fall back to listening directly
/// when a turn produced nothing usable (silence or a failed
/// transcription), and any active mode can drop to idle on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceMode {
    /// No session is running.
    Idle,
    /// Capturing audio and watching the level for speech edges.
    Listening,
    /// A turn ended; transcribing and waiting on the response.
    Processing,
    /// Playing the synthesized response.
    Speaking,
}

impl fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceMode::Idle => "idle",
            VoiceMode::Listening => "listening",
            VoiceMode::Processing => "processing",
            VoiceMode::Speaking => "speaking",
        };
        write!(f, "{}", name)
    }
}

impl VoiceMode {
    /// Returns true if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: VoiceMode) -> bool {
        matches!(
            (self, next),
            (VoiceMode::Idle, VoiceMode::Listening)
                | (VoiceMode::Listening, VoiceMode::Processing)
                | (VoiceMode::Processing, VoiceMode::Speaking)
                | (VoiceMode::Processing, VoiceMode::Listening)
                | (VoiceMode::Speaking, VoiceMode::Listening)
                | (VoiceMode::Listening, VoiceMode::Idle)
                | (VoiceMode::Processing, VoiceMode::Idle)
                | (VoiceMode::Speaking, VoiceMode::Idle)
        )
    }
}

/// Thread-safe state machine guarding the voice session lifecycle.
///
/// Clones share the same underlying state, so the controller and any
/// spawned tasks observe a single source of truth.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: Arc<Mutex<VoiceMode>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VoiceMode::Idle)),
        }
    }

    /// Returns the current mode.
    pub fn current(&self) -> VoiceMode {
        *self.state.lock().expect("state mutex poisoned")
    }

    /// Attempts to transition to `next`, failing if the move is invalid.
    pub fn transition(&self, next: VoiceMode) -> Result<(), SolaceError> {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if state.can_transition_to(next) {
            tracing::debug!("Voice mode: {} -> {}", state, next);
            *state = next;
            Ok(())
        } else {
            tracing::error!("Invalid voice mode transition: {} -> {}", state, next);
            Err(SolaceError::Voice(format!(
                "Invalid voice mode transition: {} -> {}",
                state, next
            )))
        }
    }

    /// Forces the machine back to idle regardless of the current mode.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != VoiceMode::Idle {
            tracing::warn!("Forcing voice mode reset from {}", state);
        }
        *state = VoiceMode::Idle;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
