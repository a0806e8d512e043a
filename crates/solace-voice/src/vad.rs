//! Voice activity detection.
//!
//! A debounced energy-threshold detector. Audio level samples arrive on
//! a fixed frame clock, levels above the threshold mark speech, and a
//! configurable run of sub-threshold frames ends the utterance. The
//! hysteresis window keeps natural mid-sentence pauses from splitting a
//! turn in two.

use solace_core::config::VoiceConfig;

/// Level reported for an all-zero frame, in dBFS.
pub const SILENCE_FLOOR_DB: f32 = -160.0;

/// Tuning parameters for the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Levels at or below this count as silence, in dBFS.
    pub silence_threshold_db: f32,
    /// Consecutive silence required to end an utterance, in milliseconds.
    pub silence_duration_ms: u64,
    /// Interval between level samples, in milliseconds.
    pub frame_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            silence_duration_ms: 1500,
            frame_ms: 50,
        }
    }
}

impl From<&VoiceConfig> for VadConfig {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            silence_threshold_db: config.silence_threshold_db,
            silence_duration_ms: config.silence_duration_ms,
            frame_ms: config.frame_ms,
        }
    }
}

/// Edge emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// The level rose above the threshold after a quiet stretch.
    SpeechStart,
    /// The level stayed at or below the threshold for the full window.
    SpeechEnd,
}

/// Debounced speech edge detector over a stream of level samples.
///
/// Emits at most one [`VadEvent::SpeechStart`] per utterance and one
/// [`VadEvent::SpeechEnd`] once the accumulated silence reaches the
/// configured duration. Time advances with the samples themselves, one
/// frame per call, so behavior is deterministic for a given sequence.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    config: VadConfig,
    speaking: bool,
    silence_ms: u64,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            silence_ms: 0,
        }
    }

    /// Feeds one level sample and returns the edge it produced, if any.
    ///
    /// A level exactly at the threshold counts as silence. Silence while
    /// already quiet produces nothing, and any audible sample resets the
    /// silence clock to zero.
    pub fn push(&mut self, level_db: f32) -> Option<VadEvent> {
        if level_db > self.config.silence_threshold_db {
            self.silence_ms = 0;
            if !self.speaking {
                self.speaking = true;
                return Some(VadEvent::SpeechStart);
            }
            return None;
        }

        if !self.speaking {
            return None;
        }

        self.silence_ms += self.config.frame_ms;
        if self.silence_ms >= self.config.silence_duration_ms {
            self.speaking = false;
            self.silence_ms = 0;
            return Some(VadEvent::SpeechEnd);
        }
        None
    }

    /// Whether the detector currently considers the user to be speaking.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Clears all accumulated state, ready for a fresh utterance.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.silence_ms = 0;
    }
}

/// RMS level of a PCM frame in dBFS, for samples normalized to [-1, 1].
///
/// Empty or all-zero frames report [`SILENCE_FLOOR_DB`].
pub fn frame_level_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_FLOOR_DB;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();
    20.0 * rms.max(1e-8).log10()
}

/// Maps a dBFS level onto [0, 1] for meter display.
pub fn normalize_level(level_db: f32) -> f32 {
    ((level_db - SILENCE_FLOOR_DB) / -SILENCE_FLOOR_DB).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vad() -> EnergyVad {
        EnergyVad::new(VadConfig::default())
    }

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-3, "expected {} to be close to {}", b, a);
    }

    #[test]
    fn test_default_config() {
        let config = VadConfig::default();
        assert_close(config.silence_threshold_db, -40.0);
        assert_eq!(config.silence_duration_ms, 1500);
        assert_eq!(config.frame_ms, 50);
    }

    #[test]
    fn test_config_from_voice_config() {
        let mut voice = VoiceConfig::default();
        voice.silence_threshold_db = -35.0;
        voice.silence_duration_ms = 900;
        voice.frame_ms = 30;

        let config = VadConfig::from(&voice);
        assert_close(config.silence_threshold_db, -35.0);
        assert_eq!(config.silence_duration_ms, 900);
        assert_eq!(config.frame_ms, 30);
    }

    #[test]
    fn test_speech_start_fires_once() {
        let mut vad = vad();
        assert_eq!(vad.push(-20.0), Some(VadEvent::SpeechStart));
        assert_eq!(vad.push(-20.0), None);
        assert_eq!(vad.push(-10.0), None);
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_silence_while_quiet_produces_nothing() {
        let mut vad = vad();
        for _ in 0..100 {
            assert_eq!(vad.push(-50.0), None);
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_speech_end_fires_after_full_window() {
        let mut vad = vad();
        assert_eq!(vad.push(-20.0), Some(VadEvent::SpeechStart));
        assert_eq!(vad.push(-20.0), None);
        assert_eq!(vad.push(-20.0), None);

        // 1500 ms of silence at 50 ms per frame is 30 frames.
        for i in 0..29 {
            assert_eq!(vad.push(-50.0), None, "ended early at frame {}", i);
        }
        assert_eq!(vad.push(-50.0), Some(VadEvent::SpeechEnd));
        assert!(!vad.is_speaking());

        // Further silence stays quiet; no repeated end edges.
        assert_eq!(vad.push(-50.0), None);
    }

    #[test]
    fn test_short_pause_does_not_end_utterance() {
        let mut vad = vad();
        assert_eq!(vad.push(-20.0), Some(VadEvent::SpeechStart));

        // A 250 ms dip, then the voice comes back.
        for _ in 0..5 {
            assert_eq!(vad.push(-50.0), None);
        }
        assert_eq!(vad.push(-20.0), None);
        assert!(vad.is_speaking());

        // The silence clock restarted, so a full window is needed again.
        for _ in 0..29 {
            assert_eq!(vad.push(-50.0), None);
        }
        assert_eq!(vad.push(-50.0), Some(VadEvent::SpeechEnd));
    }

    #[test]
    fn test_level_exactly_at_threshold_is_silence() {
        let mut vad = vad();
        assert_eq!(vad.push(-40.0), None);
        assert!(!vad.is_speaking());

        assert_eq!(vad.push(-39.9), Some(VadEvent::SpeechStart));
        for _ in 0..29 {
            assert_eq!(vad.push(-40.0), None);
        }
        assert_eq!(vad.push(-40.0), Some(VadEvent::SpeechEnd));
    }

    #[test]
    fn test_new_utterance_after_end() {
        let mut vad = vad();
        assert_eq!(vad.push(-20.0), Some(VadEvent::SpeechStart));
        for _ in 0..29 {
            vad.push(-50.0);
        }
        assert_eq!(vad.push(-50.0), Some(VadEvent::SpeechEnd));

        assert_eq!(vad.push(-18.0), Some(VadEvent::SpeechStart));
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut vad = vad();
        vad.push(-20.0);
        for _ in 0..10 {
            vad.push(-50.0);
        }
        assert!(vad.is_speaking());

        vad.reset();
        assert!(!vad.is_speaking());

        // Post-reset the next audible frame is a fresh start edge.
        assert_eq!(vad.push(-20.0), Some(VadEvent::SpeechStart));
    }

    #[test]
    fn test_frame_level_db_empty_and_silent() {
        assert_close(frame_level_db(&[]), SILENCE_FLOOR_DB);
        assert_close(frame_level_db(&[0.0; 256]), SILENCE_FLOOR_DB);
    }

    #[test]
    fn test_frame_level_db_known_amplitudes() {
        // Full-scale square wave has an RMS of 1.0, i.e. 0 dBFS.
        let full: Vec<f32> = (0..256).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert_close(frame_level_db(&full), 0.0);

        // Half amplitude is about -6.02 dBFS.
        let half: Vec<f32> = full.iter().map(|s| s * 0.5).collect();
        assert_close(frame_level_db(&half), -6.0206);
    }

    #[test]
    fn test_normalize_level_bounds() {
        assert_close(normalize_level(SILENCE_FLOOR_DB), 0.0);
        assert_close(normalize_level(0.0), 1.0);
        assert_close(normalize_level(-80.0), 0.5);

        // Out-of-range input clamps instead of over/underflowing the meter.
        assert_close(normalize_level(-200.0), 0.0);
        assert_close(normalize_level(10.0), 1.0);
    }
}
