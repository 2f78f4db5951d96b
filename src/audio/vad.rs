//! Voice activity gate: cheap short-circuit in front of echo suppression and
//! wake-word scoring. Checks three 10 ms slices of the frame with the WebRTC
//! VAD at its most aggressive profile; any voiced slice passes the frame.
//! Classifier failures fail open.

use earshot::{VoiceActivityDetector, VoiceActivityProfile};
use tracing::trace;

use super::{Frame, SAMPLE_RATE};

/// Samples per classified slice (10 ms at 16 kHz).
pub const SLICE_SAMPLES: usize = (SAMPLE_RATE as usize) / 100;
/// Number of slices checked per frame.
pub const SLICES_PER_FRAME: usize = 3;

/// Decides whether a frame is worth the suppressor and engine.
pub trait SpeechGate {
    fn is_voiced(&mut self, frame: &Frame) -> bool;
}

/// Binary speech / non-speech gate.
pub struct VoiceGate {
    detector: VoiceActivityDetector,
}

impl VoiceGate {
    pub fn new() -> Self {
        Self {
            detector: VoiceActivityDetector::new(VoiceActivityProfile::VERY_AGGRESSIVE),
        }
    }

    /// True if any of the first three 10 ms slices is classified as speech.
    pub fn is_voiced(&mut self, frame: &Frame) -> bool {
        for (index, slice) in frame
            .samples()
            .chunks_exact(SLICE_SAMPLES)
            .take(SLICES_PER_FRAME)
            .enumerate()
        {
            match self.detector.predict_16khz(slice) {
                Ok(true) => {
                    trace!(slice = index, "vad_voiced");
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    trace!(slice = index, error = ?e, "vad_error_fail_open");
                    return true;
                }
            }
        }
        false
    }
}

impl SpeechGate for VoiceGate {
    fn is_voiced(&mut self, frame: &Frame) -> bool {
        VoiceGate::is_voiced(self, frame)
    }
}

impl Default for VoiceGate {
    fn default() -> Self {
        Self::new()
    }
}
