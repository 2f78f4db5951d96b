//! Audio front end: frame type, capture sources, and the per-frame DSP stages.
//! Microphone (blocking) and system-output monitor (non-blocking) both produce
//! fixed-size frames; the delay buffer, voice gate and echo suppressor consume them.

pub mod delay;
pub mod echo;
pub mod microphone;
pub mod monitor;
pub mod vad;

use std::fmt;

use crate::Result;

/// Capture sample rate for every stream (Hz).
pub const SAMPLE_RATE: u32 = 16_000;
/// Samples per processing frame (80 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 1280;
/// Bytes per frame of s16le PCM.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;
/// Frame duration in milliseconds.
pub const FRAME_MS: u32 = (FRAME_SAMPLES as u32 * 1000) / SAMPLE_RATE;

/// Fixed-size block of mono 16-bit PCM. Always exactly [`FRAME_SAMPLES`] long.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Box<[i16]>,
}

impl Frame {
    /// A frame of digital silence.
    pub fn silence() -> Self {
        Self {
            samples: vec![0i16; FRAME_SAMPLES].into_boxed_slice(),
        }
    }

    /// Build a frame from arbitrary samples, zero-padding short input and
    /// truncating long input.
    pub fn from_samples(mut samples: Vec<i16>) -> Self {
        samples.resize(FRAME_SAMPLES, 0);
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// Decode exactly [`FRAME_BYTES`] of s16le PCM. Any other length is rejected.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FRAME_BYTES {
            return None;
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect::<Vec<_>>();
        Some(Self {
            samples: samples.into_boxed_slice(),
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples (always [`FRAME_SAMPLES`]).
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True when every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Sum of absolute sample values.
    pub fn abs_energy(&self) -> u64 {
        self.samples
            .iter()
            .map(|&s| u64::from(s.unsigned_abs()))
            .sum()
    }

    /// RMS level of the frame, for logging.
    pub fn rms(&self) -> f32 {
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let f = f64::from(s);
                f * f
            })
            .sum();
        (sum / self.samples.len() as f64).sqrt() as f32
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.samples.len())
            .field("abs_energy", &self.abs_energy())
            .finish()
    }
}

/// One capture stream feeding the detection loop.
pub trait AudioSource {
    /// Produce the next frame. The microphone blocks until a frame is ready;
    /// the monitor never blocks and falls back to its last good frame.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Discard whatever has accumulated since the last read.
    /// Returns the number of samples thrown away.
    fn drain(&mut self) -> usize;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}

/// Source used when a stream is disabled or its device could not be resolved.
#[derive(Debug, Default)]
pub struct SilenceSource;

impl AudioSource for SilenceSource {
    fn read_frame(&mut self) -> Result<Frame> {
        Ok(Frame::silence())
    }

    fn drain(&mut self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "silence"
    }
}
