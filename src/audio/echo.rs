//! Frequency-domain echo suppression by spectral subtraction.
//!
//! The delay-aligned reference (what the machine is playing) is transformed
//! alongside the microphone frame. Its magnitude spectrum is scaled to the
//! microphone's overall level, weighted by `strength`, and subtracted per bin,
//! never going below `floor` times the original microphone magnitude. The
//! cleaned frame is rebuilt from the floored magnitudes and the microphone
//! phase. No windowing: frames are processed back to back without overlap.

use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use tracing::trace;

use super::Frame;

/// Tuning for [`EchoSuppressor`]. Empirical defaults, not physical constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressorParams {
    /// Fraction of the scaled reference magnitude removed from each bin.
    pub strength: f32,
    /// Minimum fraction of the microphone magnitude kept in each bin.
    pub floor: f32,
    /// Reference frames with a sum of absolute samples at or below this are
    /// treated as silence and bypass suppression.
    pub silence_threshold: u64,
}

impl Default for SuppressorParams {
    fn default() -> Self {
        Self {
            strength: 0.85,
            floor: 0.05,
            silence_threshold: 500_000,
        }
    }
}

/// Guards the reference energy sum against division by zero.
const ENERGY_EPSILON: f32 = 1e-6;

/// Spectral-subtraction echo suppressor. Owns its FFT plans and scratch buffers.
pub struct EchoSuppressor {
    params: SuppressorParams,
    planner: FftPlanner<f32>,
    plan: Option<(usize, Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>)>,
    mic_buf: Vec<Complex32>,
    ref_buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl EchoSuppressor {
    pub fn new(params: SuppressorParams) -> Self {
        Self {
            params,
            planner: FftPlanner::new(),
            plan: None,
            mic_buf: Vec::new(),
            ref_buf: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn params(&self) -> &SuppressorParams {
        &self.params
    }

    /// Suppress the reference out of `mic` using the configured strength.
    pub fn process(&mut self, mic: &Frame, reference: &Frame) -> Frame {
        let strength = self.params.strength;
        self.suppress(mic, reference, strength)
    }

    /// Suppress `reference` out of `mic` with an explicit `strength`.
    pub fn suppress(&mut self, mic: &Frame, reference: &Frame, strength: f32) -> Frame {
        if reference.abs_energy() <= self.params.silence_threshold {
            return mic.clone();
        }
        Frame::from_samples(self.suppress_samples(mic.samples(), reference.samples(), strength))
    }

    /// Slice-level suppression. Fails open (returns `mic` unchanged) when the
    /// lengths differ, the input is empty, or the reference is below the
    /// silence threshold.
    pub fn suppress_samples(&mut self, mic: &[i16], reference: &[i16], strength: f32) -> Vec<i16> {
        if mic.len() != reference.len() || mic.is_empty() {
            trace!(mic = mic.len(), reference = reference.len(), "echo_length_mismatch");
            return mic.to_vec();
        }
        let ref_energy: u64 = reference.iter().map(|&s| u64::from(s.unsigned_abs())).sum();
        if ref_energy <= self.params.silence_threshold {
            return mic.to_vec();
        }

        let n = mic.len();
        let (forward, inverse) = self.plans(n);

        load(&mut self.mic_buf, mic);
        load(&mut self.ref_buf, reference);
        self.scratch
            .resize(forward.get_inplace_scratch_len(), Complex32::new(0.0, 0.0));
        forward.process_with_scratch(&mut self.mic_buf, &mut self.scratch);
        forward.process_with_scratch(&mut self.ref_buf, &mut self.scratch);

        // Real-input spectrum lives in bins 0..=n/2.
        let half = n / 2 + 1;
        let mic_mag: Vec<f32> = self.mic_buf[..half].iter().map(|c| c.norm()).collect();
        let ref_mag: Vec<f32> = self.ref_buf[..half].iter().map(|c| c.norm()).collect();
        let cleaned = floored_magnitudes(&mic_mag, &ref_mag, strength, self.params.floor);

        for k in 0..half {
            let phase = self.mic_buf[k].arg();
            self.mic_buf[k] = Complex32::from_polar(cleaned[k], phase);
        }
        // Hermitian mirror so the inverse transform is real.
        for k in half..n {
            self.mic_buf[k] = self.mic_buf[n - k].conj();
        }

        self.scratch
            .resize(inverse.get_inplace_scratch_len(), Complex32::new(0.0, 0.0));
        inverse.process_with_scratch(&mut self.mic_buf, &mut self.scratch);

        let norm = 1.0 / n as f32;
        self.mic_buf
            .iter()
            .map(|c| (c.re * norm).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
            .collect()
    }

    fn plans(&mut self, n: usize) -> (Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>) {
        match &self.plan {
            Some((len, forward, inverse)) if *len == n => (Arc::clone(forward), Arc::clone(inverse)),
            _ => {
                let forward = self.planner.plan_fft_forward(n);
                let inverse = self.planner.plan_fft_inverse(n);
                self.plan = Some((n, Arc::clone(&forward), Arc::clone(&inverse)));
                (forward, inverse)
            }
        }
    }
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::new(SuppressorParams::default())
    }
}

fn load(buf: &mut Vec<Complex32>, samples: &[i16]) {
    buf.clear();
    buf.extend(samples.iter().map(|&s| Complex32::new(f32::from(s), 0.0)));
}

/// Per-bin subtraction with adaptive scaling and a spectral floor.
///
/// `scale = min(sum(mic) / max(sum(ref), 1e-6), 1)`, then
/// `out[k] = max(mic[k] - strength * scale * ref[k], floor * mic[k])`.
pub fn floored_magnitudes(mic_mag: &[f32], ref_mag: &[f32], strength: f32, floor: f32) -> Vec<f32> {
    let mic_sum: f32 = mic_mag.iter().sum();
    let ref_sum: f32 = ref_mag.iter().sum::<f32>().max(ENERGY_EPSILON);
    let scale = (mic_sum / ref_sum).min(1.0);

    mic_mag
        .iter()
        .zip(ref_mag)
        .map(|(&m, &r)| (m - strength * scale * r).max(m * floor))
        .collect()
}
