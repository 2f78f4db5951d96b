//! Detection loop: one microphone frame per cycle through
//! delay alignment → voice gate → echo suppression → wake engine → host signal.
//!
//! The microphone read is the only blocking call and sets the ~80 ms cadence.
//! The reference is read without blocking in the same cycle and pushed through
//! the delay buffer every cycle, gated or not, so alignment never drifts.
//! After a confirmed trigger the loop settles, then drains both sources so the
//! next cycle starts from live audio instead of a backlog.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::audio::delay::DelayBuffer;
use crate::audio::echo::{EchoSuppressor, SuppressorParams};
use crate::audio::microphone::MicrophoneSource;
use crate::audio::monitor::MonitorSource;
use crate::audio::vad::{SpeechGate, VoiceGate};
use crate::audio::{AudioSource, Frame, SilenceSource};
use crate::config::DetectorConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::recorder::{DebugRecorder, Track};
use crate::shutdown::ShutdownSignal;
use crate::state_machine::{DetectionState, LoopState, LoopStateMachine};
use crate::trigger::{HostNotifier, HostSignal};
use crate::wake::{ModelPaths, WakeWordEngine};
use crate::Result;

/// Minimum interval between two notifications to the host.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(2000);
/// Pause after a trigger before the sources are drained.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1000);
/// Cycles between periodic metric summaries (~60 s).
pub const METRICS_EVERY_CYCLES: u64 = 750;

/// What one call to [`DetectionLoop::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The microphone read failed; nothing was processed.
    Dropped,
    /// The gate judged the frame non-speech.
    Silent,
    /// The frame reached the engine without a match.
    Processed,
    /// The engine matched inside the loop cooldown; the host was not signalled.
    Debounced(String),
    /// The engine matched and the host was signalled.
    Triggered(String),
}

/// Samples discarded by a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub mic_samples: usize,
    pub reference_samples: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.mic_samples == 0 && self.reference_samples == 0
    }
}

/// Running counters since the loop started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub frames: u64,
    pub voiced: u64,
    pub suppressed: u64,
    pub triggers: u64,
    pub debounced: u64,
    pub dropped: u64,
}

/// Process-level settings that do not live in the shared config file.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub pid_file: PathBuf,
    pub debug_dir: PathBuf,
    pub models: ModelPaths,
    pub cooldown: Duration,
    pub settle: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from("/tmp/voice_agent.pid"),
            debug_dir: PathBuf::from("/tmp"),
            models: ModelPaths::default(),
            cooldown: DEFAULT_COOLDOWN,
            settle: DEFAULT_SETTLE,
        }
    }
}

/// Assembles a [`DetectionLoop`] from already-opened parts.
pub struct DetectionLoopBuilder {
    mic: Box<dyn AudioSource>,
    engine: WakeWordEngine,
    reference: Box<dyn AudioSource>,
    delay_ms: u32,
    gate: Box<dyn SpeechGate>,
    params: SuppressorParams,
    notifier: Box<dyn HostSignal>,
    recorder: Option<DebugRecorder>,
    cooldown: Duration,
    settle: Duration,
}

impl DetectionLoopBuilder {
    pub fn reference(mut self, source: Box<dyn AudioSource>) -> Self {
        self.reference = source;
        self
    }

    pub fn delay_ms(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn gate(mut self, gate: Box<dyn SpeechGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn suppressor(mut self, params: SuppressorParams) -> Self {
        self.params = params;
        self
    }

    pub fn notifier(mut self, notifier: Box<dyn HostSignal>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn recorder(mut self, recorder: Option<DebugRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn build(self) -> DetectionLoop {
        let delay = DelayBuffer::for_delay(self.delay_ms);
        if let Some(buffer) = &delay {
            debug!(delay_ms = self.delay_ms, capacity = buffer.capacity(), "delay_buffer_ready");
        }
        DetectionLoop {
            recorder: self.recorder,
            notifier: self.notifier,
            suppressor: EchoSuppressor::new(self.params),
            gate: self.gate,
            delay,
            reference: self.reference,
            mic: self.mic,
            engine: self.engine,
            state: LoopStateMachine::new(),
            detection: DetectionState::new(self.cooldown),
            settle: self.settle,
            metrics: Arc::new(MetricsRegistry::new()),
            stats: LoopStats::default(),
        }
    }
}

/// The single-threaded acoustic front end.
pub struct DetectionLoop {
    // Field order is drop order, the reverse of `open`: recordings,
    // reference process, mic stream, engine.
    recorder: Option<DebugRecorder>,
    notifier: Box<dyn HostSignal>,
    suppressor: EchoSuppressor,
    gate: Box<dyn SpeechGate>,
    delay: Option<DelayBuffer>,
    reference: Box<dyn AudioSource>,
    mic: Box<dyn AudioSource>,
    engine: WakeWordEngine,
    state: LoopStateMachine,
    detection: DetectionState,
    settle: Duration,
    metrics: Arc<MetricsRegistry>,
    stats: LoopStats,
}

impl DetectionLoop {
    /// Start from a microphone and an engine; everything else has defaults
    /// (silent reference, no delay, WebRTC gate, no host, no recording).
    pub fn builder(mic: Box<dyn AudioSource>, engine: WakeWordEngine) -> DetectionLoopBuilder {
        DetectionLoopBuilder {
            mic,
            engine,
            reference: Box::new(SilenceSource),
            delay_ms: 0,
            gate: Box::new(VoiceGate::new()),
            params: SuppressorParams::default(),
            notifier: Box::new(HostNotifier::disabled()),
            recorder: None,
            cooldown: DEFAULT_COOLDOWN,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Open devices, models and files described by `config`.
    ///
    /// The engine is loaded before any device so a missing model fails fast.
    /// The reference and the recordings degrade instead of failing.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the config is invalid, the engine cannot be
    /// built, or no microphone can be opened.
    pub fn open(config: &DetectorConfig, options: &RuntimeOptions) -> Result<Self> {
        config.validate()?;
        let engine = WakeWordEngine::from_config(config, &options.models)?;
        let mic = MicrophoneSource::open(config.microphone.device.as_ref())?;

        let reference: Box<dyn AudioSource> = if config.reference.enabled {
            match MonitorSource::open(config.reference.device.as_ref()) {
                Ok(source) => Box::new(source),
                Err(e) => {
                    warn!(error = %e, "reference capture unavailable, using silence");
                    Box::new(SilenceSource)
                }
            }
        } else {
            Box::new(SilenceSource)
        };

        let recorder = if config.debug_audio {
            DebugRecorder::create(&options.debug_dir)
                .map_err(|e| warn!(error = %e, "debug recording disabled"))
                .ok()
        } else {
            None
        };

        info!(
            reference = reference.name(),
            delay_ms = config.reference.delay_ms,
            debug_audio = recorder.is_some(),
            "detection_loop_ready"
        );

        Ok(Self::builder(Box::new(mic), engine)
            .reference(reference)
            .delay_ms(if config.reference.enabled { config.reference.delay_ms } else { 0 })
            .suppressor(config.echo)
            .notifier(Box::new(HostNotifier::from_pid_file(&options.pid_file)))
            .recorder(recorder)
            .cooldown(options.cooldown)
            .settle(options.settle)
            .build())
    }

    pub fn state(&self) -> LoopState {
        self.state.current()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Run one detection cycle.
    ///
    /// # Errors
    ///
    /// Only fatal microphone errors are returned; everything else is handled
    /// inside the cycle.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let cycle = self.metrics.span(metric_names::CYCLE);

        let mic = match self.mic.read_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "mic_read_failed");
                self.stats.dropped += 1;
                return Ok(StepOutcome::Dropped);
            }
        };
        self.stats.frames += 1;
        self.transition(LoopState::Processing);

        let reference = self.reference.read_frame().unwrap_or_else(|e| {
            debug!(error = %e, "reference_read_failed");
            Frame::silence()
        });
        self.record(Track::Mic, &mic);
        self.record(Track::Reference, &reference);

        let aligned = match &mut self.delay {
            Some(delay) => delay.push_and_pop(reference),
            None => reference,
        };

        let gate_span = self.metrics.span(metric_names::GATE);
        let voiced = self.gate.is_voiced(&mic);
        gate_span.finish();
        if !voiced {
            self.record(Track::Filtered, &mic);
            self.end_cycle(cycle);
            self.transition(LoopState::Idle);
            return Ok(StepOutcome::Silent);
        }
        self.stats.voiced += 1;

        let suppress_span = self.metrics.span(metric_names::SUPPRESS);
        if aligned.abs_energy() > self.suppressor.params().silence_threshold {
            self.stats.suppressed += 1;
        }
        let cleaned = self.suppressor.process(&mic, &aligned);
        suppress_span.finish();
        self.record(Track::Filtered, &cleaned);

        let engine_span = self.metrics.span(metric_names::ENGINE);
        let keyword = self.engine.process(&cleaned);
        engine_span.finish();
        self.end_cycle(cycle);

        let Some(keyword) = keyword else {
            trace!(rms = cleaned.rms(), "no_match");
            self.transition(LoopState::Idle);
            return Ok(StepOutcome::Processed);
        };

        let now = Instant::now();
        if !self.detection.should_trigger(now) {
            info!(keyword = %keyword, "wake_debounced");
            self.stats.debounced += 1;
            self.transition(LoopState::Idle);
            return Ok(StepOutcome::Debounced(keyword));
        }

        self.transition(LoopState::Cooldown);
        self.detection.record_trigger(now);
        self.stats.triggers += 1;
        let event_id = uuid::Uuid::new_v4().to_string();
        info!(
            keyword = %keyword,
            event_id = %event_id,
            engine = %self.engine.kind(),
            "wake_detected"
        );
        if let Err(e) = self.notifier.notify() {
            warn!(event_id = %event_id, error = %e, "host_notify_failed");
        }

        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        self.drain();
        self.engine.reset();
        self.transition(LoopState::Idle);
        Ok(StepOutcome::Triggered(keyword))
    }

    /// Discard whatever both sources accumulated.
    pub fn drain(&mut self) -> DrainReport {
        let report = DrainReport {
            mic_samples: self.mic.drain(),
            reference_samples: self.reference.drain(),
        };
        debug!(
            mic_samples = report.mic_samples,
            reference_samples = report.reference_samples,
            "buffers_drained"
        );
        report
    }

    /// Step until `shutdown` is requested or a fatal error occurs, then log
    /// the summary and close the recordings.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        info!(engine = %self.engine.kind(), "detection_loop_started");
        let result = loop {
            if shutdown.is_requested() {
                break Ok(());
            }
            if let Err(e) = self.step() {
                error!(error = %e, "detection_loop_failed");
                break Err(e);
            }
        };
        self.finish();
        result
    }

    fn finish(&mut self) {
        info!(
            stats = ?self.stats,
            metrics = ?self.metrics.summary(),
            "detection_loop_stopped"
        );
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finalize() {
                warn!(error = %e, "debug_recording_finalize_failed");
            }
        }
    }

    fn transition(&mut self, next: LoopState) {
        let _ = self.state.transition(next);
    }

    fn record(&mut self, track: Track, frame: &Frame) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        if let Err(e) = recorder.write(track, frame) {
            warn!(error = %e, "debug recording stopped");
            self.recorder = None;
        }
    }

    fn end_cycle(&mut self, cycle: crate::metrics::TimingSpan) {
        cycle.finish();
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.end_cycle() {
                warn!(error = %e, "debug recording stopped");
                self.recorder = None;
            }
        }
        if self.stats.frames % METRICS_EVERY_CYCLES == 0 {
            debug!(frames = self.stats.frames, metrics = ?self.metrics.summary(), "metrics_summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_report_emptiness() {
        assert!(DrainReport::default().is_empty());
        assert!(!DrainReport {
            mic_samples: 0,
            reference_samples: 1280
        }
        .is_empty());
    }

    #[test]
    fn runtime_defaults() {
        let options = RuntimeOptions::default();
        assert_eq!(options.pid_file, PathBuf::from("/tmp/voice_agent.pid"));
        assert_eq!(options.cooldown, Duration::from_secs(2));
        assert_eq!(options.settle, Duration::from_secs(1));
    }
}
