//! Detection loop behaviour with scripted audio, fake engines and a counting host.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use wake_detector::audio::vad::{SpeechGate, VoiceGate};
use wake_detector::audio::{AudioSource, Frame, FRAME_SAMPLES};
use wake_detector::recorder::{DebugRecorder, Track};
use wake_detector::state_machine::LoopState;
use wake_detector::trigger::HostSignal;
use wake_detector::wake::{KeywordScorer, NeuralEngine};
use wake_detector::{
    DetectionLoop, DetectorConfig, DrainReport, Error, Result, RuntimeOptions, ShutdownSignal, StepOutcome,
    WakeWordEngine,
};

/// Plays back a queue of reads, then silence. Optionally requests shutdown
/// once the queue is exhausted. `backlog` frames are reported by `drain`.
struct ScriptedSource {
    reads: VecDeque<Result<Frame>>,
    backlog: usize,
    stop_when_empty: Option<ShutdownSignal>,
}

impl ScriptedSource {
    fn frames(frames: Vec<Frame>) -> Self {
        Self {
            reads: frames.into_iter().map(Ok).collect(),
            backlog: 0,
            stop_when_empty: None,
        }
    }

    fn silence(count: usize) -> Self {
        Self::frames(vec![Frame::silence(); count])
    }

    fn with_backlog(mut self, frames: usize) -> Self {
        self.backlog = frames;
        self
    }

    fn stopping(mut self, shutdown: &ShutdownSignal) -> Self {
        self.stop_when_empty = Some(shutdown.clone());
        self
    }
}

impl AudioSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Frame> {
        match self.reads.pop_front() {
            Some(read) => read,
            None => {
                if let Some(shutdown) = &self.stop_when_empty {
                    shutdown.request();
                }
                Ok(Frame::silence())
            }
        }
    }

    fn drain(&mut self) -> usize {
        std::mem::take(&mut self.backlog) * FRAME_SAMPLES
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct OpenGate;

impl SpeechGate for OpenGate {
    fn is_voiced(&mut self, _frame: &Frame) -> bool {
        true
    }
}

/// Reports one keyword at a fixed score and counts calls and resets.
struct FixedScorer {
    score: f32,
    calls: Rc<Cell<usize>>,
    resets: Rc<Cell<usize>>,
}

impl KeywordScorer for FixedScorer {
    fn score(&mut self, samples: &[i16]) -> Result<Vec<(String, f32)>> {
        assert_eq!(samples.len(), FRAME_SAMPLES);
        self.calls.set(self.calls.get() + 1);
        Ok(vec![("hey_igor".to_string(), self.score)])
    }

    fn reset(&mut self) {
        self.resets.set(self.resets.get() + 1);
    }
}

type DropLog = Rc<RefCell<Vec<&'static str>>>;

/// Silent source that notes when it is dropped.
struct LoggedSource {
    name: &'static str,
    log: DropLog,
}

impl AudioSource for LoggedSource {
    fn read_frame(&mut self) -> Result<Frame> {
        Ok(Frame::silence())
    }

    fn drain(&mut self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for LoggedSource {
    fn drop(&mut self) {
        self.log.borrow_mut().push(self.name);
    }
}

/// Scorer that never matches and notes when it is dropped.
struct LoggedScorer {
    log: DropLog,
}

impl KeywordScorer for LoggedScorer {
    fn score(&mut self, _samples: &[i16]) -> Result<Vec<(String, f32)>> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}

impl Drop for LoggedScorer {
    fn drop(&mut self) {
        self.log.borrow_mut().push("engine");
    }
}

#[derive(Clone, Default)]
struct CountingHost {
    sent: Rc<Cell<usize>>,
}

impl HostSignal for CountingHost {
    fn notify(&mut self) -> Result<()> {
        self.sent.set(self.sent.get() + 1);
        Ok(())
    }
}

/// Engine that matches on every frame it scores.
fn eager_engine(score: f32) -> (WakeWordEngine, Rc<Cell<usize>>) {
    let (engine, calls, _) = counted_engine(score);
    (engine, calls)
}

fn counted_engine(score: f32) -> (WakeWordEngine, Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let resets = Rc::new(Cell::new(0));
    let scorer = FixedScorer {
        score,
        calls: Rc::clone(&calls),
        resets: Rc::clone(&resets),
    };
    let engine = NeuralEngine::new(Box::new(scorer)).with_cooldown_frames(0);
    (engine.into(), calls, resets)
}

fn tone(freq: f32, amplitude: f32) -> Frame {
    Frame::from_samples(
        (0..FRAME_SAMPLES)
            .map(|i| (amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / 16_000.0).sin()) as i16)
            .collect(),
    )
}

/// Frame `index` of a sustained vowel: 140 Hz voice, 20 harmonics, formants
/// near 700 and 1200 Hz, peak around `amplitude`.
fn vowel(index: usize, amplitude: f32) -> Frame {
    let weight =
        |f: f32| (-((f - 700.0) / 150.0).powi(2)).exp() + 0.6 * (-((f - 1200.0) / 200.0).powi(2)).exp() + 0.05;
    let norm: f32 = (1..=20).map(|h| weight(140.0 * h as f32)).sum();
    let offset = index * FRAME_SAMPLES;
    Frame::from_samples(
        (offset..offset + FRAME_SAMPLES)
            .map(|n| {
                let t = n as f32 / 16_000.0;
                let sum: f32 = (1..=20)
                    .map(|h| {
                        let f = 140.0 * h as f32;
                        weight(f) * (2.0 * std::f32::consts::PI * f * t).sin()
                    })
                    .sum();
                (amplitude * sum / norm) as i16
            })
            .collect(),
    )
}

#[test]
fn two_matches_within_cooldown_notify_once() {
    let (engine, _) = eager_engine(0.9);
    let host = CountingHost::default();
    let mut detection = DetectionLoop::builder(Box::new(ScriptedSource::silence(4)), engine)
        .gate(Box::new(OpenGate))
        .notifier(Box::new(host.clone()))
        .cooldown(Duration::from_secs(60))
        .settle(Duration::ZERO)
        .build();

    assert_eq!(detection.step().unwrap(), StepOutcome::Triggered("hey_igor".into()));
    assert_eq!(detection.step().unwrap(), StepOutcome::Debounced("hey_igor".into()));
    assert_eq!(detection.step().unwrap(), StepOutcome::Debounced("hey_igor".into()));

    assert_eq!(host.sent.get(), 1);
    let stats = detection.stats();
    assert_eq!(stats.triggers, 1);
    assert_eq!(stats.debounced, 2);
    assert_eq!(detection.state(), LoopState::Idle);
}

#[test]
fn matches_after_cooldown_notify_again() {
    let (engine, _) = eager_engine(0.9);
    let host = CountingHost::default();
    let mut detection = DetectionLoop::builder(Box::new(ScriptedSource::silence(2)), engine)
        .gate(Box::new(OpenGate))
        .notifier(Box::new(host.clone()))
        .cooldown(Duration::ZERO)
        .settle(Duration::ZERO)
        .build();

    assert!(matches!(detection.step().unwrap(), StepOutcome::Triggered(_)));
    assert!(matches!(detection.step().unwrap(), StepOutcome::Triggered(_)));
    assert_eq!(host.sent.get(), 2);
}

#[test]
fn five_seconds_of_silence_never_escalates() {
    // 5 s at 80 ms per frame
    let frames = 63;
    let (engine, engine_calls) = eager_engine(0.9);
    let host = CountingHost::default();
    let mut detection = DetectionLoop::builder(Box::new(ScriptedSource::silence(frames)), engine)
        .reference(Box::new(ScriptedSource::silence(frames)))
        .gate(Box::new(VoiceGate::new()))
        .notifier(Box::new(host.clone()))
        .settle(Duration::ZERO)
        .build();

    for _ in 0..frames {
        assert_eq!(detection.step().unwrap(), StepOutcome::Silent);
    }

    let stats = detection.stats();
    assert_eq!(stats.frames, frames as u64);
    assert_eq!(stats.voiced, 0);
    assert_eq!(stats.triggers, 0);
    assert_eq!(engine_calls.get(), 0);
    assert_eq!(host.sent.get(), 0);
}

#[test]
fn voice_gate_passes_speech_to_engine() {
    let frames = 25;
    let (engine, engine_calls) = eager_engine(0.5);
    let host = CountingHost::default();
    let mic = ScriptedSource::frames((0..frames).map(|i| vowel(i, 8000.0)).collect());
    let mut detection = DetectionLoop::builder(Box::new(mic), engine)
        .gate(Box::new(VoiceGate::new()))
        .notifier(Box::new(host.clone()))
        .build();

    let processed = (0..frames)
        .filter(|_| detection.step().unwrap() == StepOutcome::Processed)
        .count();

    let stats = detection.stats();
    assert!(stats.voiced >= 20, "only {} of {frames} vowel frames passed the gate", stats.voiced);
    assert_eq!(processed as u64, stats.voiced);
    assert_eq!(engine_calls.get() as u64, stats.voiced);
    assert_eq!(host.sent.get(), 0);
}

#[test]
fn sub_threshold_scores_are_processed_without_trigger() {
    let (engine, engine_calls) = eager_engine(0.5);
    let host = CountingHost::default();
    let mut detection = DetectionLoop::builder(Box::new(ScriptedSource::silence(3)), engine)
        .gate(Box::new(OpenGate))
        .notifier(Box::new(host.clone()))
        .build();

    for _ in 0..3 {
        assert_eq!(detection.step().unwrap(), StepOutcome::Processed);
    }
    assert_eq!(engine_calls.get(), 3);
    assert_eq!(host.sent.get(), 0);
}

#[test]
fn trigger_resets_engine_context_but_debounce_does_not() {
    let (engine, _, resets) = counted_engine(0.9);
    let mut detection = DetectionLoop::builder(Box::new(ScriptedSource::silence(2)), engine)
        .gate(Box::new(OpenGate))
        .cooldown(Duration::from_secs(60))
        .settle(Duration::ZERO)
        .build();

    // The engine resets its scorer on every match; the loop adds one after a drain.
    assert!(matches!(detection.step().unwrap(), StepOutcome::Triggered(_)));
    assert_eq!(resets.get(), 2);
    assert!(matches!(detection.step().unwrap(), StepOutcome::Debounced(_)));
    assert_eq!(resets.get(), 3);
}

#[test]
fn teardown_releases_reference_then_mic_then_engine() {
    let log = DropLog::default();
    let engine: WakeWordEngine = NeuralEngine::new(Box::new(LoggedScorer { log: Rc::clone(&log) })).into();
    let mic = LoggedSource {
        name: "mic",
        log: Rc::clone(&log),
    };
    let reference = LoggedSource {
        name: "reference",
        log: Rc::clone(&log),
    };
    let mut detection = DetectionLoop::builder(Box::new(mic), engine)
        .reference(Box::new(reference))
        .gate(Box::new(OpenGate))
        .build();
    assert_eq!(detection.step().unwrap(), StepOutcome::Processed);

    drop(detection);
    assert_eq!(*log.borrow(), ["reference", "mic", "engine"]);
}

#[test]
fn open_rejects_invalid_config_before_touching_devices() {
    let mut config = DetectorConfig::default();
    config.echo.strength = 1.5;
    let result = DetectionLoop::open(&config, &RuntimeOptions::default());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn drain_is_idempotent() {
    let (engine, _) = eager_engine(0.0);
    let mut detection =
        DetectionLoop::builder(Box::new(ScriptedSource::silence(0).with_backlog(3)), engine)
            .reference(Box::new(ScriptedSource::silence(0).with_backlog(2)))
            .build();

    assert_eq!(
        detection.drain(),
        DrainReport {
            mic_samples: 3 * FRAME_SAMPLES,
            reference_samples: 2 * FRAME_SAMPLES,
        }
    );
    assert!(detection.drain().is_empty());
}

#[test]
fn trigger_drains_both_sources() {
    let (engine, _) = eager_engine(0.9);
    let mut detection =
        DetectionLoop::builder(Box::new(ScriptedSource::silence(1).with_backlog(5)), engine)
            .reference(Box::new(ScriptedSource::silence(1).with_backlog(5)))
            .gate(Box::new(OpenGate))
            .settle(Duration::ZERO)
            .build();

    assert!(matches!(detection.step().unwrap(), StepOutcome::Triggered(_)));
    assert!(detection.drain().is_empty());
}

#[test]
fn transient_mic_error_drops_one_frame() {
    let (engine, _) = eager_engine(0.0);
    let mic = ScriptedSource {
        reads: VecDeque::from([Err(Error::Audio("overflow".into())), Ok(Frame::silence())]),
        backlog: 0,
        stop_when_empty: None,
    };
    let mut detection = DetectionLoop::builder(Box::new(mic), engine).build();

    assert_eq!(detection.step().unwrap(), StepOutcome::Dropped);
    assert_eq!(detection.state(), LoopState::Idle);
    assert_eq!(detection.step().unwrap(), StepOutcome::Silent);
    assert_eq!(detection.stats().dropped, 1);
    assert_eq!(detection.stats().frames, 1);
}

#[test]
fn fatal_mic_error_ends_run() {
    let (engine, _) = eager_engine(0.0);
    let mic = ScriptedSource {
        reads: VecDeque::from([Err(Error::Device("unplugged".into()))]),
        backlog: 0,
        stop_when_empty: None,
    };
    let mut detection = DetectionLoop::builder(Box::new(mic), engine).build();
    let result = detection.run(&ShutdownSignal::new());
    assert!(matches!(result, Err(Error::Device(_))));
}

#[test]
fn run_stops_on_shutdown_and_finalizes_aligned_recordings() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = ShutdownSignal::new();
    let (engine, _) = eager_engine(0.0);

    let mic = ScriptedSource::frames(vec![tone(440.0, 8000.0); 6]).stopping(&shutdown);
    let reference = ScriptedSource::frames(vec![tone(1000.0, 20_000.0); 3]);
    let mut detection = DetectionLoop::builder(Box::new(mic), engine)
        .reference(Box::new(reference))
        .delay_ms(240)
        .gate(Box::new(OpenGate))
        .recorder(Some(DebugRecorder::create(dir.path()).unwrap()))
        .build();

    detection.run(&shutdown).unwrap();

    // Six scripted frames plus the silent read that requested shutdown.
    let stats = detection.stats();
    assert_eq!(stats.frames, 7);
    // Reference frames only reach the suppressor after three cycles of delay.
    assert_eq!(stats.suppressed, 3);

    for track in [Track::Mic, Track::Reference, Track::Filtered] {
        let reader = hound::WavReader::open(dir.path().join(track.file_name())).unwrap();
        assert_eq!(reader.len() as usize, 7 * FRAME_SAMPLES, "{track:?}");
    }
}

#[test]
fn run_returns_immediately_when_already_stopped() {
    let (engine, _) = eager_engine(0.9);
    let shutdown = ShutdownSignal::new();
    shutdown.request();
    let mut detection = DetectionLoop::builder(Box::new(ScriptedSource::silence(5)), engine).build();
    detection.run(&shutdown).unwrap();
    assert_eq!(detection.stats().frames, 0);
}
