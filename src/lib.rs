//! wake-detector: echo-suppressed wake-word detection for a voice desktop agent.
//! Main library: audio sources, DSP stages, wake engines and the detection loop
//! the binary drives.
//!
//! Wake backends are opt-in cargo features: `vosk` for the transcript engine
//! (French, the default language) and `onnx` for the neural scorer (English).
//! A build without the feature matching the configured language refuses to
//! start with [`Error::Engine`].

pub mod audio;
pub mod config;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod shutdown;
pub mod state_machine;
pub mod trigger;
pub mod wake;

pub use config::{DetectorConfig, DeviceSelector, WakeLanguage};
pub use detector::{DetectionLoop, DrainReport, LoopStats, RuntimeOptions, StepOutcome};
pub use error::{Error, Result};
pub use shutdown::ShutdownSignal;
pub use wake::{EngineKind, ModelPaths, WakeWordEngine};
