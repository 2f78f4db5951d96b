//! Wake-word engines.
//! Pipeline position: cleaned frame → engine → optional keyword.
//! Two strategies share one `process` contract: a streaming recognizer whose
//! transcript is searched for wake phrases, and a neural scorer that rates
//! each keyword model per frame. Model runtimes sit behind small traits so the
//! engines can be driven by fakes in tests.

pub mod neural;
pub mod transcript;

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "vosk")]
pub mod vosk;

use std::fmt;
use std::path::PathBuf;

use tracing::info;

use crate::audio::Frame;
use crate::config::{DetectorConfig, WakeLanguage};
#[cfg(not(all(feature = "vosk", feature = "onnx")))]
use crate::Error;
use crate::Result;

pub use neural::NeuralEngine;
pub use transcript::TranscriptEngine;

/// Speech-to-text backend fed one frame at a time.
pub trait StreamingRecognizer {
    /// Feed samples. `Ok(true)` means an utterance was finalized and
    /// [`final_text`](Self::final_text) holds it.
    fn accept(&mut self, samples: &[i16]) -> Result<bool>;

    /// Text of the last finalized utterance.
    fn final_text(&mut self) -> String;

    /// Current hypothesis for the utterance in progress.
    fn partial_text(&mut self) -> String;

    fn reset(&mut self);
}

/// Per-keyword scoring backend.
pub trait KeywordScorer {
    /// Score one frame. Returns `(keyword, score)` pairs, scores in [0, 1].
    fn score(&mut self, samples: &[i16]) -> Result<Vec<(String, f32)>>;

    fn reset(&mut self);
}

/// Which strategy an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Transcript,
    Neural,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Transcript => write!(f, "transcript"),
            EngineKind::Neural => write!(f, "neural"),
        }
    }
}

/// Where model files live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    /// Vosk model directory.
    pub vosk_model: PathBuf,
    /// Feature models (`melspectrogram.onnx`, `embedding_model.onnx`) and stock classifiers.
    pub models_dir: PathBuf,
    /// User-trained keyword classifiers; preferred over the stock ones when non-empty.
    pub custom_models: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            vosk_model: PathBuf::from("model"),
            models_dir: PathBuf::from("models"),
            custom_models: PathBuf::from("custom_models"),
        }
    }
}

/// The active wake-word engine, fixed for the life of the loop.
pub enum WakeWordEngine {
    Transcript(TranscriptEngine),
    Neural(NeuralEngine),
}

impl WakeWordEngine {
    /// Build the engine selected by the configured wake language.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`](crate::Error::Engine) if the backend is not
    /// compiled in or its models cannot be loaded.
    pub fn from_config(config: &DetectorConfig, paths: &ModelPaths) -> Result<Self> {
        let engine = match config.language {
            WakeLanguage::French => Self::Transcript(transcript_engine(config, paths)?),
            WakeLanguage::English => Self::Neural(neural_engine(paths)?),
        };
        info!(kind = %engine.kind(), language = %config.language, "wake_engine_ready");
        Ok(engine)
    }

    /// Run one cleaned frame through the engine. Returns the matched keyword.
    pub fn process(&mut self, frame: &Frame) -> Option<String> {
        match self {
            Self::Transcript(engine) => engine.process(frame.samples()),
            Self::Neural(engine) => engine.process(frame.samples()),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Transcript(engine) => engine.reset(),
            Self::Neural(engine) => engine.reset(),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Transcript(_) => EngineKind::Transcript,
            Self::Neural(_) => EngineKind::Neural,
        }
    }
}

impl From<TranscriptEngine> for WakeWordEngine {
    fn from(engine: TranscriptEngine) -> Self {
        Self::Transcript(engine)
    }
}

impl From<NeuralEngine> for WakeWordEngine {
    fn from(engine: NeuralEngine) -> Self {
        Self::Neural(engine)
    }
}

#[cfg(feature = "vosk")]
fn transcript_engine(config: &DetectorConfig, paths: &ModelPaths) -> Result<TranscriptEngine> {
    let recognizer = vosk::VoskRecognizer::load(&paths.vosk_model)?;
    let phrases = config
        .wake_words
        .clone()
        .unwrap_or_else(transcript::default_phrases);
    Ok(TranscriptEngine::new(Box::new(recognizer), phrases))
}

#[cfg(not(feature = "vosk"))]
fn transcript_engine(_config: &DetectorConfig, _paths: &ModelPaths) -> Result<TranscriptEngine> {
    Err(Error::Engine(
        "transcript engine requires the `vosk` feature".into(),
    ))
}

#[cfg(feature = "onnx")]
fn neural_engine(paths: &ModelPaths) -> Result<NeuralEngine> {
    let scorer = onnx::OnnxScorer::load(&paths.models_dir, &paths.custom_models)?;
    Ok(NeuralEngine::new(Box::new(scorer)))
}

#[cfg(not(feature = "onnx"))]
fn neural_engine(_paths: &ModelPaths) -> Result<NeuralEngine> {
    Err(Error::Engine("neural engine requires the `onnx` feature".into()))
}
