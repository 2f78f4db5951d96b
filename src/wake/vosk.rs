//! Vosk streaming recognizer.

use std::path::Path;

use tracing::info;
use vosk::{DecodingState, Model, Recognizer};

use super::StreamingRecognizer;
use crate::audio::SAMPLE_RATE;
use crate::{Error, Result};

pub struct VoskRecognizer {
    // The recognizer keeps its own reference to the native model.
    _model: Model,
    recognizer: Recognizer,
}

impl VoskRecognizer {
    /// Load the model directory and build a 16 kHz recognizer with word output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the model is missing or fails to load.
    pub fn load(model_dir: &Path) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(Error::Engine(format!(
                "vosk model directory not found: {}",
                model_dir.display()
            )));
        }
        let path = model_dir
            .to_str()
            .ok_or_else(|| Error::Engine("vosk model path is not valid UTF-8".into()))?;
        let model = Model::new(path)
            .ok_or_else(|| Error::Engine(format!("failed to load vosk model from {path}")))?;
        let mut recognizer = Recognizer::new(&model, SAMPLE_RATE as f32)
            .ok_or_else(|| Error::Engine("failed to create vosk recognizer".into()))?;
        recognizer.set_words(true);
        info!(model = %path, "vosk_model_loaded");
        Ok(Self {
            _model: model,
            recognizer,
        })
    }
}

impl StreamingRecognizer for VoskRecognizer {
    fn accept(&mut self, samples: &[i16]) -> Result<bool> {
        match self.recognizer.accept_waveform(samples) {
            Ok(DecodingState::Finalized) => Ok(true),
            Ok(DecodingState::Running) => Ok(false),
            Ok(DecodingState::Failed) => Err(Error::Engine("vosk decoding failed".into())),
            Err(e) => Err(Error::Engine(format!("vosk rejected waveform: {e:?}"))),
        }
    }

    fn final_text(&mut self) -> String {
        self.recognizer
            .result()
            .single()
            .map(|r| r.text.to_string())
            .unwrap_or_default()
    }

    fn partial_text(&mut self) -> String {
        self.recognizer.partial_result().partial.to_string()
    }

    fn reset(&mut self) {
        self.recognizer.reset();
    }
}
