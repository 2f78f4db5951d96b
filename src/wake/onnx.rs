//! openWakeWord keyword scoring on ONNX Runtime.
//!
//! Three stages, each its own session: raw audio → mel spectrogram frames →
//! 96-d speech embeddings → one classifier per keyword. The mel and
//! embedding histories are rolling buffers so every 80 ms frame yields a
//! fresh score for each keyword once enough context has accumulated.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ndarray::{Array2, Array3, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tracing::{info, warn};

use super::KeywordScorer;
use crate::audio::FRAME_SAMPLES;
use crate::{Error, Result};

const MEL_BINS: usize = 32;
/// Mel frames per embedding window.
const EMBEDDING_WINDOW: usize = 76;
const EMBEDDING_STEP: usize = 8;
const EMBEDDING_DIM: usize = 96;
/// Embeddings per classifier input.
const CLASSIFICATION_FRAMES: usize = 16;
const MAX_EMBEDDINGS: usize = 120;

const MELSPEC_MODEL: &str = "melspectrogram.onnx";
const EMBEDDING_MODEL: &str = "embedding_model.onnx";

fn session(path: &Path) -> anyhow::Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(1)?
        .with_inter_threads(1)?
        .commit_from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?)
}

/// Raw audio to normalized mel frames.
struct MelFrontend {
    model: Session,
    frames: VecDeque<[f32; MEL_BINS]>,
}

impl MelFrontend {
    fn process(&mut self, audio: &[i16]) -> anyhow::Result<()> {
        let samples: Vec<f32> = audio.iter().map(|&s| f32::from(s)).collect();
        let input = Array2::from_shape_vec((1, samples.len()), samples)?;
        let outputs = self.model.run(ort::inputs![Tensor::from_array(input)?])?;
        let output: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .context("failed to extract melspectrogram output")?;

        if output.ndim() != 3 {
            return Ok(());
        }
        for frame_idx in 0..output.shape()[1] {
            let mut mel = [0.0f32; MEL_BINS];
            for (bin, value) in mel.iter_mut().enumerate() {
                *value = output[[0, frame_idx, bin]] / 10.0 + 2.0;
            }
            if self.frames.len() >= EMBEDDING_WINDOW * 2 {
                self.frames.pop_front();
            }
            self.frames.push_back(mel);
        }
        Ok(())
    }

    fn latest(&self, n: usize) -> Option<Array2<f32>> {
        if self.frames.len() < n {
            return None;
        }
        let data: Vec<f32> = self
            .frames
            .iter()
            .skip(self.frames.len() - n)
            .flat_map(|f| f.iter().copied())
            .collect();
        Array2::from_shape_vec((n, MEL_BINS), data).ok()
    }
}

/// Mel windows to speech embeddings.
struct EmbeddingStage {
    model: Session,
    embeddings: VecDeque<[f32; EMBEDDING_DIM]>,
}

impl EmbeddingStage {
    fn extract(&mut self, mel: &Array2<f32>) -> anyhow::Result<()> {
        let n_frames = mel.shape()[0];
        let starts: Vec<usize> = (0..)
            .step_by(EMBEDDING_STEP)
            .take_while(|start| start + EMBEDDING_WINDOW <= n_frames)
            .collect();
        if starts.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(starts.len() * EMBEDDING_WINDOW * MEL_BINS);
        for &start in &starts {
            for frame_idx in start..start + EMBEDDING_WINDOW {
                batch.extend(mel.row(frame_idx).iter().copied());
            }
        }
        let input = Array4::from_shape_vec((starts.len(), EMBEDDING_WINDOW, MEL_BINS, 1), batch)?;
        let outputs = self.model.run(ort::inputs![Tensor::from_array(input)?])?;
        let output: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .context("failed to extract embedding output")?;

        for batch_idx in 0..output.shape()[0] {
            let mut embedding = [0.0f32; EMBEDDING_DIM];
            for (dim, value) in embedding.iter_mut().enumerate() {
                *value = output[[batch_idx, dim]];
            }
            if self.embeddings.len() >= MAX_EMBEDDINGS {
                self.embeddings.pop_front();
            }
            self.embeddings.push_back(embedding);
        }
        Ok(())
    }

    fn latest(&self) -> Option<Array3<f32>> {
        if self.embeddings.len() < CLASSIFICATION_FRAMES {
            return None;
        }
        let data: Vec<f32> = self
            .embeddings
            .iter()
            .skip(self.embeddings.len() - CLASSIFICATION_FRAMES)
            .flat_map(|e| e.iter().copied())
            .collect();
        Array3::from_shape_vec((1, CLASSIFICATION_FRAMES, EMBEDDING_DIM), data).ok()
    }
}

/// Keyword scorer over the openWakeWord model family.
pub struct OnnxScorer {
    mel: MelFrontend,
    embedding: EmbeddingStage,
    classifiers: Vec<(String, Session)>,
}

impl OnnxScorer {
    /// Load the shared feature models from `models_dir` and one classifier per
    /// `*.onnx` file in `custom_dir`, falling back to the stock classifiers in
    /// `models_dir` when no custom model is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if a model fails to load or no classifier is found.
    pub fn load(models_dir: &Path, custom_dir: &Path) -> Result<Self> {
        Self::try_load(models_dir, custom_dir).map_err(|e| Error::Engine(format!("{e:#}")))
    }

    fn try_load(models_dir: &Path, custom_dir: &Path) -> anyhow::Result<Self> {
        let mel = MelFrontend {
            model: session(&models_dir.join(MELSPEC_MODEL))?,
            frames: VecDeque::with_capacity(EMBEDDING_WINDOW * 2),
        };
        let embedding = EmbeddingStage {
            model: session(&models_dir.join(EMBEDDING_MODEL))?,
            embeddings: VecDeque::with_capacity(MAX_EMBEDDINGS),
        };

        let mut paths = classifier_paths(custom_dir);
        if paths.is_empty() {
            warn!(dir = %custom_dir.display(), "no custom keyword models, using stock classifiers");
            paths = classifier_paths(models_dir);
        }
        anyhow::ensure!(!paths.is_empty(), "no keyword classifier models found");

        let mut classifiers = Vec::with_capacity(paths.len());
        for path in paths {
            let keyword = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            classifiers.push((keyword, session(&path)?));
        }
        info!(
            keywords = ?classifiers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            "keyword_models_loaded"
        );

        Ok(Self {
            mel,
            embedding,
            classifiers,
        })
    }

    fn try_score(&mut self, samples: &[i16]) -> anyhow::Result<Vec<(String, f32)>> {
        if samples.len() != FRAME_SAMPLES {
            return Ok(Vec::new());
        }
        self.mel.process(samples)?;
        if let Some(mel) = self.mel.latest(EMBEDDING_WINDOW) {
            self.embedding.extract(&mel)?;
        }
        let Some(input) = self.embedding.latest() else {
            return Ok(Vec::new());
        };

        let mut scores = Vec::with_capacity(self.classifiers.len());
        for (keyword, classifier) in &mut self.classifiers {
            let outputs = classifier.run(ort::inputs![Tensor::from_array(input.clone())?])?;
            let output: ndarray::ArrayViewD<f32> = outputs[0]
                .try_extract_array()
                .context("failed to extract classifier output")?;
            let score = output.iter().next().copied().unwrap_or(0.0);
            scores.push((keyword.clone(), score));
        }
        Ok(scores)
    }
}

impl KeywordScorer for OnnxScorer {
    fn score(&mut self, samples: &[i16]) -> Result<Vec<(String, f32)>> {
        self.try_score(samples).map_err(|e| Error::Engine(format!("{e:#}")))
    }

    fn reset(&mut self) {
        self.mel.frames.clear();
        self.embedding.embeddings.clear();
    }
}

/// Keyword classifier files in `dir`, excluding the shared feature models.
fn classifier_paths(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "onnx"))
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| n != MELSPEC_MODEL && n != EMBEDDING_MODEL && n != "silero_vad.onnx")
        })
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_listing_skips_feature_models() {
        let dir = tempfile::tempdir().unwrap();
        for name in [MELSPEC_MODEL, EMBEDDING_MODEL, "hey_jarvis.onnx", "igor.onnx", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = classifier_paths(dir.path())
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, ["hey_jarvis.onnx", "igor.onnx"]);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        assert!(classifier_paths(Path::new("/nonexistent/models")).is_empty());
    }
}
