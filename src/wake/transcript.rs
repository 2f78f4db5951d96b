//! Streaming-transcript wake engine: feed the recognizer, search its running
//! transcript for any configured phrase.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::StreamingRecognizer;

/// Minimum time between two matches reported by this engine.
pub const TRANSCRIPT_COOLDOWN: Duration = Duration::from_secs(1);

/// Phrases used when the configuration does not list any.
pub fn default_phrases() -> Vec<String> {
    ["igor", "assistant", "ordinateur", "écoute"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub struct TranscriptEngine {
    recognizer: Box<dyn StreamingRecognizer>,
    phrases: Vec<String>,
    cooldown: Duration,
    last_match: Option<Instant>,
}

impl TranscriptEngine {
    /// Phrases are normalized to lower case; blank ones are dropped.
    pub fn new(recognizer: Box<dyn StreamingRecognizer>, phrases: Vec<String>) -> Self {
        let phrases = phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            recognizer,
            phrases,
            cooldown: TRANSCRIPT_COOLDOWN,
            last_match: None,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn process(&mut self, samples: &[i16]) -> Option<String> {
        if self
            .last_match
            .is_some_and(|at| at.elapsed() < self.cooldown)
        {
            return None;
        }

        let finalized = match self.recognizer.accept(samples) {
            Ok(finalized) => finalized,
            Err(e) => {
                debug!(error = %e, "recognizer_error");
                return None;
            }
        };
        let text = if finalized {
            self.recognizer.final_text()
        } else {
            self.recognizer.partial_text()
        };
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }
        trace!(text = %text, finalized, "transcript");

        let phrase = self.phrases.iter().find(|p| text.contains(p.as_str()))?.clone();
        self.recognizer.reset();
        self.last_match = Some(Instant::now());
        Some(phrase)
    }

    pub fn reset(&mut self) {
        self.recognizer.reset();
    }
}
