//! Neural-score wake engine: one score per keyword model per frame, first
//! keyword above threshold wins, then a frame-count cooldown.

use tracing::{debug, trace};

use super::KeywordScorer;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
/// Frames skipped after a match (~3.2 s at 80 ms per frame).
pub const DEFAULT_COOLDOWN_FRAMES: u32 = 40;

pub struct NeuralEngine {
    scorer: Box<dyn KeywordScorer>,
    threshold: f32,
    cooldown_frames: u32,
    remaining: u32,
}

impl NeuralEngine {
    pub fn new(scorer: Box<dyn KeywordScorer>) -> Self {
        Self {
            scorer,
            threshold: DEFAULT_THRESHOLD,
            cooldown_frames: DEFAULT_COOLDOWN_FRAMES,
            remaining: 0,
        }
    }

    pub fn with_cooldown_frames(mut self, frames: u32) -> Self {
        self.cooldown_frames = frames;
        self
    }

    pub fn process(&mut self, samples: &[i16]) -> Option<String> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return None;
        }

        let scores = match self.scorer.score(samples) {
            Ok(scores) => scores,
            Err(e) => {
                debug!(error = %e, "scorer_error");
                return None;
            }
        };

        let (keyword, score) = scores.into_iter().find(|(_, score)| *score > self.threshold)?;
        trace!(keyword = %keyword, score, "keyword_scored");
        self.scorer.reset();
        self.remaining = self.cooldown_frames;
        Some(keyword)
    }

    /// Clear the scorer's rolling context. A running cooldown is kept.
    pub fn reset(&mut self) {
        self.scorer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Returns the same scores every frame and counts calls.
    struct Fixed {
        scores: Vec<(String, f32)>,
        calls: Rc<Cell<usize>>,
        fail: bool,
    }

    impl KeywordScorer for Fixed {
        fn score(&mut self, _samples: &[i16]) -> Result<Vec<(String, f32)>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(Error::Engine("session".into()));
            }
            Ok(self.scores.clone())
        }
        fn reset(&mut self) {}
    }

    fn engine(scores: &[(&str, f32)], fail: bool) -> (NeuralEngine, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let scorer = Fixed {
            scores: scores.iter().map(|(k, s)| (k.to_string(), *s)).collect(),
            calls: Rc::clone(&calls),
            fail,
        };
        (NeuralEngine::new(Box::new(scorer)), calls)
    }

    #[test]
    fn threshold_is_strict() {
        let (mut engine, _) = engine(&[("hey_jarvis", 0.5)], false);
        assert_eq!(engine.process(&[]), None);
    }

    #[test]
    fn first_keyword_above_threshold_wins() {
        let (mut engine, _) = engine(&[("alexa", 0.2), ("hey_jarvis", 0.9), ("hey_mycroft", 0.95)], false);
        assert_eq!(engine.process(&[]).as_deref(), Some("hey_jarvis"));
    }

    #[test]
    fn cooldown_skips_scoring_for_configured_frames() {
        let (engine, calls) = engine(&[("hey_jarvis", 0.9)], false);
        let mut engine = engine.with_cooldown_frames(3);

        assert!(engine.process(&[]).is_some());
        for _ in 0..3 {
            assert_eq!(engine.process(&[]), None);
        }
        assert_eq!(calls.get(), 1);
        assert!(engine.process(&[]).is_some());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn scorer_error_is_no_match() {
        let (mut engine, _) = engine(&[("hey_jarvis", 0.9)], true);
        assert_eq!(engine.process(&[]), None);
    }

    #[test]
    fn reset_keeps_cooldown() {
        let (engine, calls) = engine(&[("hey_jarvis", 0.9)], false);
        let mut engine = engine.with_cooldown_frames(2);
        assert!(engine.process(&[]).is_some());
        engine.reset();
        assert_eq!(engine.process(&[]), None);
        assert_eq!(engine.process(&[]), None);
        assert_eq!(calls.get(), 1);
        assert!(engine.process(&[]).is_some());
    }
}
