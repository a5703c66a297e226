//! Importance scoring for newly perceived content.
//!
//! Deterministic: the same content and context always yield the same score.
//! Adjustments are additive on top of a base constant and the result is
//! clamped into `[0, 1]` last.

use crate::tokens::{coverage, tokenize};
use resonance_core::{clamp_unit, ScoringConfig};
use std::collections::BTreeSet;

/// What the caller knows at scoring time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringContext<'a> {
    /// The goal the scheduler is currently pursuing, if any.
    pub active_goal: Option<&'a str>,
    /// Set by perceivers that observed a change in their environment.
    pub environment_changed: bool,
}

impl<'a> ScoringContext<'a> {
    pub fn with_goal(goal: &'a str) -> Self {
        Self { active_goal: Some(goal), environment_changed: false }
    }
}

#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    config: ScoringConfig,
    failure: BTreeSet<String>,
    novelty: BTreeSet<String>,
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ImportanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        let failure = config.failure_indicators.iter().map(|w| w.to_lowercase()).collect();
        let novelty = config.novelty_indicators.iter().map(|w| w.to_lowercase()).collect();
        Self { config, failure, novelty }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, content: &str, context: &ScoringContext<'_>) -> f64 {
        let tokens = tokenize(content);
        let mut score = self.config.base;

        if tokens.iter().any(|t| self.failure.contains(t)) {
            score += self.config.failure_bonus;
        }

        if context.environment_changed || tokens.iter().any(|t| self.novelty.contains(t)) {
            score += self.config.novelty_bonus;
        }

        if let Some(goal) = context.active_goal {
            let alignment = coverage(&tokenize(goal), &tokens);
            score += self.config.goal_bonus * alignment;
        }

        clamp_unit(score)
    }

    /// True when the content carries a failure indicator.
    pub fn indicates_failure(&self, content: &str) -> bool {
        tokenize(content).iter().any(|t| self.failure.contains(t))
    }
}
