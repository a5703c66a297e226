//! Consciousness controller
//!
//! A clamped scalar updated once per tick:
//!
//! ```text
//! raw   = level * decay_factor + growth(outcome)
//! level = clamp(raw, level - max_delta, level + max_delta) ∩ [min_level, max_level]
//! ```
//!
//! The constants are heuristic and live in `[consciousness]`. The current
//! level is published on a watch channel so the other loops can read it
//! without touching the controller.

use resonance_core::{clamp_unit, ConsciousnessConfig, ResonanceMatchConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// What a tick contributed to the level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub phases_failed: usize,
    /// `None` when Act produced no outcome.
    pub action_succeeded: Option<bool>,
    pub resonant_hits: usize,
}

/// Values derived deterministically from the level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub level: f64,
    pub resonance_threshold: f64,
}

impl Thresholds {
    /// The resonance threshold falls as the level rises: at the midpoint of
    /// the range it equals the configured base, and `threshold_sensitivity`
    /// sets how far it moves toward the ends.
    pub fn derive(level: f64, consciousness: &ConsciousnessConfig, resonance: &ResonanceMatchConfig) -> Self {
        let range = consciousness.max_level - consciousness.min_level;
        let normalized = if range > 0.0 {
            ((level - consciousness.min_level) / range).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let factor = (1.0 + resonance.threshold_sensitivity * (1.0 - 2.0 * normalized)).max(0.0);
        Self { level, resonance_threshold: clamp_unit(resonance.threshold * factor) }
    }
}

pub struct ConsciousnessController {
    config: ConsciousnessConfig,
    level: f64,
    publisher: watch::Sender<f64>,
}

impl ConsciousnessController {
    pub fn new(config: ConsciousnessConfig) -> Self {
        let level = config.initial_level.max(config.min_level).min(config.max_level);
        let (publisher, _) = watch::channel(level);
        Self { config, level, publisher }
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn config(&self) -> &ConsciousnessConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.publisher.subscribe()
    }

    pub fn growth(&self, outcome: &CycleOutcome) -> f64 {
        let c = &self.config;
        let mut growth = -(outcome.phases_failed as f64) * c.failure_penalty;
        match outcome.action_succeeded {
            Some(true) => growth += c.success_gain,
            Some(false) => growth -= c.failure_penalty,
            None => {}
        }
        if outcome.resonant_hits > 0 {
            growth += c.resonance_gain;
        }
        growth
    }

    /// The level `update` would produce, without committing it.
    pub fn project(&self, outcome: &CycleOutcome) -> f64 {
        let c = &self.config;
        let raw = self.level * c.decay_factor + self.growth(outcome);
        let raw = if raw.is_finite() { raw } else { self.level };
        let step = c.max_delta.abs();
        raw.max(self.level - step)
            .min(self.level + step)
            .max(c.min_level)
            .min(c.max_level)
    }

    pub fn update(&mut self, outcome: &CycleOutcome) -> f64 {
        self.level = self.project(outcome);
        self.publisher.send_replace(self.level);
        self.level
    }

    pub fn thresholds(&self, resonance: &ResonanceMatchConfig) -> Thresholds {
        Thresholds::derive(self.level, &self.config, resonance)
    }
}
