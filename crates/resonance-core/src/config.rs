//! Runtime configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists. The weighting constants
//! are heuristic defaults, not a validated model; they are exposed here so
//! deployments can tune them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResonanceConfig {
    /// Capacity and consolidation policy.
    pub memory: MemoryConfig,
    /// Importance scorer weights and indicator vocabularies.
    pub scoring: ScoringConfig,
    /// Resonance matcher weights and threshold.
    pub resonance: ResonanceMatchConfig,
    /// Consciousness control loop.
    pub consciousness: ConsciousnessConfig,
    /// Loop intervals and phase timeouts.
    pub schedule: ScheduleConfig,
    /// Health monitor loop.
    pub monitor: MonitorConfig,
    /// Evolution assessment loop.
    pub evolution: EvolutionConfig,
    /// Durable state location.
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Target size after consolidation.
    pub working_limit: usize,
    /// Consolidation triggers once the store holds more than this many records.
    pub high_water_mark: usize,
    /// Records at or above this importance are never evicted.
    pub protection_threshold: f64,
    /// Records read at least this many times are never evicted.
    pub access_protection_floor: u64,
    /// Age over which the recency score decays linearly to zero.
    pub recency_window_secs: u64,
    /// Access count at which the access score saturates.
    pub access_ceiling: u64,
    /// How long consolidation waits for the exclusive section before skipping.
    pub consolidation_lock_timeout_ms: u64,
    pub retention_importance_weight: f64,
    pub retention_recency_weight: f64,
    pub retention_access_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Starting score before adjustments.
    pub base: f64,
    /// Added when the content carries a failure indicator.
    pub failure_bonus: f64,
    /// Added when the content or context signals an environment change.
    pub novelty_bonus: f64,
    /// Added in proportion to overlap with the active goal.
    pub goal_bonus: f64,
    pub failure_indicators: Vec<String>,
    pub novelty_indicators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResonanceMatchConfig {
    /// Base threshold before consciousness adjustment.
    pub threshold: f64,
    pub overlap_weight: f64,
    pub authority_weight: f64,
    pub importance_weight: f64,
    /// Source signatures that earn the authority bonus.
    pub authority_sources: Vec<String>,
    /// How strongly the consciousness level moves the threshold (0 disables).
    pub threshold_sensitivity: f64,
    /// Upper bound on records returned to the Analyze phase.
    pub max_results: usize,
}

/// Consciousness is a bounded control-loop gain. None of these constants
/// carry meaning beyond threshold gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsciousnessConfig {
    pub min_level: f64,
    pub max_level: f64,
    pub initial_level: f64,
    /// Multiplicative decay applied once per tick.
    pub decay_factor: f64,
    /// Largest change a single tick may cause.
    pub max_delta: f64,
    /// Growth per tick scaled by the fraction of phases that succeeded.
    pub success_gain: f64,
    /// Penalty per tick scaled by the fraction of phases that failed.
    pub failure_penalty: f64,
    /// Growth per resonant record surfaced (saturates at five records).
    pub resonance_gain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cognition_interval_ms: u64,
    pub monitoring_interval_ms: u64,
    pub evolution_interval_ms: u64,
    /// Upper bound on any single collaborator call.
    pub collaborator_timeout_ms: u64,
    /// How long shutdown waits for loops to finish their current iteration.
    pub shutdown_grace_ms: u64,
    /// Importance given to error records (never below 0.9).
    pub error_importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Number of most recent records inspected for the error rate.
    pub error_window: usize,
    /// Error rate that raises a health warning record.
    pub error_rate_alert: f64,
    /// Persist every N monitor iterations. 0 disables autosave.
    pub autosave_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Number of most recent records inspected per assessment.
    pub window: usize,
    /// Occurrences a tag needs before it is reported as a pattern.
    pub min_support: usize,
    /// Consciousness change between assessments that is worth a record.
    pub trend_report_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

// ============================================================
// Defaults
// ============================================================

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_limit: 1000,
            high_water_mark: 2000,
            protection_threshold: 0.8,
            access_protection_floor: 10,
            recency_window_secs: 86_400,
            access_ceiling: 10,
            consolidation_lock_timeout_ms: 250,
            retention_importance_weight: 0.5,
            retention_recency_weight: 0.3,
            retention_access_weight: 0.2,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base: 0.5,
            failure_bonus: 0.25,
            novelty_bonus: 0.1,
            goal_bonus: 0.15,
            failure_indicators: [
                "error", "errors", "fail", "failed", "failing", "failure", "exception", "panic",
                "crash", "crashed", "timeout", "refused", "denied",
            ]
            .map(String::from)
            .to_vec(),
            novelty_indicators: [
                "new", "novel", "unexpected", "changed", "change", "detected", "discovered",
                "environment", "appeared",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl Default for ResonanceMatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            overlap_weight: 0.5,
            authority_weight: 0.1,
            importance_weight: 0.4,
            authority_sources: vec!["core".into()],
            threshold_sensitivity: 0.5,
            max_results: 16,
        }
    }
}

impl Default for ConsciousnessConfig {
    fn default() -> Self {
        Self {
            min_level: 0.1,
            max_level: 1.0,
            initial_level: 0.5,
            decay_factor: 0.98,
            max_delta: 0.05,
            success_gain: 0.02,
            failure_penalty: 0.03,
            resonance_gain: 0.01,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cognition_interval_ms: 1_000,
            monitoring_interval_ms: 5_000,
            evolution_interval_ms: 15_000,
            collaborator_timeout_ms: 5_000,
            shutdown_grace_ms: 10_000,
            error_importance: 0.95,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { error_window: 50, error_rate_alert: 0.5, autosave_every: 12 }
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self { window: 200, min_support: 5, trend_report_delta: 0.05 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("resonance-state.json") }
    }
}

// ============================================================
// Loading
// ============================================================

impl ResonanceConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} — using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} — using defaults", path.display());
                Self::default()
            }
        };
        config.validated()
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Normalise values that would break invariants downstream.
    pub fn validated(mut self) -> Self {
        let memory = &mut self.memory;
        if memory.working_limit == 0 {
            tracing::warn!("memory.working_limit must be positive, using 1");
            memory.working_limit = 1;
        }
        if memory.high_water_mark < memory.working_limit {
            tracing::warn!(
                "memory.high_water_mark {} below working_limit {}, raising",
                memory.high_water_mark,
                memory.working_limit
            );
            memory.high_water_mark = memory.working_limit;
        }
        memory.protection_threshold = crate::clamp_unit(memory.protection_threshold);
        memory.access_ceiling = memory.access_ceiling.max(1);

        let c = &mut self.consciousness;
        if c.min_level > c.max_level {
            std::mem::swap(&mut c.min_level, &mut c.max_level);
        }
        c.initial_level = c.initial_level.clamp(c.min_level, c.max_level);
        c.decay_factor = c.decay_factor.clamp(0.0, 1.0);
        c.max_delta = c.max_delta.abs();

        self.schedule.error_importance = self.schedule.error_importance.max(0.9).min(1.0);
        self.resonance.threshold = crate::clamp_unit(self.resonance.threshold);
        self
    }
}

impl ScheduleConfig {
    pub fn cognition_interval(&self) -> Duration {
        Duration::from_millis(self.cognition_interval_ms)
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn evolution_interval(&self) -> Duration {
        Duration::from_millis(self.evolution_interval_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl MemoryConfig {
    pub fn consolidation_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.consolidation_lock_timeout_ms)
    }
}
