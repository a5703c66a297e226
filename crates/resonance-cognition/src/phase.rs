//! Tick phases and the interceptors wrapped around each of them.

use resonance_core::NewRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Perceive,
    Analyze,
    Plan,
    Act,
    Reflect,
    Evolve,
}

impl Phase {
    /// Execution order within a tick.
    pub const ALL: [Phase; 6] = [
        Phase::Perceive,
        Phase::Analyze,
        Phase::Plan,
        Phase::Act,
        Phase::Reflect,
        Phase::Evolve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Perceive => "perceive",
            Phase::Analyze => "analyze",
            Phase::Plan => "plan",
            Phase::Act => "act",
            Phase::Reflect => "reflect",
            Phase::Evolve => "evolve",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub ok: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseReport {
    pub fn ok(phase: Phase, elapsed_ms: u64, detail: impl Into<String>) -> Self {
        Self { phase, ok: true, elapsed_ms, detail: detail.into(), error: None }
    }

    pub fn failed(phase: Phase, elapsed_ms: u64, error: impl Into<String>) -> Self {
        Self { phase, ok: false, elapsed_ms, detail: String::new(), error: Some(error.into()) }
    }
}

/// Hooks the scheduler applies around every phase of every tick.
pub trait PhaseInterceptor: Send + Sync {
    fn before(&self, _tick: u64, _phase: Phase) {}

    fn after(&self, _tick: u64, _report: &PhaseReport) {}

    /// Adjust a record the phase is about to append.
    fn decorate(&self, _phase: Phase, _draft: &mut NewRecord) {}
}

/// Logs phase entry and exit.
pub struct TracingInterceptor;

impl PhaseInterceptor for TracingInterceptor {
    fn before(&self, tick: u64, phase: Phase) {
        debug!(tick, %phase, "phase started");
    }

    fn after(&self, tick: u64, report: &PhaseReport) {
        if report.ok {
            debug!(tick, phase = %report.phase, elapsed_ms = report.elapsed_ms, "{}", report.detail);
        } else {
            warn!(
                tick,
                phase = %report.phase,
                elapsed_ms = report.elapsed_ms,
                "phase failed: {}",
                report.error.as_deref().unwrap_or("unknown")
            );
        }
    }
}

/// Tags every appended record with the phase that produced it
/// (`phase:perceive`, `phase:act`, ...).
pub struct PhaseTagger;

impl PhaseTagger {
    pub const PREFIX: &'static str = "phase:";
}

impl PhaseInterceptor for PhaseTagger {
    fn decorate(&self, phase: Phase, draft: &mut NewRecord) {
        draft.tags.insert(format!("{}{}", Self::PREFIX, phase));
    }
}
