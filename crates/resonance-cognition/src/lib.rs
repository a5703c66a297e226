//! Resonance cognition — the six-phase scheduler, consciousness controller,
//! and the runtime that drives them alongside health and evolution loops.

pub mod consciousness;
pub mod evolution;
pub mod monitor;
pub mod phase;
pub mod runtime;
pub mod scheduler;
pub mod strategy;

pub use consciousness::{ConsciousnessController, CycleOutcome, Thresholds};
pub use evolution::{EvolutionAssessor, EvolutionReport, Pattern, EVOLUTION_SOURCE};
pub use monitor::{HealthMonitor, HealthReport, MONITOR_SOURCE};
pub use phase::{Phase, PhaseInterceptor, PhaseReport, PhaseTagger, TracingInterceptor};
pub use runtime::CognitiveRuntime;
pub use scheduler::{CognitiveScheduler, CycleRecord, MIN_ERROR_IMPORTANCE, SCHEDULER_SOURCE};
pub use strategy::{
    ActionOutcome, Actor, AnalysisContext, Analyst, Collaborators, Insights, PerceptionPayload, Perceiver, PlanSpec,
    Planner, StrategyError, StrategyResult,
};
