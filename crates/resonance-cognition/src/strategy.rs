//! Strategy collaborators and the typed payloads passed between phases.
//!
//! The scheduler owns the loop; everything that needs judgement (what was
//! perceived, what it means, what to do about it) is delegated to these
//! four traits. Implementations live outside this crate.

use resonance_core::{RecordId, ScoredRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type StrategyResult<T> = Result<T, StrategyError>;

/// Errors a collaborator can report.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed: {0}")]
    Failed(String),
}

impl StrategyError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// What the Perceive phase observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionPayload {
    pub content: String,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// The observer saw the environment change since the last perception.
    #[serde(default)]
    pub environment_changed: bool,
}

impl PerceptionPayload {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self { content: content.into(), source: source.into(), ..Default::default() }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn changed(mut self) -> Self {
        self.environment_changed = true;
        self
    }
}

/// Input to the Analyze phase.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub tick: u64,
    pub perception: PerceptionPayload,
    /// Store id of the perception record, if it was appended.
    pub perception_id: Option<RecordId>,
    /// Records resonating with the perception and active goal, strongest first.
    pub resonant: Vec<ScoredRecord>,
    pub active_goal: Option<String>,
    pub consciousness: f64,
    pub resonance_threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub observations: Vec<String>,
    /// The single thing most worth acting on, if any.
    pub focus: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub goal: Option<String>,
    pub steps: Vec<String>,
    pub rationale: String,
}

impl PlanSpec {
    /// A plan that does nothing. Used when planning produced no result.
    pub fn idle() -> Self {
        Self { rationale: "no plan available".into(), ..Default::default() }
    }

    pub fn is_idle(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub summary: String,
}

impl ActionOutcome {
    pub fn succeeded(summary: impl Into<String>) -> Self {
        Self { success: true, summary: summary.into() }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self { success: false, summary: summary.into() }
    }
}

#[async_trait::async_trait]
pub trait Perceiver: Send + Sync {
    async fn perceive(&self) -> StrategyResult<PerceptionPayload>;
}

#[async_trait::async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, context: &AnalysisContext) -> StrategyResult<Insights>;
}

#[async_trait::async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, insights: &Insights) -> StrategyResult<PlanSpec>;
}

#[async_trait::async_trait]
pub trait Actor: Send + Sync {
    async fn act(&self, plan: &PlanSpec) -> StrategyResult<ActionOutcome>;
}

/// The four collaborators a scheduler calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub perceiver: Arc<dyn Perceiver>,
    pub analyst: Arc<dyn Analyst>,
    pub planner: Arc<dyn Planner>,
    pub actor: Arc<dyn Actor>,
}

impl Collaborators {
    pub fn new(
        perceiver: impl Perceiver + 'static,
        analyst: impl Analyst + 'static,
        planner: impl Planner + 'static,
        actor: impl Actor + 'static,
    ) -> Self {
        Self {
            perceiver: Arc::new(perceiver),
            analyst: Arc::new(analyst),
            planner: Arc::new(planner),
            actor: Arc::new(actor),
        }
    }

    pub fn with_actor(mut self, actor: impl Actor + 'static) -> Self {
        self.actor = Arc::new(actor);
        self
    }
}
