//! Deterministic reflex collaborators standing in for a language model.
//!
//! Perceive reports what changed in the store, Analyze picks the strongest
//! resonant records, Plan reviews the focus, Act logs the plan.

use async_trait::async_trait;
use resonance_cognition::{
    ActionOutcome, Actor, AnalysisContext, Analyst, Collaborators, Insights, PerceptionPayload, Perceiver, PlanSpec,
    Planner, StrategyResult,
};
use resonance_core::MemoryConfig;
use resonance_memory::RecordStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

pub const REFLEX_SOURCE: &str = "reflex";

pub fn collaborators(store: Arc<RecordStore>, memory: &MemoryConfig) -> Collaborators {
    Collaborators::new(
        StorePerceiver::new(store, memory.protection_threshold),
        ResonanceAnalyst { max_observations: 3 },
        ReviewPlanner,
        LogActor,
    )
}

pub struct StorePerceiver {
    store: Arc<RecordStore>,
    protection_threshold: f64,
    last_errors: AtomicUsize,
}

impl StorePerceiver {
    pub fn new(store: Arc<RecordStore>, protection_threshold: f64) -> Self {
        Self { store, protection_threshold, last_errors: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Perceiver for StorePerceiver {
    async fn perceive(&self) -> StrategyResult<PerceptionPayload> {
        let stats = self.store.stats(self.protection_threshold, 3).await;
        let previous = self.last_errors.swap(stats.errors, Ordering::Relaxed);

        let mut content = format!(
            "store holds {} records, mean importance {:.2}, {} protected",
            stats.count, stats.mean_importance, stats.protected
        );
        if stats.errors > 0 {
            content.push_str(&format!(", {} errors", stats.errors));
        }
        if let Some((tag, n)) = stats.top_tags.first() {
            content.push_str(&format!(", busiest tag {} ({})", tag, n));
        }

        let payload = PerceptionPayload::new(content, REFLEX_SOURCE).with_tag("observation");
        Ok(if stats.errors > previous { payload.changed() } else { payload })
    }
}

pub struct ResonanceAnalyst {
    pub max_observations: usize,
}

#[async_trait]
impl Analyst for ResonanceAnalyst {
    async fn analyze(&self, context: &AnalysisContext) -> StrategyResult<Insights> {
        let observations: Vec<String> = context
            .resonant
            .iter()
            .take(self.max_observations)
            .map(|s| format!("{} ({:.2})", s.record.event, s.resonance))
            .collect();
        let strongest = context.resonant.first();
        let focus = strongest
            .map(|s| s.record.event.clone())
            .or_else(|| context.active_goal.clone());
        Ok(Insights {
            observations,
            focus,
            confidence: strongest.map(|s| s.resonance).unwrap_or(0.0),
        })
    }
}

pub struct ReviewPlanner;

#[async_trait]
impl Planner for ReviewPlanner {
    async fn plan(&self, insights: &Insights) -> StrategyResult<PlanSpec> {
        let Some(focus) = &insights.focus else {
            return Ok(PlanSpec::idle());
        };
        let mut steps = vec![format!("review: {}", focus)];
        steps.extend(insights.observations.iter().skip(1).map(|o| format!("compare: {}", o)));
        Ok(PlanSpec {
            goal: Some(focus.clone()),
            steps,
            rationale: format!("strongest signal at confidence {:.2}", insights.confidence),
        })
    }
}

pub struct LogActor;

#[async_trait]
impl Actor for LogActor {
    async fn act(&self, plan: &PlanSpec) -> StrategyResult<ActionOutcome> {
        for step in &plan.steps {
            info!("reflex: {}", step);
        }
        Ok(ActionOutcome::succeeded(format!("reviewed {} items", plan.steps.len())))
    }
}
