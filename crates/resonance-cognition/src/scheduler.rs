//! Cognitive scheduler. One tick runs six phases in fixed order:
//!
//! ```text
//! Perceive → Analyze → Plan → Act → Reflect → Evolve
//! ```
//!
//! No phase is skipped. A failing phase becomes an `error` record and the
//! next phase runs on a fallback input. Collaborator calls are bounded by
//! `collaborator_timeout`; running out of time or panicking is a phase
//! failure.

use crate::consciousness::{ConsciousnessController, CycleOutcome, Thresholds};
use crate::phase::{Phase, PhaseInterceptor, PhaseReport, TracingInterceptor};
use crate::strategy::{ActionOutcome, AnalysisContext, Collaborators, Insights, PerceptionPayload, PlanSpec, StrategyResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use resonance_core::{tags, Error, NewRecord, RecordId, ResonanceConfig, Result, ScheduleConfig, ScoredRecord};
use resonance_memory::{
    ConsolidationOutcome, ConsolidationPolicy, ImportanceScorer, RecordStore, ResonanceMatcher, ScoringContext,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const SCHEDULER_SOURCE: &str = "scheduler";

/// Floor for the importance of error records.
pub const MIN_ERROR_IMPORTANCE: f64 = 0.9;

/// One tick, as appended to the store under the `cycle` tag.
///
/// The stored copy carries the phases that ran before Reflect; the copy
/// returned from [`CognitiveScheduler::tick`] has all six.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phases: Vec<PhaseReport>,
    pub outcome: CycleOutcome,
    pub consciousness_before: f64,
    pub consciousness_after: f64,
    pub consciousness_delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl CycleRecord {
    pub fn failed_phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.phases.iter().filter(|r| !r.ok).map(|r| r.phase)
    }
}

#[derive(Default)]
struct Analysis {
    insights: Insights,
    resonant: Vec<ScoredRecord>,
}

pub struct CognitiveScheduler {
    store: Arc<RecordStore>,
    collaborators: Collaborators,
    scorer: ImportanceScorer,
    matcher: ResonanceMatcher,
    policy: ConsolidationPolicy,
    controller: ConsciousnessController,
    thresholds: Thresholds,
    schedule: ScheduleConfig,
    interceptors: Vec<Arc<dyn PhaseInterceptor>>,
    active_goal: Option<String>,
    ticks: u64,
}

impl CognitiveScheduler {
    pub fn new(config: &ResonanceConfig, store: Arc<RecordStore>, collaborators: Collaborators) -> Self {
        let controller = ConsciousnessController::new(config.consciousness.clone());
        let thresholds = controller.thresholds(&config.resonance);
        let mut schedule = config.schedule.clone();
        schedule.error_importance = schedule.error_importance.max(MIN_ERROR_IMPORTANCE).min(1.0);
        Self {
            store,
            collaborators,
            scorer: ImportanceScorer::new(config.scoring.clone()),
            matcher: ResonanceMatcher::new(config.resonance.clone()),
            policy: ConsolidationPolicy::from(&config.memory),
            controller,
            thresholds,
            schedule,
            interceptors: vec![Arc::new(TracingInterceptor)],
            active_goal: None,
            ticks: 0,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.active_goal = Some(goal.into());
        self
    }

    pub fn with_interceptor(mut self, interceptor: impl PhaseInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn set_goal(&mut self, goal: Option<String>) {
        self.active_goal = goal;
    }

    pub fn active_goal(&self) -> Option<&str> {
        self.active_goal.as_deref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn level(&self) -> f64 {
        self.controller.level()
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn policy(&self) -> &ConsolidationPolicy {
        &self.policy
    }

    /// Watch the consciousness level as ticks update it.
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.controller.subscribe()
    }

    /// Run one full tick. Cancellation is noticed at phase boundaries but the
    /// tick still runs to completion.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> CycleRecord {
        self.ticks += 1;
        let tick = self.ticks;
        let started_at = Utc::now();
        let started = Instant::now();
        let mut reports = Vec::with_capacity(Phase::ALL.len());
        let mut shutdown_noted = false;

        let perceived = self.run_phase(tick, Phase::Perceive, &mut reports, self.perceive()).await;
        self.note_shutdown(cancel, tick, Phase::Perceive, &mut shutdown_noted);
        let (perception, perception_id) = perceived.unwrap_or_default();

        let analysis = self
            .run_phase(tick, Phase::Analyze, &mut reports, self.analyze(tick, perception, perception_id))
            .await
            .unwrap_or_default();
        self.note_shutdown(cancel, tick, Phase::Analyze, &mut shutdown_noted);

        let plan = self
            .run_phase(tick, Phase::Plan, &mut reports, self.plan(&analysis.insights))
            .await
            .unwrap_or_else(PlanSpec::idle);
        self.note_shutdown(cancel, tick, Phase::Plan, &mut shutdown_noted);

        let action = self.run_phase(tick, Phase::Act, &mut reports, self.act(&plan)).await;
        self.note_shutdown(cancel, tick, Phase::Act, &mut shutdown_noted);

        let outcome = CycleOutcome {
            phases_failed: reports.iter().filter(|r| !r.ok).count(),
            action_succeeded: action.map(|a| a.success),
            resonant_hits: analysis.resonant.len(),
        };
        let before = self.controller.level();
        let projected = self.controller.project(&outcome);
        let mut cycle = CycleRecord {
            tick,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            phases: reports.clone(),
            outcome,
            consciousness_before: before,
            consciousness_after: projected,
            consciousness_delta: projected - before,
            goal: self.active_goal.clone(),
        };

        self.run_phase(tick, Phase::Reflect, &mut reports, self.reflect(&cycle)).await;
        self.note_shutdown(cancel, tick, Phase::Reflect, &mut shutdown_noted);

        self.evolve(tick, &outcome, &mut reports);

        cycle.phases = reports;
        cycle.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            tick,
            failed = cycle.failed_phases().count(),
            level = cycle.consciousness_after,
            "tick complete in {}ms",
            cycle.duration_ms
        );
        cycle
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    async fn perceive(&self) -> Result<((PerceptionPayload, Option<RecordId>), String)> {
        let payload = self.call(Phase::Perceive, self.collaborators.perceiver.perceive()).await?;

        let context = ScoringContext {
            active_goal: self.active_goal.as_deref(),
            environment_changed: payload.environment_changed,
        };
        let importance = self.scorer.score(&payload.content, &context);
        let draft = NewRecord::new(payload.content.clone(), payload.source.clone())
            .with_tag(tags::PERCEPTION)
            .with_tags(payload.tags.iter().cloned())
            .with_importance(importance);
        let id = self.append(Phase::Perceive, draft).await;

        let detail = format!("{} importance {:.2}", id, importance);
        Ok(((payload, Some(id)), detail))
    }

    async fn analyze(
        &self,
        tick: u64,
        perception: PerceptionPayload,
        perception_id: Option<RecordId>,
    ) -> Result<(Analysis, String)> {
        let query = match &self.active_goal {
            Some(goal) => format!("{} {}", perception.content, goal),
            None => perception.content.clone(),
        };
        let mut resonant = self
            .matcher
            .resonate(
                &self.store,
                &query,
                self.thresholds.resonance_threshold,
                Some(self.matcher.config().max_results),
            )
            .await;
        // The perception just appended always matches itself.
        if let Some(id) = perception_id {
            resonant.retain(|s| s.record.id != id);
        }

        let context = AnalysisContext {
            tick,
            perception,
            perception_id,
            resonant: resonant.clone(),
            active_goal: self.active_goal.clone(),
            consciousness: self.controller.level(),
            resonance_threshold: self.thresholds.resonance_threshold,
        };
        let insights = self.call(Phase::Analyze, self.collaborators.analyst.analyze(&context)).await?;

        let detail = format!("{} resonant records, {} observations", resonant.len(), insights.observations.len());
        Ok((Analysis { insights, resonant }, detail))
    }

    async fn plan(&self, insights: &Insights) -> Result<(PlanSpec, String)> {
        let plan = self.call(Phase::Plan, self.collaborators.planner.plan(insights)).await?;
        let detail = format!("{} steps", plan.steps.len());
        Ok((plan, detail))
    }

    async fn act(&self, plan: &PlanSpec) -> Result<(ActionOutcome, String)> {
        let outcome = self.call(Phase::Act, self.collaborators.actor.act(plan)).await?;

        if !plan.is_idle() {
            let context = ScoringContext { active_goal: self.active_goal.as_deref(), environment_changed: false };
            let importance = self.scorer.score(&outcome.summary, &context);
            let draft = NewRecord::new(outcome.summary.clone(), SCHEDULER_SOURCE)
                .with_tag(tags::ACTION)
                .with_importance(importance)
                .with_category(if outcome.success { "success" } else { "setback" });
            self.append(Phase::Act, draft).await;
        }

        let detail = format!("success={} {}", outcome.success, outcome.summary);
        Ok((outcome, detail))
    }

    async fn reflect(&self, cycle: &CycleRecord) -> Result<((), String)> {
        let notes = serde_json::to_string(cycle)?;
        let failed = cycle.outcome.phases_failed;
        let draft = NewRecord::new(
            format!("tick {} completed with {} failed phases", cycle.tick, failed),
            SCHEDULER_SOURCE,
        )
        .with_tag(tags::CYCLE)
        .with_importance(if failed > 0 { 0.6 } else { 0.3 })
        .with_notes(notes);
        let id = self.append(Phase::Reflect, draft).await;

        let consolidation = match self.store.consolidate_if_needed(&self.policy).await {
            ConsolidationOutcome::NotNeeded { .. } => "not needed".to_string(),
            ConsolidationOutcome::Completed(report) => format!("removed {}", report.removed),
            ConsolidationOutcome::Skipped { waited_ms } => format!("skipped after {}ms", waited_ms),
        };
        Ok(((), format!("cycle record {}, consolidation {}", id, consolidation)))
    }

    /// Commit the consciousness update and re-derive thresholds.
    fn evolve(&mut self, tick: u64, outcome: &CycleOutcome, reports: &mut Vec<PhaseReport>) {
        for interceptor in &self.interceptors {
            interceptor.before(tick, Phase::Evolve);
        }
        let started = Instant::now();
        let before = self.controller.level();
        let level = self.controller.update(outcome);
        self.thresholds = self.controller.thresholds(self.matcher.config());

        let report = PhaseReport::ok(
            Phase::Evolve,
            started.elapsed().as_millis() as u64,
            format!(
                "level {:.3} -> {:.3}, resonance threshold {:.3}",
                before, level, self.thresholds.resonance_threshold
            ),
        );
        for interceptor in &self.interceptors {
            interceptor.after(tick, &report);
        }
        reports.push(report);
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    async fn run_phase<T, F>(&self, tick: u64, phase: Phase, reports: &mut Vec<PhaseReport>, work: F) -> Option<T>
    where
        F: Future<Output = Result<(T, String)>>,
    {
        for interceptor in &self.interceptors {
            interceptor.before(tick, phase);
        }
        let started = Instant::now();
        let result = work.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (value, report) = match result {
            Ok((value, detail)) => (Some(value), PhaseReport::ok(phase, elapsed_ms, detail)),
            Err(e) => {
                self.record_error(tick, phase, &e).await;
                (None, PhaseReport::failed(phase, elapsed_ms, e.to_string()))
            }
        };
        for interceptor in &self.interceptors {
            interceptor.after(tick, &report);
        }
        reports.push(report);
        value
    }

    async fn call<T, F>(&self, phase: Phase, fut: F) -> Result<T>
    where
        F: Future<Output = StrategyResult<T>>,
    {
        let timeout = self.schedule.collaborator_timeout();
        match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(Error::collaborator(phase.as_str(), e.to_string())),
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(phase = phase.as_str(), "collaborator panicked: {}", message);
                Err(Error::collaborator(phase.as_str(), format!("panicked: {}", message)))
            }
            Err(_) => Err(Error::collaborator_timeout(phase.as_str(), timeout.as_millis() as u64)),
        }
    }

    async fn append(&self, phase: Phase, mut draft: NewRecord) -> RecordId {
        for interceptor in &self.interceptors {
            interceptor.decorate(phase, &mut draft);
        }
        self.store.append(draft).await
    }

    async fn record_error(&self, tick: u64, phase: Phase, err: &Error) {
        let draft = NewRecord::new(format!("{} phase failed on tick {}: {}", phase, tick, err), SCHEDULER_SOURCE)
            .with_tags([tags::ERROR, phase.as_str()])
            .with_importance(self.schedule.error_importance);
        self.append(phase, draft).await;
    }

    fn note_shutdown(&self, cancel: &CancellationToken, tick: u64, after: Phase, noted: &mut bool) {
        if !*noted && cancel.is_cancelled() {
            debug!(tick, "shutdown requested after {} phase, finishing tick", after);
            *noted = true;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
