//! Tests for resonance-cognition: scheduler ticks, consciousness control,
//! health monitor, evolution assessor, runtime lifecycle

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use resonance_cognition::*;
use resonance_core::{tags, ConsciousnessConfig, NewRecord, ResonanceConfig, ResonanceMatchConfig};
use resonance_memory::{ConsolidationPolicy, RecordStore, ScanQuery};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// Test collaborators
// ===========================================================================

struct FixedPerceiver(&'static str);

#[async_trait]
impl Perceiver for FixedPerceiver {
    async fn perceive(&self) -> StrategyResult<PerceptionPayload> {
        Ok(PerceptionPayload::new(self.0, "sensor"))
    }
}

struct SlowPerceiver(Duration);

#[async_trait]
impl Perceiver for SlowPerceiver {
    async fn perceive(&self) -> StrategyResult<PerceptionPayload> {
        tokio::time::sleep(self.0).await;
        Ok(PerceptionPayload::new("too late", "sensor"))
    }
}

struct EchoAnalyst;

#[async_trait]
impl Analyst for EchoAnalyst {
    async fn analyze(&self, context: &AnalysisContext) -> StrategyResult<Insights> {
        Ok(Insights {
            observations: context.resonant.iter().map(|s| s.record.event.clone()).collect(),
            focus: Some(context.perception.content.clone()).filter(|c| !c.is_empty()),
            confidence: 0.5,
        })
    }
}

struct StepPlanner;

#[async_trait]
impl Planner for StepPlanner {
    async fn plan(&self, insights: &Insights) -> StrategyResult<PlanSpec> {
        Ok(PlanSpec {
            goal: insights.focus.clone(),
            steps: vec!["log observation".into()],
            rationale: "test plan".into(),
        })
    }
}

struct OkActor;

#[async_trait]
impl Actor for OkActor {
    async fn act(&self, plan: &PlanSpec) -> StrategyResult<ActionOutcome> {
        Ok(ActionOutcome::succeeded(format!("executed {} steps", plan.steps.len())))
    }
}

struct FailingActor;

#[async_trait]
impl Actor for FailingActor {
    async fn act(&self, _plan: &PlanSpec) -> StrategyResult<ActionOutcome> {
        Err(StrategyError::failed("actuator offline"))
    }
}

struct PanickingActor;

#[async_trait]
impl Actor for PanickingActor {
    async fn act(&self, _plan: &PlanSpec) -> StrategyResult<ActionOutcome> {
        panic!("actuator driver crashed");
    }
}

fn collaborators() -> Collaborators {
    Collaborators::new(FixedPerceiver("sensor reading nominal"), EchoAnalyst, StepPlanner, OkActor)
}

/// Records the phase sequence it observes.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(u64, Phase, Option<bool>)>>>);

impl PhaseInterceptor for Recorder {
    fn before(&self, tick: u64, phase: Phase) {
        self.0.lock().unwrap().push((tick, phase, None));
    }

    fn after(&self, tick: u64, report: &PhaseReport) {
        self.0.lock().unwrap().push((tick, report.phase, Some(report.ok)));
    }
}

// ===========================================================================
// Scheduler
// ===========================================================================

#[tokio::test]
async fn tick_runs_all_phases_in_order() {
    let store = Arc::new(RecordStore::new());
    let recorder = Recorder::default();
    let mut scheduler = CognitiveScheduler::new(&ResonanceConfig::default(), store.clone(), collaborators())
        .with_interceptor(recorder.clone());

    let cycle = scheduler.tick(&CancellationToken::new()).await;
    assert_eq!(cycle.tick, 1);
    assert_eq!(cycle.phases.iter().map(|r| r.phase).collect::<Vec<_>>(), Phase::ALL.to_vec());
    assert!(cycle.phases.iter().all(|r| r.ok));

    let seen = recorder.0.lock().unwrap().clone();
    let befores: Vec<Phase> = seen.iter().filter(|(_, _, ok)| ok.is_none()).map(|(_, p, _)| *p).collect();
    assert_eq!(befores, Phase::ALL.to_vec());
    assert_eq!(seen.len(), 12);

    assert_eq!(store.scan(&ScanQuery::new().tag(tags::PERCEPTION)).await.len(), 1);
    assert_eq!(store.scan(&ScanQuery::new().tag(tags::ACTION)).await.len(), 1);
    assert_eq!(store.scan(&ScanQuery::new().tag(tags::CYCLE)).await.len(), 1);
}

#[tokio::test]
async fn scenario_c_failing_actor_does_not_stop_ticks() {
    let store = Arc::new(RecordStore::new());
    let mut scheduler = CognitiveScheduler::new(
        &ResonanceConfig::default(),
        store.clone(),
        collaborators().with_actor(FailingActor),
    );
    let cancel = CancellationToken::new();

    for _ in 0..10 {
        let cycle = scheduler.tick(&cancel).await;
        assert_eq!(cycle.failed_phases().collect::<Vec<_>>(), vec![Phase::Act]);
        assert_eq!(cycle.phases.len(), 6);
    }

    let cycles = store.scan(&ScanQuery::new().tag(tags::CYCLE)).await;
    let errors = store.scan(&ScanQuery::new().tag(tags::ERROR)).await;
    assert_eq!(cycles.len(), 10);
    assert_eq!(errors.len(), 10);
    for error in &errors {
        assert!(error.importance >= 0.9);
        assert!(error.has_tag("act"));
        assert!(error.event.contains("actuator offline"));
    }

    let mut ticks: Vec<u64> = cycles
        .iter()
        .map(|r| serde_json::from_str::<CycleRecord>(&r.notes).unwrap().tick)
        .collect();
    ticks.sort_unstable();
    assert_eq!(ticks, (1..=10).collect::<Vec<_>>());

    let next = scheduler.tick(&cancel).await;
    assert_eq!(next.tick, 11);
}

#[tokio::test]
async fn panicking_actor_becomes_phase_error() {
    let store = Arc::new(RecordStore::new());
    let mut scheduler = CognitiveScheduler::new(
        &ResonanceConfig::default(),
        store.clone(),
        collaborators().with_actor(PanickingActor),
    );
    let cancel = CancellationToken::new();

    let cycle = scheduler.tick(&cancel).await;
    assert_eq!(cycle.phases.len(), 6);
    assert_eq!(cycle.failed_phases().collect::<Vec<_>>(), vec![Phase::Act]);
    assert!(cycle.phases[3].error.as_deref().unwrap().contains("panicked: actuator driver crashed"));

    let errors = store.scan(&ScanQuery::new().tag(tags::ERROR)).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].has_tag("act"));
    assert!(errors[0].importance >= 0.9);
    assert_eq!(store.scan(&ScanQuery::new().tag(tags::CYCLE)).await.len(), 1);

    assert_eq!(scheduler.tick(&cancel).await.tick, 2);
}

#[tokio::test]
async fn error_importance_has_a_floor_without_validation() {
    let config = ResonanceConfig::from_toml("[schedule]\nerror_importance = 0.2").unwrap();
    assert_eq!(config.schedule.error_importance, 0.2);
    let store = Arc::new(RecordStore::new());
    let mut scheduler = CognitiveScheduler::new(&config, store.clone(), collaborators().with_actor(FailingActor));

    scheduler.tick(&CancellationToken::new()).await;

    let errors = store.scan(&ScanQuery::new().tag(tags::ERROR)).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].importance, MIN_ERROR_IMPORTANCE);
}

#[tokio::test]
async fn collaborator_timeout_is_a_phase_error() {
    let mut config = ResonanceConfig::default();
    config.schedule.collaborator_timeout_ms = 20;
    let store = Arc::new(RecordStore::new());
    let collaborators =
        Collaborators::new(SlowPerceiver(Duration::from_millis(500)), EchoAnalyst, StepPlanner, OkActor);
    let mut scheduler = CognitiveScheduler::new(&config, store.clone(), collaborators);

    let cycle = scheduler.tick(&CancellationToken::new()).await;
    assert_eq!(cycle.phases.len(), 6);
    assert!(!cycle.phases[0].ok);
    assert!(cycle.phases[0].error.as_deref().unwrap().contains("timeout"));
    assert!(cycle.phases[1..].iter().all(|r| r.ok));

    let errors = store.scan(&ScanQuery::new().tag(tags::ERROR)).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].has_tag("perceive"));
    assert!(store.scan(&ScanQuery::new().tag(tags::PERCEPTION)).await.is_empty());
}

#[tokio::test]
async fn cancellation_lets_tick_finish() {
    let store = Arc::new(RecordStore::new());
    let mut scheduler = CognitiveScheduler::new(&ResonanceConfig::default(), store.clone(), collaborators());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let cycle = scheduler.tick(&cancel).await;
    assert_eq!(cycle.phases.len(), 6);
    assert_eq!(store.scan(&ScanQuery::new().tag(tags::CYCLE)).await.len(), 1);
}

#[tokio::test]
async fn cycle_record_carries_consciousness_delta() {
    let store = Arc::new(RecordStore::new());
    let mut scheduler = CognitiveScheduler::new(&ResonanceConfig::default(), store.clone(), collaborators());
    let before = scheduler.level();

    let cycle = scheduler.tick(&CancellationToken::new()).await;
    assert_eq!(cycle.consciousness_before, before);
    assert_eq!(cycle.consciousness_after, scheduler.level());
    assert!((cycle.consciousness_delta - (scheduler.level() - before)).abs() < 1e-12);

    let stored = store.scan(&ScanQuery::new().tag(tags::CYCLE)).await;
    let parsed: CycleRecord = serde_json::from_str(&stored[0].notes).unwrap();
    assert_eq!(parsed.consciousness_after, cycle.consciousness_after);
    assert_eq!(parsed.phases.len(), 4);
}

#[tokio::test]
async fn repeated_failure_raises_resonance_threshold() {
    let store = Arc::new(RecordStore::new());
    let mut scheduler = CognitiveScheduler::new(
        &ResonanceConfig::default(),
        store,
        collaborators().with_actor(FailingActor),
    );
    let initial = scheduler.thresholds();
    let cancel = CancellationToken::new();
    for _ in 0..5 {
        scheduler.tick(&cancel).await;
    }
    assert!(scheduler.level() < initial.level);
    assert!(scheduler.thresholds().resonance_threshold > initial.resonance_threshold);
}

#[tokio::test]
async fn reflect_keeps_store_under_high_water_mark() {
    let mut config = ResonanceConfig::default();
    config.memory.working_limit = 5;
    config.memory.high_water_mark = 8;
    config.memory.access_protection_floor = 0;
    let store = Arc::new(RecordStore::new());
    let mut scheduler = CognitiveScheduler::new(&config, store.clone(), collaborators());
    let cancel = CancellationToken::new();

    for _ in 0..10 {
        scheduler.tick(&cancel).await;
        assert!(store.count().await <= 8);
    }
    assert!(!store.scan(&ScanQuery::new().tag(tags::CONSOLIDATION)).await.is_empty());
}

#[tokio::test]
async fn phase_tagger_marks_records_with_their_phase() {
    let store = Arc::new(RecordStore::new());
    let mut scheduler =
        CognitiveScheduler::new(&ResonanceConfig::default(), store.clone(), collaborators()).with_interceptor(PhaseTagger);
    scheduler.tick(&CancellationToken::new()).await;

    assert_eq!(store.scan(&ScanQuery::new().tag("phase:perceive")).await.len(), 1);
    assert_eq!(store.scan(&ScanQuery::new().tag("phase:act")).await.len(), 1);
    assert_eq!(store.scan(&ScanQuery::new().tag("phase:reflect")).await.len(), 1);
}

#[tokio::test]
async fn goal_raises_perception_importance() {
    let store = Arc::new(RecordStore::new());
    let perceiver = FixedPerceiver("cooling pump pressure steady");
    let plain = Collaborators::new(perceiver, EchoAnalyst, StepPlanner, OkActor);
    let mut without = CognitiveScheduler::new(&ResonanceConfig::default(), store.clone(), plain.clone());
    let mut with = CognitiveScheduler::new(&ResonanceConfig::default(), store.clone(), plain)
        .with_goal("keep cooling pump pressure steady");
    assert_eq!(with.active_goal(), Some("keep cooling pump pressure steady"));

    let cancel = CancellationToken::new();
    without.tick(&cancel).await;
    with.tick(&cancel).await;

    let perceptions = store
        .scan(&ScanQuery::new().tag(tags::PERCEPTION).order(resonance_memory::ScanOrder::OldestFirst))
        .await;
    assert_eq!(perceptions.len(), 2);
    assert!(perceptions[1].importance > perceptions[0].importance);
}

// ===========================================================================
// Consciousness
// ===========================================================================

#[test]
fn consciousness_stays_in_bounds_under_random_updates() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..50 {
        let min_level = rng.gen_range(0.0..0.5);
        let config = ConsciousnessConfig {
            min_level,
            max_level: rng.gen_range(min_level..1.0),
            initial_level: rng.gen_range(-1.0..2.0),
            decay_factor: rng.gen_range(0.5..1.0),
            max_delta: rng.gen_range(0.0..0.5),
            success_gain: rng.gen_range(0.0..1.0),
            failure_penalty: rng.gen_range(0.0..1.0),
            resonance_gain: rng.gen_range(0.0..1.0),
        };
        let mut controller = ConsciousnessController::new(config.clone());
        assert!(controller.level() >= config.min_level && controller.level() <= config.max_level);

        for _ in 0..200 {
            let outcome = CycleOutcome {
                phases_failed: rng.gen_range(0..=6),
                action_succeeded: match rng.gen_range(0..3) {
                    0 => None,
                    1 => Some(true),
                    _ => Some(false),
                },
                resonant_hits: rng.gen_range(0..20),
            };
            let before = controller.level();
            let after = controller.update(&outcome);
            assert!(after >= config.min_level && after <= config.max_level, "{after} escaped {config:?}");
            assert!((after - before).abs() <= config.max_delta + 1e-12);
        }
    }
}

#[test]
fn threshold_is_monotonic_in_level() {
    let cc = ConsciousnessConfig::default();
    let rc = ResonanceMatchConfig::default();
    let mut previous = f64::INFINITY;
    for step in 0..=100 {
        let level = cc.min_level + (cc.max_level - cc.min_level) * step as f64 / 100.0;
        let t = Thresholds::derive(level, &cc, &rc).resonance_threshold;
        assert!(t <= previous);
        assert!((0.0..=1.0).contains(&t));
        previous = t;
    }
}

// ===========================================================================
// Health monitor
// ===========================================================================

#[tokio::test]
async fn monitor_raises_one_alert_per_excursion() {
    let store = Arc::new(RecordStore::new());
    for i in 0..10 {
        let draft = NewRecord::new(format!("event {i}"), "t").with_importance(0.5);
        let draft = if i < 6 { draft.with_tag(tags::ERROR) } else { draft };
        store.append(draft).await;
    }
    let (_tx, rx) = watch::channel(0.5);
    let mut monitor = HealthMonitor::new(
        store.clone(),
        ConsolidationPolicy::default(),
        resonance_core::MonitorConfig { error_window: 10, error_rate_alert: 0.5, autosave_every: 0 },
        rx,
    );

    let first = monitor.check().await;
    assert!(first.alert_raised);
    assert!((first.error_rate - 0.6).abs() < 1e-9);
    assert_eq!(first.consciousness, 0.5);

    let second = monitor.check().await;
    assert!(!second.alert_raised);

    let warnings = store.scan(&ScanQuery::new().tag(tags::HEALTH)).await;
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].has_tag(tags::WARNING));
}

#[tokio::test]
async fn monitor_consolidates_and_autosaves() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let store = Arc::new(RecordStore::with_path(&path));
    for i in 0..30 {
        store.append(NewRecord::new(format!("event {i}"), "t").with_importance(0.2)).await;
    }
    let mut memory = resonance_core::MemoryConfig::default();
    memory.working_limit = 10;
    memory.high_water_mark = 20;
    let (_tx, rx) = watch::channel(0.5);
    let mut monitor = HealthMonitor::new(
        store.clone(),
        ConsolidationPolicy::from(&memory),
        resonance_core::MonitorConfig { autosave_every: 1, ..Default::default() },
        rx,
    );

    let report = monitor.check().await;
    assert!(report.consolidated);
    assert_eq!(report.records, 30);
    assert_eq!(store.count().await, 10);
    assert_eq!(report.persisted, Some(10));
    assert!(path.exists());
}

// ===========================================================================
// Evolution assessor
// ===========================================================================

#[tokio::test]
async fn evolution_reports_each_pattern_once() {
    let store = Arc::new(RecordStore::new());
    for i in 0..6 {
        store.append(NewRecord::new(format!("disk event {i}"), "t").with_tag("disk")).await;
        store.append(NewRecord::new(format!("tick {i}"), "t").with_tag(tags::CYCLE)).await;
    }
    store.append(NewRecord::new("rare", "t").with_tag("network")).await;

    let (_tx, rx) = watch::channel(0.5);
    let mut assessor = EvolutionAssessor::new(store.clone(), resonance_core::EvolutionConfig::default(), rx);

    let first = assessor.assess().await;
    assert_eq!(first.new_patterns.len(), 1);
    assert_eq!(first.new_patterns[0].tag, "disk");
    assert_eq!(first.new_patterns[0].occurrences, 6);
    assert!(assessor.reported().contains("disk"));

    let second = assessor.assess().await;
    assert!(second.new_patterns.is_empty());

    let patterns = store.scan(&ScanQuery::new().tag(tags::PATTERN)).await;
    assert_eq!(patterns.len(), 1);
    assert!(patterns[0].has_tag(tags::EVOLUTION));
}

#[tokio::test]
async fn evolution_records_consciousness_trend() {
    let store = Arc::new(RecordStore::new());
    let (tx, rx) = watch::channel(0.5);
    let mut assessor = EvolutionAssessor::new(store.clone(), resonance_core::EvolutionConfig::default(), rx);

    let first = assessor.assess().await;
    assert_eq!(first.trend, 0.0);
    assert!(!first.trend_recorded);

    tx.send(0.3).unwrap();
    let second = assessor.assess().await;
    assert!((second.trend + 0.2).abs() < 1e-9);
    assert!(second.trend_recorded);

    let trend = store.scan(&ScanQuery::new().tag(tags::EVOLUTION)).await;
    assert_eq!(trend.len(), 1);
    assert!(trend[0].event.contains("falling"));
}

// ===========================================================================
// Runtime
// ===========================================================================

fn fast_config() -> ResonanceConfig {
    let mut config = ResonanceConfig::default();
    config.schedule.cognition_interval_ms = 5;
    config.schedule.monitoring_interval_ms = 5;
    config.schedule.evolution_interval_ms = 5;
    config.schedule.shutdown_grace_ms = 2_000;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runtime_stops_after_max_ticks_and_persists() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let config = fast_config();
    let store = Arc::new(RecordStore::with_path(&path));
    let scheduler = CognitiveScheduler::new(&config, store, collaborators());

    let runtime = CognitiveRuntime::start(&config, scheduler, Some(3));
    let written = runtime.run_until(std::future::pending()).await.unwrap();
    assert!(written > 0);

    let reloaded = RecordStore::with_path(&path);
    reloaded.load_from_durable().await.unwrap();
    assert_eq!(reloaded.count().await, written);
    assert_eq!(reloaded.scan(&ScanQuery::new().tag(tags::CYCLE)).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runtime_shuts_down_on_signal() {
    let tmp = TempDir::new().unwrap();
    let config = fast_config();
    let store = Arc::new(RecordStore::with_path(tmp.path().join("state.json")));
    let scheduler = CognitiveScheduler::new(&config, store.clone(), collaborators().with_actor(FailingActor));

    let runtime = CognitiveRuntime::start(&config, scheduler, None);
    let token = runtime.shutdown_token();
    assert!((0.1..=1.0).contains(&runtime.level()));

    let written = runtime
        .run_until(tokio::time::sleep(Duration::from_millis(60)))
        .await
        .unwrap();
    assert!(token.is_cancelled());
    assert_eq!(written, store.count().await);

    let cycles = store.scan(&ScanQuery::new().tag(tags::CYCLE)).await.len();
    let errors = store.scan(&ScanQuery::new().tag(tags::ERROR)).await.len();
    assert!(cycles >= 1);
    assert!(errors >= cycles);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runtime_aborts_overrunning_loop_before_final_persist() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let mut config = fast_config();
    config.schedule.collaborator_timeout_ms = 60_000;
    config.schedule.shutdown_grace_ms = 20;
    config.monitor.autosave_every = 1;
    let store = Arc::new(RecordStore::with_path(&path));
    store.append(NewRecord::new("boot", "test")).await;
    let collaborators =
        Collaborators::new(SlowPerceiver(Duration::from_secs(30)), EchoAnalyst, StepPlanner, OkActor);
    let scheduler = CognitiveScheduler::new(&config, store.clone(), collaborators);

    let runtime = CognitiveRuntime::start(&config, scheduler, None);
    let written = tokio::time::timeout(
        Duration::from_secs(5),
        runtime.run_until(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await
    .expect("shutdown should not wait for the stuck tick")
    .unwrap();
    assert!(written >= 1);

    assert!(!path.with_extension("json.tmp").exists());
    let reloaded = RecordStore::with_path(&path);
    reloaded.load_from_durable().await.unwrap();
    assert_eq!(reloaded.count().await, written);
    assert!(reloaded.scan(&ScanQuery::new().tag(tags::CYCLE)).await.is_empty());
}
