//! CognitiveRuntime — owns the three periodic loops.
//!
//! ```text
//! cognition   every schedule.cognition_interval   scheduler.tick()
//! monitoring  every schedule.monitoring_interval  monitor.check()
//! evolution   every schedule.evolution_interval   assessor.assess()
//! ```
//!
//! All three share one `Arc<RecordStore>` and one shutdown token. The token is
//! checked at the top of every iteration and during the sleep between them.
//! On shutdown each loop gets `shutdown_grace` to finish its current
//! iteration; a loop that overruns is aborted and awaited, then the store is
//! persisted once.

use crate::evolution::EvolutionAssessor;
use crate::monitor::HealthMonitor;
use crate::scheduler::CognitiveScheduler;
use resonance_core::{ResonanceConfig, Result};
use resonance_memory::RecordStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct CognitiveRuntime {
    id: Uuid,
    store: Arc<RecordStore>,
    cancel: CancellationToken,
    level: watch::Receiver<f64>,
    grace: Duration,
    loops: Vec<(&'static str, JoinHandle<()>)>,
}

impl CognitiveRuntime {
    /// Spawn the three loops around `scheduler`. With `max_ticks` the
    /// cognition loop stops after that many ticks and requests shutdown.
    pub fn start(config: &ResonanceConfig, scheduler: CognitiveScheduler, max_ticks: Option<u64>) -> Self {
        let id = Uuid::new_v4();
        let store = scheduler.store().clone();
        let cancel = CancellationToken::new();
        let level = scheduler.subscribe();

        let monitor = HealthMonitor::new(
            store.clone(),
            scheduler.policy().clone(),
            config.monitor.clone(),
            scheduler.subscribe(),
        );
        let assessor = EvolutionAssessor::new(store.clone(), config.evolution.clone(), scheduler.subscribe());

        let schedule = &config.schedule;
        let loops = vec![
            (
                "cognition",
                tokio::spawn(cognition_loop(scheduler, schedule.cognition_interval(), cancel.clone(), max_ticks)),
            ),
            ("monitoring", tokio::spawn(monitoring_loop(monitor, schedule.monitoring_interval(), cancel.clone()))),
            ("evolution", tokio::spawn(evolution_loop(assessor, schedule.evolution_interval(), cancel.clone()))),
        ];

        info!(runtime = %id, "Cognitive runtime started");
        Self { id, store, cancel, level, grace: schedule.shutdown_grace(), loops }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn level(&self) -> f64 {
        *self.level.borrow()
    }

    /// Token that stops every loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until `signal` resolves or a loop requests shutdown, then shut down.
    pub async fn run_until<F>(self, signal: F) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = signal => info!("Shutdown signal received"),
            _ = self.cancel.cancelled() => debug!("Shutdown requested by a loop"),
        }
        self.shutdown().await
    }

    /// Stop all loops and persist the store once. Returns the number of
    /// records written.
    pub async fn shutdown(self) -> Result<usize> {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.grace;

        for (name, mut handle) in self.loops {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!("{} loop stopped", name),
                Ok(Err(e)) => warn!("{} loop ended abnormally: {}", name, e),
                Err(_) => {
                    warn!("{} loop exceeded the {}ms shutdown grace, aborting", name, self.grace.as_millis());
                    handle.abort();
                    if let Err(e) = handle.await {
                        if !e.is_cancelled() {
                            warn!("{} loop ended abnormally while aborting: {}", name, e);
                        }
                    }
                }
            }
        }

        let written = self.store.persist_all().await?;
        info!(runtime = %self.id, "Cognitive runtime stopped, {} records persisted", written);
        Ok(written)
    }
}

/// Sleep for `interval` unless shutdown arrives first. Returns false on shutdown.
async fn pause(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

async fn cognition_loop(
    mut scheduler: CognitiveScheduler,
    interval: Duration,
    cancel: CancellationToken,
    max_ticks: Option<u64>,
) {
    while !cancel.is_cancelled() {
        scheduler.tick(&cancel).await;
        if max_ticks.is_some_and(|max| scheduler.ticks() >= max) {
            info!("Completed {} ticks", scheduler.ticks());
            cancel.cancel();
            break;
        }
        if !pause(interval, &cancel).await {
            break;
        }
    }
    debug!("cognition loop exiting after {} ticks", scheduler.ticks());
}

async fn monitoring_loop(mut monitor: HealthMonitor, interval: Duration, cancel: CancellationToken) {
    while pause(interval, &cancel).await {
        monitor.check().await;
    }
    debug!("monitoring loop exiting after {} checks", monitor.iterations());
}

async fn evolution_loop(mut assessor: EvolutionAssessor, interval: Duration, cancel: CancellationToken) {
    while pause(interval, &cancel).await {
        assessor.assess().await;
    }
    debug!("evolution loop exiting");
}
