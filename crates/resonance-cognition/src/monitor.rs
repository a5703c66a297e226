//! Health monitor, one `check` per monitoring-loop iteration.

use resonance_core::{tags, MonitorConfig, NewRecord};
use resonance_memory::{ConsolidationOutcome, ConsolidationPolicy, RecordStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const MONITOR_SOURCE: &str = "monitor";

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub iteration: u64,
    pub records: usize,
    /// Store size relative to the high-water mark.
    pub utilisation: f64,
    pub error_rate: f64,
    pub consciousness: f64,
    pub alert_raised: bool,
    pub consolidated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<usize>,
}

pub struct HealthMonitor {
    store: Arc<RecordStore>,
    policy: ConsolidationPolicy,
    config: MonitorConfig,
    level: watch::Receiver<f64>,
    iterations: u64,
    alerting: bool,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<RecordStore>,
        policy: ConsolidationPolicy,
        config: MonitorConfig,
        level: watch::Receiver<f64>,
    ) -> Self {
        Self { store, policy, config, level, iterations: 0, alerting: false }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub async fn check(&mut self) -> HealthReport {
        self.iterations += 1;
        let records = self.store.count().await;
        let utilisation = records as f64 / self.policy.high_water_mark.max(1) as f64;
        let error_rate = self.error_rate().await;
        let consciousness = *self.level.borrow();

        // One warning per excursion above the alert rate.
        let mut alert_raised = false;
        if error_rate > self.config.error_rate_alert {
            if !self.alerting {
                warn!("Error rate {:.2} over last {} records", error_rate, self.config.error_window);
                self.store
                    .append(
                        NewRecord::new(
                            format!(
                                "error rate {:.2} over the last {} records exceeds {:.2}",
                                error_rate, self.config.error_window, self.config.error_rate_alert
                            ),
                            MONITOR_SOURCE,
                        )
                        .with_tags([tags::HEALTH, tags::WARNING])
                        .with_importance(0.85),
                    )
                    .await;
                alert_raised = true;
            }
            self.alerting = true;
        } else {
            self.alerting = false;
        }

        let consolidated = match self.store.consolidate_if_needed(&self.policy).await {
            ConsolidationOutcome::Completed(_) => true,
            ConsolidationOutcome::Skipped { waited_ms } => {
                debug!("Monitor consolidation skipped after {}ms", waited_ms);
                false
            }
            ConsolidationOutcome::NotNeeded { .. } => false,
        };

        let persisted = if self.config.autosave_every > 0 && self.iterations % self.config.autosave_every == 0 {
            self.autosave().await
        } else {
            None
        };

        let report = HealthReport {
            iteration: self.iterations,
            records,
            utilisation,
            error_rate,
            consciousness,
            alert_raised,
            consolidated,
            persisted,
        };
        debug!(
            records,
            utilisation,
            error_rate,
            consciousness,
            "health check"
        );
        report
    }

    async fn error_rate(&self) -> f64 {
        let recent = self.store.recent(self.config.error_window).await;
        if recent.is_empty() {
            return 0.0;
        }
        let errors = recent.iter().filter(|r| r.has_tag(tags::ERROR)).count();
        errors as f64 / recent.len() as f64
    }

    async fn autosave(&self) -> Option<usize> {
        match self.store.persist_all().await {
            Ok(written) => {
                info!("Autosaved {} records", written);
                Some(written)
            }
            Err(e) => {
                warn!("Autosave failed: {}", e);
                self.store
                    .append(
                        NewRecord::new(format!("autosave failed: {e}"), MONITOR_SOURCE)
                            .with_tags([tags::ERROR, tags::HEALTH])
                            .with_importance(0.9),
                    )
                    .await;
                None
            }
        }
    }
}
