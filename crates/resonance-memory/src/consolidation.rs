//! Batch eviction that keeps the store bounded.
//!
//! Runs entirely inside one write-lock section: readers holding an older
//! snapshot keep seeing the pre-consolidation set, readers arriving after
//! see the post-consolidation set. If the lock cannot be taken within the
//! configured timeout the run is skipped; the next trigger retries.

use crate::store::{RecordStore, Slot};
use chrono::{DateTime, Utc};
use resonance_core::{tags, MemoryConfig, NewRecord, Record, RecordId};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const CONSOLIDATION_SOURCE: &str = "consolidation";

#[derive(Debug, Clone)]
pub struct ConsolidationPolicy {
    pub working_limit: usize,
    pub high_water_mark: usize,
    pub protection_threshold: f64,
    /// 0 disables access-based protection.
    pub access_protection_floor: u64,
    pub recency_window: Duration,
    pub access_ceiling: u64,
    pub lock_timeout: Duration,
    pub importance_weight: f64,
    pub recency_weight: f64,
    pub access_weight: f64,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for ConsolidationPolicy {
    fn from(c: &MemoryConfig) -> Self {
        Self {
            working_limit: c.working_limit,
            high_water_mark: c.high_water_mark.max(c.working_limit),
            protection_threshold: c.protection_threshold,
            access_protection_floor: c.access_protection_floor,
            recency_window: Duration::from_secs(c.recency_window_secs),
            access_ceiling: c.access_ceiling.max(1),
            lock_timeout: c.consolidation_lock_timeout(),
            importance_weight: c.retention_importance_weight,
            recency_weight: c.retention_recency_weight,
            access_weight: c.retention_access_weight,
        }
    }
}

impl ConsolidationPolicy {
    pub fn is_protected(&self, importance: f64, access_count: u64) -> bool {
        importance >= self.protection_threshold
            || (self.access_protection_floor > 0 && access_count >= self.access_protection_floor)
    }

    /// Linear decay from 1 at creation to 0 at the end of the window.
    pub fn recency_score(&self, record: &Record, now: DateTime<Utc>) -> f64 {
        let window = self.recency_window.as_secs_f64();
        if window <= 0.0 {
            return 0.0;
        }
        (1.0 - record.age_secs(now) / window).clamp(0.0, 1.0)
    }

    pub fn access_score(&self, access_count: u64) -> f64 {
        access_count.min(self.access_ceiling) as f64 / self.access_ceiling as f64
    }

    pub fn retention_score(&self, record: &Record, access_count: u64, now: DateTime<Utc>) -> f64 {
        self.importance_weight * record.importance
            + self.recency_weight * self.recency_score(record, now)
            + self.access_weight * self.access_score(access_count)
    }

    /// Choose the ids to keep out of `records`, leaving room for at most
    /// `capacity` records. Protected records are always kept, even past
    /// capacity. `records` carries current access counts.
    pub fn select(&self, records: &[Record], capacity: usize, now: DateTime<Utc>) -> Selection {
        let mut keep = HashSet::new();
        let mut candidates: Vec<(f64, &Record)> = Vec::new();

        for record in records {
            if self.is_protected(record.importance, record.access_count) {
                keep.insert(record.id);
            } else {
                candidates.push((self.retention_score(record, record.access_count, now), record));
            }
        }
        let protected = keep.len();

        candidates.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });

        let room = capacity.saturating_sub(protected);
        keep.extend(candidates.iter().take(room).map(|(_, r)| r.id));

        Selection { keep, protected }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub keep: HashSet<RecordId>,
    pub protected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub before: usize,
    pub after: usize,
    pub removed: usize,
    pub protected: usize,
    /// The store, audit record included, ended above the working limit
    /// because protected records filled it.
    pub over_capacity: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub enum ConsolidationOutcome {
    NotNeeded { count: usize },
    Completed(ConsolidationReport),
    /// The exclusive section was not available in time.
    Skipped { waited_ms: u64 },
}

impl ConsolidationOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn report(&self) -> Option<&ConsolidationReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

impl RecordStore {
    /// Consolidate only if the store has grown past the high-water mark.
    pub async fn consolidate_if_needed(&self, policy: &ConsolidationPolicy) -> ConsolidationOutcome {
        let count = self.count().await;
        if count <= policy.high_water_mark {
            return ConsolidationOutcome::NotNeeded { count };
        }
        self.run_consolidation(policy, policy.high_water_mark).await
    }

    /// Consolidate down to the working limit regardless of the high-water mark.
    pub async fn consolidate(&self, policy: &ConsolidationPolicy) -> ConsolidationOutcome {
        self.run_consolidation(policy, policy.working_limit).await
    }

    async fn run_consolidation(&self, policy: &ConsolidationPolicy, trigger: usize) -> ConsolidationOutcome {
        let started = Instant::now();
        let mut inner = match tokio::time::timeout(policy.lock_timeout, self.inner.write()).await {
            Ok(guard) => guard,
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!("Consolidation skipped: write lock not acquired in {}ms", waited_ms);
                return ConsolidationOutcome::Skipped { waited_ms };
            }
        };

        let before = inner.slots.len();
        if before <= trigger {
            debug!("Consolidation not needed ({} records)", before);
            return ConsolidationOutcome::NotNeeded { count: before };
        }

        let now = Utc::now();
        let records: Vec<Record> = inner.slots.iter().map(|s| s.materialize()).collect();
        // One slot stays free for the audit record appended below.
        let capacity = policy.working_limit.saturating_sub(1);
        let selection = policy.select(&records, capacity, now);

        let kept: Vec<Arc<Slot>> = inner
            .slots
            .iter()
            .filter(|s| selection.keep.contains(&s.record.id))
            .cloned()
            .collect();
        inner.slots = kept;

        let after = inner.slots.len() + 1;
        let report = ConsolidationReport {
            before,
            after,
            removed: before - inner.slots.len(),
            protected: selection.protected,
            over_capacity: after > policy.working_limit,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let notes = serde_json::to_string(&report).unwrap_or_default();
        inner.push(
            NewRecord::new(
                format!(
                    "consolidated store: removed {} of {} records ({} protected)",
                    report.removed, report.before, report.protected
                ),
                CONSOLIDATION_SOURCE,
            )
            .with_tag(tags::CONSOLIDATION)
            .with_importance(0.5)
            .with_notes(notes),
        );
        drop(inner);

        if report.over_capacity {
            warn!(
                "Protected records ({}) fill working limit ({}); store stays over target at {}",
                report.protected, policy.working_limit, report.after
            );
        }
        info!(
            "Consolidation removed {} of {} records ({} protected) in {}ms",
            report.removed, report.before, report.protected, report.elapsed_ms
        );
        ConsolidationOutcome::Completed(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(id: u64, importance: f64, access: u64, created_at: DateTime<Utc>) -> Record {
        let mut r = NewRecord::new(format!("event {id}"), "test")
            .with_importance(importance)
            .into_record(RecordId::new(id), created_at);
        r.access_count = access;
        r
    }

    #[test]
    fn recency_decays_linearly() {
        let policy = ConsolidationPolicy {
            recency_window: Duration::from_secs(100),
            ..Default::default()
        };
        let now = Utc::now();
        let fresh = at(1, 0.5, 0, now);
        let half = at(2, 0.5, 0, now - chrono::Duration::seconds(50));
        let old = at(3, 0.5, 0, now - chrono::Duration::seconds(500));
        assert!((policy.recency_score(&fresh, now) - 1.0).abs() < 1e-9);
        assert!((policy.recency_score(&half, now) - 0.5).abs() < 1e-3);
        assert_eq!(policy.recency_score(&old, now), 0.0);
    }

    #[test]
    fn access_score_saturates() {
        let policy = ConsolidationPolicy { access_ceiling: 4, ..Default::default() };
        assert_eq!(policy.access_score(0), 0.0);
        assert_eq!(policy.access_score(2), 0.5);
        assert_eq!(policy.access_score(40), 1.0);
    }

    #[test]
    fn frequently_read_records_are_protected() {
        let policy = ConsolidationPolicy { access_protection_floor: 3, ..Default::default() };
        let now = Utc::now();
        let records = vec![at(1, 0.1, 5, now), at(2, 0.6, 0, now), at(3, 0.7, 0, now)];
        let selection = policy.select(&records, 1, now);
        assert!(selection.keep.contains(&RecordId::new(1)));
        assert_eq!(selection.protected, 1);
        assert_eq!(selection.keep.len(), 1);
    }

    #[test]
    fn ties_prefer_newer_records() {
        let policy = ConsolidationPolicy::default();
        let now = Utc::now();
        let records = vec![at(1, 0.3, 0, now), at(2, 0.3, 0, now)];
        let selection = policy.select(&records, 1, now);
        assert!(selection.keep.contains(&RecordId::new(2)));
    }

    #[tokio::test]
    async fn skipped_when_lock_is_held() {
        let store = RecordStore::new();
        for i in 0..5 {
            store.append(NewRecord::new(format!("r{i}"), "test").with_importance(0.2)).await;
        }
        let policy = ConsolidationPolicy {
            working_limit: 2,
            high_water_mark: 3,
            lock_timeout: Duration::from_millis(20),
            ..Default::default()
        };

        let reader = store.inner.read().await;
        let outcome = store.consolidate_if_needed(&policy).await;
        drop(reader);
        assert!(outcome.is_skipped());
        assert_eq!(store.count().await, 5);

        let outcome = store.consolidate_if_needed(&policy).await;
        assert!(outcome.report().is_some());
        assert_eq!(store.count().await, 2);
    }

    #[test]
    fn zero_floor_disables_access_protection() {
        let policy = ConsolidationPolicy { access_protection_floor: 0, ..Default::default() };
        assert!(!policy.is_protected(0.1, 0));
    }
}
