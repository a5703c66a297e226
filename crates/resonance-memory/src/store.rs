//! RecordStore — the single owner of every record.
//!
//! Writers (`append`, consolidation, load) take the write half of a
//! `tokio::sync::RwLock`, which is fair: queued writers are not starved by a
//! stream of readers. Readers take the read half only long enough to clone
//! the list of `Arc<Slot>` handles, then filter and sort outside the lock, so
//! every read works on a snapshot taken at the call point.
//!
//! Access counters live in an atomic beside each record and are bumped
//! without the write lock. They are best-effort: a bump racing a
//! consolidation may land on a slot that is being dropped.

use crate::durable::PersistGuard;
use chrono::{DateTime, Utc};
use resonance_core::{tags, NewRecord, Record, RecordId};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub(crate) struct Slot {
    pub(crate) record: Record,
    access: AtomicU64,
}

impl Slot {
    pub(crate) fn new(record: Record) -> Self {
        let access = AtomicU64::new(record.access_count);
        Self { record, access }
    }

    pub(crate) fn access_count(&self) -> u64 {
        self.access.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self) -> u64 {
        self.access.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn materialize(&self) -> Record {
        let mut record = self.record.clone();
        record.access_count = self.access_count();
        record
    }
}

pub(crate) struct StoreInner {
    /// Always sorted by id, which is also creation order.
    pub(crate) slots: Vec<Arc<Slot>>,
    next_seq: u64,
    last_created_at: Option<DateTime<Utc>>,
}

impl StoreInner {
    fn new() -> Self {
        Self { slots: Vec::new(), next_seq: 1, last_created_at: None }
    }

    /// Assign id and timestamp, then push. Timestamps never go backwards even
    /// if the wall clock does.
    pub(crate) fn push(&mut self, draft: NewRecord) -> RecordId {
        let id = RecordId::new(self.next_seq);
        self.next_seq += 1;

        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created_at = Some(created_at);

        self.slots.push(Arc::new(Slot::new(draft.into_record(id, created_at))));
        id
    }

    /// Replace the whole record set. Records are sorted by id and the
    /// sequence resumes after the highest id.
    pub(crate) fn replace(&mut self, mut records: Vec<Record>) {
        records.sort_by_key(|r| r.id);
        self.next_seq = records.last().map(|r| r.id.value() + 1).unwrap_or(1);
        self.last_created_at = records.iter().map(|r| r.created_at).max();
        self.slots = records.into_iter().map(|r| Arc::new(Slot::new(r))).collect();
    }
}

/// Sort key for scan results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanOrder {
    #[default]
    ImportanceDesc,
    NewestFirst,
    OldestFirst,
    MostAccessed,
}

/// Predicate for [`RecordStore::scan`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ScanQuery {
    pub tag: Option<String>,
    pub any_tags: Vec<String>,
    pub min_importance: Option<f64>,
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub order: ScanOrder,
}

impl ScanQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn any_tag(mut self, tag: impl Into<String>) -> Self {
        self.any_tags.push(tag.into());
        self
    }

    pub fn min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order(mut self, order: ScanOrder) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(tag) = &self.tag {
            if !record.has_tag(tag) {
                return false;
            }
        }
        if !self.any_tags.is_empty() && !self.any_tags.iter().any(|t| record.has_tag(t)) {
            return false;
        }
        if let Some(min) = self.min_importance {
            if record.importance < min {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &record.source != source {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        true
    }
}

/// Newest first: later timestamp, then higher id.
pub(crate) fn newest_first(a: &Record, b: &Record) -> CmpOrdering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

fn compare(order: ScanOrder, a: &Record, b: &Record) -> CmpOrdering {
    match order {
        ScanOrder::ImportanceDesc => {
            b.importance.total_cmp(&a.importance).then_with(|| newest_first(a, b))
        }
        ScanOrder::NewestFirst => newest_first(a, b),
        ScanOrder::OldestFirst => newest_first(b, a),
        ScanOrder::MostAccessed => {
            b.access_count.cmp(&a.access_count).then_with(|| newest_first(a, b))
        }
    }
}

/// Summary figures for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub count: usize,
    pub mean_importance: f64,
    pub protected: usize,
    pub errors: usize,
    pub cycles: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub top_tags: Vec<(String, usize)>,
}

pub struct RecordStore {
    pub(crate) inner: RwLock<StoreInner>,
    path: Option<PathBuf>,
    pub(crate) persist: PersistGuard,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// In-memory store; `persist_all` is a no-op.
    pub fn new() -> Self {
        Self { inner: RwLock::new(StoreInner::new()), path: None, persist: PersistGuard::default() }
    }

    /// Store backed by a JSON snapshot file at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { inner: RwLock::new(StoreInner::new()), path: Some(path.into()), persist: PersistGuard::default() }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a record. The only blocking point is the write lock, which is
    /// held for a single push.
    pub async fn append(&self, draft: NewRecord) -> RecordId {
        let mut inner = self.inner.write().await;
        inner.push(draft)
    }

    /// Append several records inside one critical section, preserving order.
    pub async fn append_many(&self, drafts: impl IntoIterator<Item = NewRecord>) -> Vec<RecordId> {
        let mut inner = self.inner.write().await;
        drafts.into_iter().map(|d| inner.push(d)).collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.count().await == 0
    }

    /// Clone the slot handles under the read lock. Everything after this
    /// works on the snapshot.
    pub(crate) async fn slots(&self) -> Vec<Arc<Slot>> {
        self.inner.read().await.slots.clone()
    }

    /// Query records. Returned records count as accessed.
    pub async fn scan(&self, query: &ScanQuery) -> Vec<Record> {
        let limit = query.limit;
        self.scan_where(|r| query.matches(r), query.order, limit).await
    }

    /// Query with an arbitrary predicate. Returned records count as accessed.
    pub async fn scan_where<F>(&self, predicate: F, order: ScanOrder, limit: Option<usize>) -> Vec<Record>
    where
        F: Fn(&Record) -> bool,
    {
        let slots = self.slots().await;
        let mut hits: Vec<(Record, &Arc<Slot>)> = slots
            .iter()
            .filter(|s| predicate(&s.record))
            .map(|s| (s.materialize(), s))
            .collect();

        hits.sort_by(|(a, _), (b, _)| compare(order, a, b));
        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        hits.into_iter()
            .map(|(mut record, slot)| {
                record.access_count = slot.touch();
                record
            })
            .collect()
    }

    /// Every record in creation order. Does not count as access.
    pub async fn snapshot(&self) -> Vec<Record> {
        self.slots().await.iter().map(|s| s.materialize()).collect()
    }

    /// The `n` most recent records, oldest first. Does not count as access.
    pub async fn recent(&self, n: usize) -> Vec<Record> {
        let slots = self.slots().await;
        let start = slots.len().saturating_sub(n);
        slots[start..].iter().map(|s| s.materialize()).collect()
    }

    /// Look up one record by id. Does not count as access.
    pub async fn get(&self, id: RecordId) -> Option<Record> {
        let inner = self.inner.read().await;
        inner
            .slots
            .binary_search_by_key(&id, |s| s.record.id)
            .ok()
            .map(|i| inner.slots[i].materialize())
    }

    pub async fn stats(&self, protection_threshold: f64, top_n: usize) -> StoreStats {
        let slots = self.slots().await;
        if slots.is_empty() {
            return StoreStats::default();
        }

        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        let mut importance_sum = 0.0;
        let mut stats = StoreStats { count: slots.len(), ..Default::default() };

        for slot in &slots {
            let r = &slot.record;
            importance_sum += r.importance;
            if r.importance >= protection_threshold {
                stats.protected += 1;
            }
            if r.has_tag(tags::ERROR) {
                stats.errors += 1;
            }
            if r.has_tag(tags::CYCLE) {
                stats.cycles += 1;
            }
            for tag in &r.tags {
                *tag_counts.entry(tag.as_str()).or_default() += 1;
            }
        }

        stats.mean_importance = importance_sum / slots.len() as f64;
        stats.oldest = slots.first().map(|s| s.record.created_at);
        stats.newest = slots.last().map(|s| s.record.created_at);

        let mut ranked: Vec<(String, usize)> =
            tag_counts.into_iter().map(|(t, c)| (t.to_string(), c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_n);
        stats.top_tags = ranked;
        stats
    }
}
