//! Resonance: context-dependent relevance computed at query time.
//!
//! ```text
//! base       = overlap_weight * coverage(query, event + tags)
//!            + authority_weight * [source is an authority]
//! multiplier = (1 - importance_weight) + importance_weight * importance
//! resonance  = base * multiplier
//! ```
//!
//! A record sharing no token with the query does not resonate at all, even
//! from an authority source. Coverage only grows when overlapping tokens are
//! added to the query and every other term is fixed, so the score is
//! monotonic in overlap.

use crate::store::{newest_first, RecordStore};
use crate::tokens::{coverage, tokenize};
use resonance_core::{Record, ResonanceMatchConfig, ScoredRecord};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone)]
pub struct ResonanceMatcher {
    config: ResonanceMatchConfig,
    authorities: HashSet<String>,
}

impl Default for ResonanceMatcher {
    fn default() -> Self {
        Self::new(ResonanceMatchConfig::default())
    }
}

impl ResonanceMatcher {
    pub fn new(config: ResonanceMatchConfig) -> Self {
        let authorities = config.authority_sources.iter().map(|s| s.to_lowercase()).collect();
        Self { config, authorities }
    }

    pub fn config(&self) -> &ResonanceMatchConfig {
        &self.config
    }

    pub fn is_authority(&self, source: &str) -> bool {
        self.authorities.contains(&source.to_lowercase())
    }

    fn record_tokens(record: &Record) -> BTreeSet<String> {
        let mut tokens = tokenize(&record.event);
        for tag in &record.tags {
            tokens.extend(tokenize(tag));
            tokens.insert(tag.to_lowercase());
        }
        tokens
    }

    /// Score one record against pre-tokenized query terms.
    pub fn score_tokens(&self, query: &BTreeSet<String>, record: &Record) -> f64 {
        let overlap = coverage(query, &Self::record_tokens(record));
        if overlap <= 0.0 {
            return 0.0;
        }

        let authority = if self.is_authority(&record.source) { 1.0 } else { 0.0 };
        let base = self.config.overlap_weight * overlap + self.config.authority_weight * authority;

        let w = self.config.importance_weight;
        let multiplier = (1.0 - w) + w * record.importance;
        (base * multiplier).max(0.0)
    }

    pub fn score(&self, query: &str, record: &Record) -> f64 {
        self.score_tokens(&tokenize(query), record)
    }

    /// Rank a set of records. Records scoring below `threshold` are dropped;
    /// ties go to the most recent record.
    pub fn rank<'a, I>(&self, query: &str, records: I, threshold: f64) -> Vec<ScoredRecord>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let terms = tokenize(query);
        let mut scored: Vec<ScoredRecord> = records
            .into_iter()
            .filter_map(|record| {
                let resonance = self.score_tokens(&terms, record);
                (resonance > 0.0 && resonance >= threshold)
                    .then(|| ScoredRecord { record: record.clone(), resonance })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.resonance
                .total_cmp(&a.resonance)
                .then_with(|| newest_first(&a.record, &b.record))
        });
        scored
    }

    /// Rank the store's current records against `query`. Returned records
    /// count as accessed.
    pub async fn resonate(
        &self,
        store: &RecordStore,
        query: &str,
        threshold: f64,
        limit: Option<usize>,
    ) -> Vec<ScoredRecord> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let slots = store.slots().await;
        let mut hits: Vec<(f64, usize)> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let resonance = self.score_tokens(&terms, &slot.record);
                (resonance > 0.0 && resonance >= threshold).then_some((resonance, i))
            })
            .collect();

        hits.sort_by(|(ra, ia), (rb, ib)| {
            rb.total_cmp(ra)
                .then_with(|| newest_first(&slots[*ia].record, &slots[*ib].record))
        });
        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        hits.into_iter()
            .map(|(resonance, i)| {
                let slot = &slots[i];
                let mut record = slot.record.clone();
                record.access_count = slot.touch();
                ScoredRecord { record, resonance }
            })
            .collect()
    }
}
