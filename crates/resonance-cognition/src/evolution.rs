//! Evolution assessor. Looks for recurring tags in recent records and
//! tracks where consciousness is heading between assessments.

use resonance_core::{clamp_unit, tags, EvolutionConfig, NewRecord};
use resonance_memory::RecordStore;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

pub const EVOLUTION_SOURCE: &str = "evolution";

/// Tags the runtime writes for its own bookkeeping. They recur by
/// construction and are never reported as patterns.
const BOOKKEEPING_TAGS: &[&str] = &[
    tags::CYCLE,
    tags::PERCEPTION,
    tags::ACTION,
    tags::HEALTH,
    tags::PATTERN,
    tags::EVOLUTION,
    tags::CONSOLIDATION,
    tags::LOAD,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub tag: String,
    pub occurrences: usize,
    pub window: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EvolutionReport {
    pub window: usize,
    pub new_patterns: Vec<Pattern>,
    /// Consciousness change since the previous assessment.
    pub trend: f64,
    pub trend_recorded: bool,
}

pub struct EvolutionAssessor {
    store: Arc<RecordStore>,
    config: EvolutionConfig,
    level: watch::Receiver<f64>,
    reported: HashSet<String>,
    last_level: Option<f64>,
}

impl EvolutionAssessor {
    pub fn new(store: Arc<RecordStore>, config: EvolutionConfig, level: watch::Receiver<f64>) -> Self {
        Self { store, config, level, reported: HashSet::new(), last_level: None }
    }

    /// Tags already reported as patterns.
    pub fn reported(&self) -> &HashSet<String> {
        &self.reported
    }

    fn is_bookkeeping(tag: &str) -> bool {
        BOOKKEEPING_TAGS.contains(&tag) || tag.starts_with(crate::phase::PhaseTagger::PREFIX)
    }

    pub async fn assess(&mut self) -> EvolutionReport {
        let recent = self.store.recent(self.config.window).await;
        let window = recent.len();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &recent {
            for tag in record.tags.iter().filter(|t| !Self::is_bookkeeping(t)) {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }

        let new_patterns: Vec<Pattern> = counts
            .into_iter()
            .filter(|(tag, n)| *n >= self.config.min_support.max(1) && !self.reported.contains(*tag))
            .map(|(tag, occurrences)| Pattern { tag: tag.to_string(), occurrences, window })
            .collect();

        let drafts: Vec<NewRecord> = new_patterns
            .iter()
            .map(|p| {
                NewRecord::new(
                    format!("recurring pattern: tag '{}' in {} of the last {} records", p.tag, p.occurrences, p.window),
                    EVOLUTION_SOURCE,
                )
                .with_tags([tags::PATTERN, tags::EVOLUTION])
                .with_category("pattern")
                .with_importance(clamp_unit(0.4 + 0.4 * p.occurrences as f64 / window.max(1) as f64))
                .with_notes(p.tag.clone())
            })
            .collect();
        if !drafts.is_empty() {
            self.store.append_many(drafts).await;
        }
        for p in &new_patterns {
            info!("New pattern: '{}' ({} of {})", p.tag, p.occurrences, p.window);
            self.reported.insert(p.tag.clone());
        }

        let level = *self.level.borrow();
        let trend = self.last_level.map(|prev| level - prev).unwrap_or(0.0);
        self.last_level = Some(level);

        let trend_recorded = self.config.trend_report_delta > 0.0 && trend.abs() >= self.config.trend_report_delta;
        if trend_recorded {
            let direction = if trend > 0.0 { "rising" } else { "falling" };
            self.store
                .append(
                    NewRecord::new(
                        format!("consciousness {} by {:.3} to {:.3}", direction, trend.abs(), level),
                        EVOLUTION_SOURCE,
                    )
                    .with_tag(tags::EVOLUTION)
                    .with_category("trend")
                    .with_importance(0.5),
                )
                .await;
        }

        debug!(window, patterns = new_patterns.len(), trend, "evolution assessment");
        EvolutionReport { window, new_patterns, trend, trend_recorded }
    }
}
