//! Record data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Well-known tags written by the runtime itself.
pub mod tags {
    pub const CYCLE: &str = "cycle";
    pub const ERROR: &str = "error";
    pub const WARNING: &str = "warning";
    pub const PERCEPTION: &str = "perception";
    pub const ACTION: &str = "action";
    pub const HEALTH: &str = "health";
    pub const PATTERN: &str = "pattern";
    pub const EVOLUTION: &str = "evolution";
    pub const CONSOLIDATION: &str = "consolidation";
    pub const LOAD: &str = "load";
}

/// Record identifier. Assigned by the store, strictly increasing in append order.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rec-{:08}", self.0)
    }
}

/// Clamp a score into `[0, 1]`. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A stored record. Everything except `access_count` is fixed once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub event: String,
    pub source: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub importance: f64,
    #[serde(default)]
    pub emotion_label: String,
    #[serde(default)]
    pub resonance_category: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub access_count: u64,
}

impl Record {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Age in seconds relative to `now`. Never negative.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.created_at).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }

    /// Checks the invariants a record must hold to enter the store.
    pub fn validate(&self) -> Result<()> {
        if !self.importance.is_finite() || !(0.0..=1.0).contains(&self.importance) {
            return Err(Error::InvalidRecord(format!(
                "{}: importance {} outside [0, 1]",
                self.id, self.importance
            )));
        }
        if self.id.value() == 0 {
            return Err(Error::InvalidRecord("record id 0 is reserved".into()));
        }
        Ok(())
    }
}

/// A record before it is appended: the store assigns id and timestamp.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewRecord {
    pub event: String,
    pub source: String,
    pub tags: BTreeSet<String>,
    pub importance: f64,
    pub emotion_label: String,
    pub resonance_category: String,
    pub notes: String,
}

impl NewRecord {
    pub fn new(event: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = clamp_unit(importance);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_emotion(mut self, label: impl Into<String>) -> Self {
        self.emotion_label = label.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.resonance_category = category.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Materialize into a stored record. Importance is clamped again so a
    /// directly-constructed `NewRecord` can never break the store invariant.
    pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> Record {
        Record {
            id,
            created_at,
            event: self.event,
            source: self.source,
            tags: self.tags,
            importance: clamp_unit(self.importance),
            emotion_label: self.emotion_label,
            resonance_category: self.resonance_category,
            notes: self.notes,
            access_count: 0,
        }
    }
}

/// A record ranked against a query context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub resonance: f64,
}
