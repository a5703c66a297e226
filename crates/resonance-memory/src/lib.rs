//! Resonance Memory — record store, importance scoring, resonance ranking,
//! and bounded consolidation.
//!
//! The store is an explicit handle: construct one `RecordStore`, wrap it in
//! an `Arc`, and hand it to every component that reads or writes records.

pub mod consolidation;
pub mod durable;
pub mod resonance;
pub mod scorer;
pub mod store;
pub mod tokens;

pub use consolidation::{
    ConsolidationOutcome, ConsolidationPolicy, ConsolidationReport, Selection, CONSOLIDATION_SOURCE,
};
pub use durable::{LoadReport, SkippedEntry, LOADER_SOURCE, SNAPSHOT_VERSION};
pub use resonance::ResonanceMatcher;
pub use scorer::{ImportanceScorer, ScoringContext};
pub use store::{RecordStore, ScanOrder, ScanQuery, StoreStats};
