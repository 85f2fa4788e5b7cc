//! Measurement data model for llmbench.
//!
//! Everything in this crate is pure data: model descriptors, memory samples
//! parsed from the endpoint's resident-model report, immutable trial results
//! with their derived rates, and cross-trial statistics.

pub mod memory;
pub mod model;
pub mod result;
pub mod stats;

pub use memory::{parse_status_report, resident_models, MemorySample};
pub use model::ModelDescriptor;
pub use result::{TrialMetrics, TrialRecord, TrialResult};
pub use stats::{Metric, MetricSummary, ModelStatistics, RunStatistics};
