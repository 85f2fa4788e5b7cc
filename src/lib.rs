//! llmbench: benchmarking for local language models behind an
//! Ollama-compatible endpoint.
//!
//! This crate re-exports the workspace members under one name.

pub use llmbench_catalog as catalog;
pub use llmbench_endpoint as endpoint;
pub use llmbench_metrics as metrics;
pub use llmbench_runner as runner;
