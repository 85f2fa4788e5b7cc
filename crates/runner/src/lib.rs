//! Benchmark execution for llmbench.
//!
//! The [`executor`] runs one trial at a time while a [`monitor`] samples
//! resident memory in the background; the [`orchestrator`] walks models and
//! repeats, publishing [`observer::RunSnapshot`]s; [`session`] ties a run to
//! its configuration and export, and [`matrix`] sweeps context sizes.

pub mod config;
pub mod console;
pub mod executor;
pub mod export;
pub mod matrix;
pub mod monitor;
pub mod observer;
pub mod orchestrator;
pub mod session;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::{BenchmarkConfig, ProtocolTimings, DEFAULT_PROMPT};
pub use executor::{TrialExecutor, TrialOutcome, TrialRequest};
pub use export::{EnvironmentInfo, ExportFormat, Exporter};
pub use matrix::{ContextPlan, ContextRunner, MatrixConfig, MatrixDriver, MatrixOverrides, MatrixReport};
pub use monitor::MemoryMonitor;
pub use observer::{CancellationFlag, NullObserver, RunObserver, RunSnapshot};
pub use orchestrator::{RunOrchestrator, RunOutcome, RunPlan};
pub use session::{BenchSession, OutputTarget, SessionReport};
