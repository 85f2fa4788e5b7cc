//! One benchmark run end to end: plan, execute, export.

use crate::config::{BenchmarkConfig, ProtocolTimings};
use crate::export::{resolve_output_dir, EnvironmentInfo, Exporter};
use crate::observer::{CancellationFlag, RunObserver};
use crate::orchestrator::{RunOrchestrator, RunOutcome, RunPlan};
use anyhow::Result;
use chrono::Local;
use llmbench_endpoint::{InferenceBackend, OllamaCli, OllamaClient, ResidencyProbe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where a session writes its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Follow the configured `output_dir`, adding a timestamped
    /// subdirectory for bare names.
    Configured,
    /// Write exactly here.
    Partition(PathBuf),
}

#[derive(Debug)]
pub struct SessionReport {
    pub outcome: RunOutcome,
    pub output_dir: Option<PathBuf>,
    pub written: Vec<PathBuf>,
}

pub struct BenchSession {
    config: BenchmarkConfig,
    timings: ProtocolTimings,
    target: OutputTarget,
}

impl BenchSession {
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            timings: ProtocolTimings::default(),
            target: OutputTarget::Configured,
        })
    }

    pub fn with_timings(mut self, timings: ProtocolTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_target(mut self, target: OutputTarget) -> Self {
        self.target = target;
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run against the configured HTTP endpoint and command-line tool.
    pub async fn run(&self, cancel: &CancellationFlag, observer: &mut dyn RunObserver) -> Result<SessionReport> {
        let address = self.config.address();
        let backend = Arc::new(OllamaClient::new(&address));
        let probe = Arc::new(OllamaCli::new(self.config.ollama_bin.clone(), &address));
        self.run_with(backend, probe, cancel, observer).await
    }

    pub async fn run_with<B, P>(
        &self,
        backend: Arc<B>,
        probe: Arc<P>,
        cancel: &CancellationFlag,
        observer: &mut dyn RunObserver,
    ) -> Result<SessionReport>
    where
        B: InferenceBackend,
        P: ResidencyProbe + 'static,
    {
        let plan = RunPlan::from_config(&self.config)?;
        info!(
            endpoint = %self.config.address().base_url(),
            num_ctx = plan.options.num_ctx,
            num_predict = plan.options.num_predict,
            temperature = plan.options.temperature,
            repeats = plan.repeats,
            stream = plan.stream,
            "starting benchmark session"
        );

        let mut orchestrator = RunOrchestrator::new(backend, probe, self.timings);
        let outcome = orchestrator.run(&plan, cancel, observer).await;

        let (output_dir, written) = self.export(&outcome)?;
        Ok(SessionReport {
            outcome,
            output_dir,
            written,
        })
    }

    fn export(&self, outcome: &RunOutcome) -> Result<(Option<PathBuf>, Vec<PathBuf>)> {
        let dir = match (&self.target, &self.config.output_dir) {
            (OutputTarget::Partition(dir), _) => dir.clone(),
            (OutputTarget::Configured, Some(requested)) => resolve_output_dir(requested, Local::now()),
            (OutputTarget::Configured, None) => return Ok((None, Vec::new())),
        };
        let formats = match self.config.formats() {
            formats if formats.is_empty() => vec![crate::export::ExportFormat::Csv],
            formats => formats,
        };
        let statistics = (self.config.repeat_runs > 1).then_some(&outcome.statistics);
        let environment = EnvironmentInfo::collect().with_endpoint(self.config.address().base_url());
        let written = Exporter::new(&dir, formats).export(&outcome.results, statistics, &environment)?;
        Ok((Some(dir).filter(|_| !written.is_empty()), written))
    }
}
