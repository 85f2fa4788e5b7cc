//! Context-size sweeps: one full run per context window, each exported to
//! its own partition under a shared timestamped run directory.

use crate::config::BenchmarkConfig;
use crate::export::ExportFormat;
use crate::observer::CancellationFlag;
use crate::session::SessionReport;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use llmbench_endpoint::ResidencyProbe;
use llmbench_metrics::resident_models;
use serde::Deserialize;
use std::fmt::Write as _;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatrixSection {
    pub context_sizes: Vec<u32>,
    pub models: Vec<String>,
    pub model_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatrixBenchmark {
    pub num_predict: u32,
    pub temperature: f32,
    pub repeat_runs: u32,
    pub keep_alive: String,
    pub enable_streaming: bool,
    pub cold_run: bool,
    pub seed: Option<u64>,
}

impl Default for MatrixBenchmark {
    fn default() -> Self {
        Self {
            num_predict: 1024,
            temperature: 0.2,
            repeat_runs: 1,
            keep_alive: "2s".to_string(),
            enable_streaming: true,
            cold_run: false,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub host: String,
    pub port: u16,
    pub ollama_bin: String,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            ollama_bin: "ollama".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub output_dir: PathBuf,
    pub formats: Vec<ExportFormat>,
    /// `{context}` expands to the context size in units of 1024 tokens.
    pub label_template: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./results"),
            formats: vec![ExportFormat::Csv],
            label_template: "ctx-{context}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdvancedSection {
    pub debug: bool,
    pub stop_between_contexts: bool,
}

impl Default for AdvancedSection {
    fn default() -> Self {
        Self {
            debug: false,
            stop_between_contexts: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub matrix: MatrixSection,
    pub benchmark: MatrixBenchmark,
    pub connection: ConnectionSection,
    pub output: OutputSection,
    pub advanced: AdvancedSection,
    pub prompt: Option<String>,
    pub prompt_file: Option<PathBuf>,
}

/// Command-line values that win over the matrix file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixOverrides {
    pub num_predict: Option<u32>,
    pub temperature: Option<f32>,
    pub repeat_runs: Option<u32>,
    pub keep_alive: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextPlan {
    pub context_size: u32,
    pub label: String,
    pub partition: PathBuf,
    pub config: BenchmarkConfig,
}

impl MatrixConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let blob = fs::read_to_string(path)
            .with_context(|| format!("reading matrix config {}", path.display()))?;
        Self::from_yaml_str(&blob).with_context(|| format!("parsing matrix config {}", path.display()))
    }

    pub fn from_yaml_str(blob: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(blob)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.matrix.context_sizes.is_empty() {
            bail!("matrix.context_sizes must list at least one context size");
        }
        if let Some(zero) = self.matrix.context_sizes.iter().find(|c| **c == 0) {
            bail!("matrix.context_sizes contains an invalid size: {zero}");
        }
        Ok(())
    }

    pub fn label_for(&self, context_size: u32) -> String {
        self.output
            .label_template
            .replace("{context}", &(context_size / 1024).to_string())
    }

    pub fn run_dir(&self, now: DateTime<Local>) -> PathBuf {
        self.output.output_dir.join(now.format("%Y%m%d-%H%M%S").to_string())
    }

    /// One fully resolved benchmark configuration per context size. A
    /// `prompt_file` takes precedence over an inline `prompt`.
    pub fn plans(&self, overrides: &MatrixOverrides, run_dir: &Path) -> Vec<ContextPlan> {
        self.matrix
            .context_sizes
            .iter()
            .map(|&context_size| {
                let label = self.label_for(context_size);
                let partition = run_dir.join(format!("ctx-{}k", context_size / 1024));
                let benchmark = &self.benchmark;
                let config = BenchmarkConfig {
                    host: self.connection.host.clone(),
                    port: self.connection.port,
                    ollama_bin: self.connection.ollama_bin.clone(),
                    num_ctx: context_size,
                    num_predict: overrides.num_predict.unwrap_or(benchmark.num_predict),
                    temperature: overrides.temperature.unwrap_or(benchmark.temperature),
                    repeat_runs: overrides.repeat_runs.unwrap_or(benchmark.repeat_runs),
                    keep_alive: overrides
                        .keep_alive
                        .clone()
                        .unwrap_or_else(|| benchmark.keep_alive.clone()),
                    enable_streaming: benchmark.enable_streaming,
                    cold_run: benchmark.cold_run,
                    seed: benchmark.seed,
                    models: self.matrix.models.clone(),
                    select_pattern: self.matrix.model_pattern.clone(),
                    prompt: self.prompt.clone().filter(|_| self.prompt_file.is_none()),
                    prompt_file: self.prompt_file.clone(),
                    label: Some(label.clone()),
                    output_dir: Some(partition.clone()),
                    export_csv: self.output.formats.contains(&ExportFormat::Csv),
                    export_json: self.output.formats.contains(&ExportFormat::Json),
                    debug: self.advanced.debug,
                };
                ContextPlan {
                    context_size,
                    label,
                    partition,
                    config,
                }
            })
            .collect()
    }
}

/// Human-readable listing of what a sweep would do.
pub fn describe_plans(plans: &[ContextPlan]) -> String {
    let mut out = String::new();
    for plan in plans {
        let config = &plan.config;
        let models = match (&config.select_pattern, config.models.is_empty()) {
            (Some(pattern), _) => format!("pattern {pattern}"),
            (None, false) => config.models.join(","),
            (None, true) => "default set".to_string(),
        };
        let _ = writeln!(
            out,
            "context {} ({}K) label={} models={} num_predict={} temperature={} repeat_runs={} keep_alive={} -> {}",
            plan.context_size,
            plan.context_size / 1024,
            plan.label,
            models,
            config.num_predict,
            config.temperature,
            config.repeat_runs,
            config.keep_alive,
            plan.partition.display()
        );
    }
    out
}

/// Runs one context of a sweep.
pub trait ContextRunner {
    fn run_context(&mut self, plan: &ContextPlan) -> impl Future<Output = Result<SessionReport>>;
}

#[derive(Debug, Default)]
pub struct MatrixReport {
    pub run_dir: PathBuf,
    pub produced: Vec<PathBuf>,
    pub completed: usize,
    pub failed: Vec<(u32, String)>,
    pub interrupted: bool,
}

impl MatrixReport {
    /// Produced files grouped by partition directory name, in sweep order.
    pub fn by_partition(&self) -> Vec<(String, Vec<&Path>)> {
        let mut groups: Vec<(String, Vec<&Path>)> = Vec::new();
        for path in &self.produced {
            let name = path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match groups.iter_mut().find(|(group, _)| *group == name) {
                Some((_, files)) => files.push(path),
                None => groups.push((name, vec![path])),
            }
        }
        groups
    }
}

pub struct MatrixDriver<P> {
    probe: Arc<P>,
    stop_between_contexts: bool,
}

impl<P: ResidencyProbe> MatrixDriver<P> {
    pub fn new(probe: Arc<P>, stop_between_contexts: bool) -> Self {
        Self {
            probe,
            stop_between_contexts,
        }
    }

    /// A failed context is logged and the sweep moves on; an interrupted
    /// context ends the sweep.
    pub async fn run<R: ContextRunner>(
        &self,
        plans: &[ContextPlan],
        run_dir: &Path,
        cancel: &CancellationFlag,
        runner: &mut R,
    ) -> MatrixReport {
        let mut report = MatrixReport {
            run_dir: run_dir.to_path_buf(),
            ..MatrixReport::default()
        };

        for (index, plan) in plans.iter().enumerate() {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            info!(
                context = plan.context_size,
                step = index + 1,
                of = plans.len(),
                partition = %plan.partition.display(),
                "matrix context started"
            );
            match runner.run_context(plan).await {
                Ok(session) => {
                    report
                        .produced
                        .extend(session.written.into_iter().filter(|path| path.exists()));
                    report.completed += 1;
                    if session.outcome.interrupted {
                        report.interrupted = true;
                        break;
                    }
                }
                Err(err) => {
                    warn!(context = plan.context_size, error = %err, "matrix context failed");
                    report.failed.push((plan.context_size, format!("{err:#}")));
                }
            }

            if self.stop_between_contexts && index + 1 < plans.len() && !cancel.is_cancelled() {
                self.stop_all().await;
            }
        }

        prune_empty_dirs(run_dir);
        report
    }

    /// Unload every model the status report lists.
    pub async fn stop_all(&self) {
        let report = match self.probe.resident_status().await {
            Ok(report) => report,
            Err(err) => {
                debug!(error = %err, "could not list resident models");
                return;
            }
        };
        for model in resident_models(&report) {
            if let Err(err) = self.probe.unload(&model).await {
                debug!(model = %model, error = %err, "unload failed");
            }
        }
    }
}

/// Remove empty partition directories, then the run directory if nothing is
/// left in it.
pub fn prune_empty_dirs(run_dir: &Path) {
    let Ok(entries) = fs::read_dir(run_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && is_empty_dir(&path) {
            let _ = fs::remove_dir(&path);
        }
    }
    if is_empty_dir(run_dir) && fs::remove_dir(run_dir).is_ok() {
        info!(path = %run_dir.display(), "removed empty results directory");
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map_or(false, |mut entries| entries.next().is_none())
}
