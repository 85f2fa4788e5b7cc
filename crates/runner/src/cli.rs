//! CLI wiring for llmbench.

use crate::config::BenchmarkConfig;
use crate::console::{render_results_table, render_statistics, ConsoleObserver};
use crate::matrix::{
    describe_plans, ContextPlan, ContextRunner, MatrixConfig, MatrixDriver, MatrixOverrides,
};
use crate::observer::CancellationFlag;
use crate::session::{BenchSession, OutputTarget, SessionReport};
use anyhow::{bail, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use llmbench_endpoint::{EndpointAddress, OllamaCli};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "llmbench", about = "Benchmark local models served by an Ollama-compatible endpoint")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Benchmark a set of models with one configuration.
    Run(RunArgs),
    /// Sweep context sizes from a matrix file, one partition per size.
    Matrix(MatrixArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Models to benchmark.
    pub models: Vec<String>,
    /// Comma-separated models, added to the positional list.
    #[arg(short = 'm', long = "models", value_delimiter = ',')]
    pub model_list: Vec<String>,
    /// Benchmark every available model matching this case-insensitive
    /// regex; an invalid regex is matched as a plain substring. `all` or `*`
    /// selects everything.
    #[arg(short = 's', long = "select")]
    pub select: Option<String>,
    #[arg(short = 'p', long)]
    pub prompt: Option<String>,
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,
    #[arg(long)]
    pub num_predict: Option<u32>,
    #[arg(long)]
    pub num_ctx: Option<u32>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub repeat_runs: Option<u32>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub label: Option<String>,
    /// Export directory; a bare name gets a timestamped subdirectory.
    #[arg(short = 'o', long = "output", num_args = 0..=1, default_missing_value = "results")]
    pub output: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub csv: bool,
    #[arg(long, default_value_t = false)]
    pub json: bool,
    #[arg(long)]
    pub keep_alive: Option<String>,
    #[arg(long)]
    pub ollama_bin: Option<String>,
    /// YAML configuration file, applied before the environment and flags.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub no_streaming: bool,
    /// Unload each model after every trial so the next one loads cold.
    #[arg(long, default_value_t = false)]
    pub cold_run: bool,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value_t = false)]
    pub show_responses: bool,
}

impl RunArgs {
    /// Overlay explicitly given flags on a loaded configuration.
    pub fn apply(&self, config: &mut BenchmarkConfig) {
        let models: Vec<String> = self
            .models
            .iter()
            .chain(&self.model_list)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if !models.is_empty() {
            config.models = models;
        }
        if let Some(select) = &self.select {
            config.select_pattern = Some(select.clone());
        }
        if let Some(prompt) = &self.prompt {
            config.prompt = Some(prompt.clone());
        }
        if let Some(prompt_file) = &self.prompt_file {
            config.prompt_file = Some(prompt_file.clone());
        }
        if let Some(num_predict) = self.num_predict {
            config.num_predict = num_predict;
        }
        if let Some(num_ctx) = self.num_ctx {
            config.num_ctx = num_ctx;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(repeat_runs) = self.repeat_runs {
            config.repeat_runs = repeat_runs;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(label) = &self.label {
            config.label = Some(label.clone());
        }
        if let Some(output) = &self.output {
            config.output_dir = Some(output.clone());
        }
        config.export_csv |= self.csv;
        config.export_json |= self.json;
        if let Some(keep_alive) = &self.keep_alive {
            config.keep_alive = keep_alive.clone();
        }
        if let Some(ollama_bin) = &self.ollama_bin {
            config.ollama_bin = ollama_bin.clone();
        }
        if self.no_streaming {
            config.enable_streaming = false;
        }
        config.cold_run |= self.cold_run;
        config.debug |= self.debug;
    }
}

#[derive(Args, Debug)]
pub struct MatrixArgs {
    #[arg(long)]
    pub config: PathBuf,
    /// Print the per-context plans and exit.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    #[arg(long)]
    pub num_predict: Option<u32>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub repeat_runs: Option<u32>,
    #[arg(long)]
    pub keep_alive: Option<String>,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value_t = false)]
    pub show_responses: bool,
}

impl MatrixArgs {
    pub fn overrides(&self) -> MatrixOverrides {
        MatrixOverrides {
            num_predict: self.num_predict,
            temperature: self.temperature,
            repeat_runs: self.repeat_runs,
            keep_alive: self.keep_alive.clone(),
        }
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => run_benchmark(args),
        Command::Matrix(args) => run_matrix(args),
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}

/// Raise `cancel` on the first Ctrl-C.
fn watch_interrupt(cancel: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with partial results");
            cancel.cancel();
        }
    });
}

fn print_session(report: &SessionReport, show_statistics: bool) {
    let outcome = &report.outcome;
    if outcome.results.is_empty() {
        println!("No results collected.");
        return;
    }
    println!();
    print!("{}", render_results_table(&outcome.results));
    if show_statistics && !outcome.statistics.is_empty() {
        println!();
        print!("{}", render_statistics(&outcome.statistics));
    }
    if let Some(dir) = &report.output_dir {
        println!();
        println!("Results saved to {}", dir.display());
    }
}

fn run_benchmark(args: RunArgs) -> Result<()> {
    let mut config = BenchmarkConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    init_tracing(config.debug);

    let session = BenchSession::new(config)?;
    let show_statistics = session.config().repeat_runs > 1;
    let runtime = runtime()?;
    runtime.block_on(async {
        let cancel = CancellationFlag::new();
        watch_interrupt(cancel.clone());

        let mut observer = ConsoleObserver::new(args.show_responses);
        let report = session.run(&cancel, &mut observer).await?;
        print_session(&report, show_statistics);

        if report.outcome.interrupted {
            bail!(
                "benchmark interrupted after {} trial(s)",
                report.outcome.results.len()
            );
        }
        Ok(())
    })
}

/// Runs each context as a full session against the live endpoint and prints
/// its tables.
struct ConsoleContextRunner {
    cancel: CancellationFlag,
    observer: ConsoleObserver,
}

impl ContextRunner for ConsoleContextRunner {
    async fn run_context(&mut self, plan: &ContextPlan) -> Result<SessionReport> {
        println!();
        println!("=== {} (num_ctx {}) ===", plan.label, plan.context_size);
        let show_statistics = plan.config.repeat_runs > 1;
        let session = BenchSession::new(plan.config.clone())?
            .with_target(OutputTarget::Partition(plan.partition.clone()));
        let report = session.run(&self.cancel, &mut self.observer).await?;
        print_session(&report, show_statistics);
        Ok(report)
    }
}

fn run_matrix(args: MatrixArgs) -> Result<()> {
    let matrix = MatrixConfig::from_yaml_file(&args.config)?;
    init_tracing(matrix.advanced.debug || args.debug);

    let run_dir = matrix.run_dir(Local::now());
    let plans = matrix.plans(&args.overrides(), &run_dir);
    if args.dry_run {
        print!("{}", describe_plans(&plans));
        return Ok(());
    }
    info!(contexts = plans.len(), run_dir = %run_dir.display(), "starting matrix sweep");

    let runtime = runtime()?;
    runtime.block_on(async {
        let cancel = CancellationFlag::new();
        watch_interrupt(cancel.clone());

        let address = EndpointAddress::new(matrix.connection.host.clone(), matrix.connection.port);
        let probe = Arc::new(OllamaCli::new(matrix.connection.ollama_bin.clone(), &address));
        let driver = MatrixDriver::new(probe, matrix.advanced.stop_between_contexts);
        let mut runner = ConsoleContextRunner {
            cancel: cancel.clone(),
            observer: ConsoleObserver::new(args.show_responses),
        };
        let report = driver.run(&plans, &run_dir, &cancel, &mut runner).await;

        println!();
        if report.produced.is_empty() {
            println!("No files were produced.");
        } else {
            println!("Results in {}", report.run_dir.display());
            for (partition, files) in report.by_partition() {
                println!("  {partition}/");
                for file in files {
                    let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                    println!("    {name}");
                }
            }
        }
        for (context, error) in &report.failed {
            println!("context {context} failed: {error}");
        }

        if report.interrupted {
            bail!("matrix sweep interrupted after {} context(s)", report.completed);
        }
        if report.completed == 0 {
            bail!("no context completed");
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_override_loaded_config() {
        let cli = Cli::try_parse_from([
            "llmbench", "run", "a:1b", "-m", "b:2b,c:3b", "--num-ctx", "8192", "-o", "--json",
            "--no-streaming", "--seed", "7",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = BenchmarkConfig::default();
        args.apply(&mut config);
        assert_eq!(config.models, vec!["a:1b", "b:2b", "c:3b"]);
        assert_eq!(config.num_ctx, 8192);
        assert_eq!(config.output_dir, Some(PathBuf::from("results")));
        assert!(config.export_json && !config.export_csv);
        assert!(!config.enable_streaming);
        assert_eq!(config.seed, Some(7));
        // Untouched flags keep the loaded values.
        assert_eq!(config.num_predict, 256);
    }

    #[test]
    fn matrix_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "llmbench", "matrix", "--config", "m.yaml", "--dry-run", "--repeat-runs", "2",
        ])
        .unwrap();
        let Command::Matrix(args) = cli.command else {
            panic!("expected matrix");
        };
        assert!(args.dry_run);
        assert_eq!(args.overrides().repeat_runs, Some(2));
        assert_eq!(args.overrides().num_predict, None);
    }
}
