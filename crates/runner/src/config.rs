//! Benchmark configuration and its layering.
//!
//! Values are resolved as defaults, then a YAML file, then the environment,
//! then command-line flags; each layer overrides the one before it.

use crate::export::ExportFormat;
use anyhow::{bail, Context, Result};
use llmbench_catalog::ModelSelector;
use llmbench_endpoint::{EndpointAddress, GenerateOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PROMPT: &str = "Task: Write one neutral, self-contained paragraph explaining how to benchmark small local language models fairly across devices.

Requirements:
- Output exactly five sentences.
- Each sentence must contain 14-16 words.
- Use plain English; avoid brand names, URLs, or platform-specific details.
- Do not include lists, headings, code, markdown, apologies, or meta commentary.
- Provide only the paragraph content; no title, no introduction, no closing.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub host: String,
    pub port: u16,
    pub num_predict: u32,
    pub num_ctx: u32,
    pub temperature: f32,
    pub seed: Option<u64>,
    pub prompt: Option<String>,
    pub prompt_file: Option<PathBuf>,
    pub models: Vec<String>,
    pub select_pattern: Option<String>,
    pub repeat_runs: u32,
    pub keep_alive: String,
    pub ollama_bin: String,
    pub enable_streaming: bool,
    pub cold_run: bool,
    pub label: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub export_csv: bool,
    pub export_json: bool,
    pub debug: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            num_predict: 256,
            num_ctx: 4096,
            temperature: 0.2,
            seed: None,
            prompt: None,
            prompt_file: None,
            models: Vec::new(),
            select_pattern: None,
            repeat_runs: 1,
            keep_alive: "2s".to_string(),
            ollama_bin: "ollama".to_string(),
            enable_streaming: true,
            cold_run: false,
            label: None,
            output_dir: None,
            export_csv: false,
            export_json: false,
            debug: false,
        }
    }
}

impl BenchmarkConfig {
    /// Defaults, overlaid with `path` when given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Unknown keys are ignored; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let blob = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&blob).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml_str(blob: &str) -> Result<Self> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(blob)?)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay `OLLAMA_*` variables read through `lookup`. Values that do not
    /// parse are skipped.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.host = host;
        }
        if let Some(port) = parsed(&lookup, "OLLAMA_PORT") {
            self.port = port;
        }
        if let Some(num_predict) = parsed(&lookup, "OLLAMA_NUM_PREDICT") {
            self.num_predict = num_predict;
        }
        if let Some(num_ctx) = parsed(&lookup, "OLLAMA_NUM_CTX") {
            self.num_ctx = num_ctx;
        }
        if let Some(temperature) = parsed(&lookup, "OLLAMA_TEMPERATURE") {
            self.temperature = temperature;
        }
        if let Some(keep_alive) = lookup("OLLAMA_KEEP_ALIVE") {
            self.keep_alive = keep_alive;
        }
        if let Some(debug) = lookup("OLLAMA_DEBUG") {
            self.debug = matches!(debug.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }
    }

    /// `prompt`, else the contents of `prompt_file`, else [`DEFAULT_PROMPT`].
    pub fn resolve_prompt(&self) -> Result<String> {
        if let Some(prompt) = &self.prompt {
            return Ok(prompt.clone());
        }
        if let Some(path) = &self.prompt_file {
            if !path.exists() {
                bail!("prompt file {} does not exist", path.display());
            }
            return fs::read_to_string(path)
                .with_context(|| format!("reading prompt file {}", path.display()));
        }
        Ok(DEFAULT_PROMPT.to_string())
    }

    pub fn selector(&self) -> ModelSelector {
        ModelSelector::from_args(self.select_pattern.as_deref(), &self.models)
    }

    pub fn address(&self) -> EndpointAddress {
        EndpointAddress::new(self.host.clone(), self.port)
    }

    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            num_predict: self.num_predict,
            num_ctx: self.num_ctx,
            seed: self.seed,
        }
    }

    /// Requested export formats. An output directory with no explicit format
    /// implies CSV; without an output directory nothing is exported.
    pub fn formats(&self) -> Vec<ExportFormat> {
        if self.output_dir.is_none() {
            return Vec::new();
        }
        let mut formats = Vec::new();
        if self.export_csv {
            formats.push(ExportFormat::Csv);
        }
        if self.export_json {
            formats.push(ExportFormat::Json);
        }
        if formats.is_empty() {
            formats.push(ExportFormat::Csv);
        }
        formats
    }

    pub fn validate(&self) -> Result<()> {
        if self.repeat_runs == 0 {
            bail!("repeat_runs must be at least 1");
        }
        if self.num_ctx == 0 {
            bail!("num_ctx must be positive");
        }
        if self.keep_alive.trim().is_empty() {
            bail!("keep_alive must not be empty");
        }
        debug!(
            host = %self.host,
            port = self.port,
            num_ctx = self.num_ctx,
            num_predict = self.num_predict,
            repeat_runs = self.repeat_runs,
            "configuration validated"
        );
        Ok(())
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|value| value.trim().parse().ok())
}

/// Fixed delays of the measurement protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTimings {
    /// Pause after an unload and before the final memory sample.
    pub settle: Duration,
    pub sample_interval: Duration,
    pub sampler_join: Duration,
    pub display_throttle: Duration,
    /// Pause after recording a trial, before the next one starts.
    pub result_pause: Duration,
    pub generate_timeout: Duration,
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            sample_interval: Duration::from_millis(500),
            sampler_join: Duration::from_secs(1),
            display_throttle: Duration::from_millis(100),
            result_pause: Duration::from_secs(1),
            generate_timeout: llmbench_endpoint::client::GENERATE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_endpoint_conventions() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.address().base_url(), "http://localhost:11434");
        assert_eq!(config.keep_alive, "2s");
        assert!(config.enable_streaming);
        assert!(!config.cold_run);
        assert_eq!(config.selector(), ModelSelector::Default);
        assert!(config.formats().is_empty());
    }

    #[test]
    fn environment_overrides_yaml_and_skips_bad_values() {
        let mut config = BenchmarkConfig::from_yaml_str(
            "num_ctx: 8192\nport: 9999\nnum_predict: 64\nunknown_key: 1\nexport_parquet: true\n",
        )
        .unwrap();
        assert_eq!(config.num_ctx, 8192);

        config.apply_env_from(env(&[
            ("OLLAMA_NUM_CTX", "16384"),
            ("OLLAMA_PORT", "not-a-port"),
            ("OLLAMA_DEBUG", "Yes"),
            ("OLLAMA_TEMPERATURE", "0.7"),
        ]));
        assert_eq!(config.num_ctx, 16384);
        assert_eq!(config.port, 9999);
        assert_eq!(config.num_predict, 64);
        assert_eq!(config.temperature, 0.7);
        assert!(config.debug);
    }

    #[test]
    fn prompt_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("prompt.md");
        fs::write(&file, "from file").unwrap();

        let mut config = BenchmarkConfig {
            prompt_file: Some(file),
            ..BenchmarkConfig::default()
        };
        assert_eq!(config.resolve_prompt().unwrap(), "from file");

        config.prompt = Some("inline".into());
        assert_eq!(config.resolve_prompt().unwrap(), "inline");

        assert_eq!(BenchmarkConfig::default().resolve_prompt().unwrap(), DEFAULT_PROMPT);

        let missing = BenchmarkConfig {
            prompt_file: Some(dir.path().join("absent.md")),
            ..BenchmarkConfig::default()
        };
        assert!(missing.resolve_prompt().is_err());
    }

    #[test]
    fn output_dir_implies_csv() {
        let mut config = BenchmarkConfig {
            output_dir: Some(PathBuf::from("results")),
            ..BenchmarkConfig::default()
        };
        assert_eq!(config.formats(), vec![ExportFormat::Csv]);
        config.export_json = true;
        assert_eq!(config.formats(), vec![ExportFormat::Json]);
    }

    #[test]
    fn zero_repeats_are_rejected() {
        let config = BenchmarkConfig {
            repeat_runs: 0,
            ..BenchmarkConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(BenchmarkConfig::default().validate().is_ok());
    }
}
