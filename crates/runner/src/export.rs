//! Writing a run's results to disk.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use llmbench_metrics::{RunStatistics, TrialRecord, TrialResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

pub const CSV_FILE: &str = "benchmark.csv";
pub const JSON_FILE: &str = "benchmark.json";
pub const SYSTEM_INFO_FILE: &str = "system_info.json";
pub const STATISTICS_FILE: &str = "statistics.json";

/// Runtime variables that change how the endpoint schedules models.
const RECORDED_ENV_VARS: [&str; 6] = [
    "OLLAMA_NUM_PARALLEL",
    "OLLAMA_MAX_LOADED_MODELS",
    "OLLAMA_FLASH_ATTENTION",
    "OLLAMA_KV_CACHE_TYPE",
    "OLLAMA_KEEP_ALIVE",
    "CUDA_VISIBLE_DEVICES",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => bail!("unsupported export format `{other}` (expected csv or json)"),
        }
    }
}

/// Host facts stored next to every exported partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub os_family: String,
    pub logical_cpus: usize,
    pub tool_version: String,
    pub endpoint: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub collected_at: String,
}

impl EnvironmentInfo {
    pub fn collect() -> Self {
        Self::collect_from(|key| std::env::var(key).ok())
    }

    pub fn collect_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = RECORDED_ENV_VARS
            .iter()
            .filter_map(|key| {
                lookup(key)
                    .filter(|value| !value.is_empty())
                    .map(|value| (key.to_string(), value))
            })
            .collect();
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            os_family: std::env::consts::FAMILY.to_string(),
            logical_cpus: std::thread::available_parallelism().map_or(0, |n| n.get()),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            endpoint: None,
            environment,
            collected_at: Local::now().to_rfc3339(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// A bare directory name, or any path whose last component is `results`,
/// gets a timestamped subdirectory; other paths are used as given.
pub fn resolve_output_dir(requested: &Path, now: DateTime<Local>) -> PathBuf {
    let bare = requested
        .parent()
        .map_or(true, |parent| parent.as_os_str().is_empty() || parent == Path::new("."));
    let named_results = requested.file_name().map_or(false, |name| name == "results");
    if bare || named_results {
        requested.join(now.format("%Y%m%d-%H%M%S").to_string())
    } else {
        requested.to_path_buf()
    }
}

#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
    formats: Vec<ExportFormat>,
}

impl Exporter {
    pub fn new(dir: impl Into<PathBuf>, formats: Vec<ExportFormat>) -> Self {
        Self {
            dir: dir.into(),
            formats,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one partition. Nothing is written, not even the directory, when
    /// there are no results. Returns the files produced.
    pub fn export(
        &self,
        results: &[TrialResult],
        statistics: Option<&RunStatistics>,
        environment: &EnvironmentInfo,
    ) -> Result<Vec<PathBuf>> {
        if results.is_empty() || self.formats.is_empty() {
            return Ok(Vec::new());
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating output directory {}", self.dir.display()))?;

        let records: Vec<TrialRecord> = results.iter().map(TrialResult::to_record).collect();
        let mut written = Vec::new();

        for format in &self.formats {
            let path = match format {
                ExportFormat::Csv => self.write_csv(&records)?,
                ExportFormat::Json => self.write_json(JSON_FILE, &records)?,
            };
            written.push(path);
        }

        if let Some(statistics) = statistics.filter(|s| !s.is_empty()) {
            written.push(self.write_json(STATISTICS_FILE, statistics)?);
        }
        written.push(self.write_json(SYSTEM_INFO_FILE, environment)?);

        for path in &written {
            info!(path = %path.display(), "results written");
        }
        Ok(written)
    }

    fn write_csv(&self, records: &[TrialRecord]) -> Result<PathBuf> {
        let path = self.dir.join(CSV_FILE);
        let mut writer =
            csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(path)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let blob = serde_json::to_vec_pretty(value)?;
        fs::write(&path, blob).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use llmbench_metrics::TrialMetrics;

    fn results() -> Vec<TrialResult> {
        let metrics = TrialMetrics {
            tokens: 50,
            eval_duration_ns: 1_000_000_000,
            total_duration_ns: 1_500_000_000,
            ..TrialMetrics::default()
        };
        vec![
            TrialResult::completed("a:1b", false, metrics, 4096, "hello"),
            TrialResult::failed("b:1b", false, "connection refused", 4096),
        ]
    }

    #[test]
    fn bare_names_get_a_timestamped_subdirectory() {
        let now = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            resolve_output_dir(Path::new("out"), now),
            PathBuf::from("out/20250304-050607")
        );
        assert_eq!(
            resolve_output_dir(Path::new("runs/results"), now),
            PathBuf::from("runs/results/20250304-050607")
        );
        assert_eq!(
            resolve_output_dir(Path::new("runs/baseline"), now),
            PathBuf::from("runs/baseline")
        );
    }

    #[test]
    fn exports_requested_formats_and_companions() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("partition");
        let exporter = Exporter::new(&target, vec![ExportFormat::Csv, ExportFormat::Json]);
        let results = results();
        let statistics = RunStatistics::from_results(&results);
        let written = exporter
            .export(&results, Some(&statistics), &EnvironmentInfo::collect())
            .unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![CSV_FILE, JSON_FILE, STATISTICS_FILE, SYSTEM_INFO_FILE]);

        let mut reader = csv::Reader::from_path(target.join(CSV_FILE)).unwrap();
        let rows: Vec<TrialRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tokens_per_second, 50.0);
        assert_eq!(rows[1].error.as_deref(), Some("connection refused"));

        let json: Vec<TrialRecord> =
            serde_json::from_str(&fs::read_to_string(target.join(JSON_FILE)).unwrap()).unwrap();
        assert_eq!(json, rows);
    }

    #[test]
    fn nothing_is_written_without_results() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("empty");
        let exporter = Exporter::new(&target, vec![ExportFormat::Csv]);
        let written = exporter.export(&[], None, &EnvironmentInfo::collect()).unwrap();
        assert!(written.is_empty());
        assert!(!target.exists());
    }

    #[test]
    fn failed_companion_write_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blocked");
        fs::create_dir_all(target.join(SYSTEM_INFO_FILE)).unwrap();
        let exporter = Exporter::new(&target, vec![ExportFormat::Csv]);
        let err = exporter
            .export(&results(), None, &EnvironmentInfo::collect())
            .unwrap_err();
        assert!(format!("{err:#}").contains(SYSTEM_INFO_FILE));
    }

    #[test]
    fn environment_records_only_set_variables() {
        let info = EnvironmentInfo::collect_from(|key| match key {
            "OLLAMA_FLASH_ATTENTION" => Some("1".to_string()),
            "CUDA_VISIBLE_DEVICES" => Some(String::new()),
            _ => None,
        });
        assert_eq!(info.environment.len(), 1);
        assert_eq!(info.environment["OLLAMA_FLASH_ATTENTION"], "1");
        assert!(info.logical_cpus > 0);
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("parquet".parse::<ExportFormat>().is_err());
    }
}
