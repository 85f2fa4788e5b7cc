//! Cross-trial aggregation.

use crate::result::TrialResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TokensPerSecond,
    TotalSeconds,
    EvalSeconds,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::TokensPerSecond, Metric::TotalSeconds, Metric::EvalSeconds];

    pub fn name(self) -> &'static str {
        match self {
            Metric::TokensPerSecond => "tokens_per_second",
            Metric::TotalSeconds => "total_seconds",
            Metric::EvalSeconds => "eval_seconds",
        }
    }

    pub fn extract(self, result: &TrialResult) -> f64 {
        match self {
            Metric::TokensPerSecond => result.tokens_per_second(),
            Metric::TotalSeconds => result.total_seconds(),
            Metric::EvalSeconds => result.eval_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; absent for a single observation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let stdev = (count > 1).then(|| {
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        });
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count,
            mean,
            stdev,
            min,
            max,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatistics {
    pub model: String,
    pub samples: usize,
    pub metrics: BTreeMap<Metric, MetricSummary>,
}

impl ModelStatistics {
    pub fn summary(&self, metric: Metric) -> Option<&MetricSummary> {
        self.metrics.get(&metric)
    }
}

/// Per-model summaries over the successful trials of a run, in the order each
/// model first produced a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub models: Vec<ModelStatistics>,
}

impl RunStatistics {
    pub fn from_results(results: &[TrialResult]) -> Self {
        let mut order: Vec<&str> = Vec::new();
        let mut grouped: BTreeMap<&str, Vec<&TrialResult>> = BTreeMap::new();
        for result in results.iter().filter(|r| !r.is_error()) {
            let bucket = grouped.entry(result.model.as_str()).or_default();
            if bucket.is_empty() {
                order.push(result.model.as_str());
            }
            bucket.push(result);
        }

        let models = order
            .into_iter()
            .filter_map(|model| {
                let trials = grouped.get(model)?;
                let metrics = Metric::ALL
                    .iter()
                    .filter_map(|metric| {
                        let values: Vec<f64> = trials.iter().map(|t| metric.extract(t)).collect();
                        MetricSummary::from_values(&values).map(|summary| (*metric, summary))
                    })
                    .collect();
                Some(ModelStatistics {
                    model: model.to_string(),
                    samples: trials.len(),
                    metrics,
                })
            })
            .collect();

        Self { models }
    }

    pub fn get(&self, model: &str) -> Option<&ModelStatistics> {
        self.models.iter().find(|m| m.model == model)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TrialMetrics;

    fn trial(model: &str, tokens: u64, eval_s: u64) -> TrialResult {
        let metrics = TrialMetrics {
            tokens,
            eval_duration_ns: eval_s * 1_000_000_000,
            total_duration_ns: (eval_s + 1) * 1_000_000_000,
            ..TrialMetrics::default()
        };
        TrialResult::completed(model, false, metrics, 4096, "text")
    }

    #[test]
    fn summary_uses_sample_deviation() {
        let summary = MetricSummary::from_values(&[10.0, 20.0, 30.0]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.mean, 20.0);
        assert_eq!(summary.stdev, Some(10.0));
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 30.0);
        assert!(MetricSummary::from_values(&[]).is_none());
    }

    #[test]
    fn single_observation_has_no_deviation() {
        let summary = MetricSummary::from_values(&[42.0]).unwrap();
        assert_eq!(summary.stdev, None);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("stdev"));
    }

    #[test]
    fn errors_are_excluded_and_first_seen_order_kept() {
        let results = vec![
            trial("zeta:1b", 100, 2),
            TrialResult::failed("alpha:1b", false, "boom", 4096),
            trial("beta:2b", 60, 2),
            trial("zeta:1b", 300, 2),
        ];
        let stats = RunStatistics::from_results(&results);
        let names: Vec<&str> = stats.models.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(names, vec!["zeta:1b", "beta:2b"]);

        let zeta = stats.get("zeta:1b").unwrap();
        assert_eq!(zeta.samples, 2);
        let tps = zeta.summary(Metric::TokensPerSecond).unwrap();
        assert_eq!(tps.mean, 100.0);
        assert_eq!(tps.min, 50.0);
        assert_eq!(tps.max, 150.0);
        assert_eq!(zeta.summary(Metric::TotalSeconds).unwrap().mean, 3.0);
        assert!(stats.get("alpha:1b").is_none());
    }
}
