//! Trial results and their derived rates.

use crate::memory::MemorySample;
use crate::model::ModelDescriptor;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

const NANOS_PER_SECOND: f64 = 1.0e9;

/// Counters and durations reported by the endpoint in its final unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub tokens: u64,
    pub load_duration_ns: u64,
    pub eval_duration_ns: u64,
    pub total_duration_ns: u64,
    pub prompt_eval_duration_ns: u64,
}

/// Outcome of one trial. Built once by the executor and never mutated after
/// it is appended to a run's result sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub model: String,
    pub timestamp: DateTime<Local>,
    pub preloaded: bool,
    pub metrics: TrialMetrics,
    pub context_length: u32,
    pub error: Option<String>,
    pub response_text: Option<String>,
    pub memory: Option<MemorySample>,
    pub descriptor: Option<ModelDescriptor>,
    pub label: Option<String>,
}

impl TrialResult {
    pub fn completed(
        model: impl Into<String>,
        preloaded: bool,
        metrics: TrialMetrics,
        context_length: u32,
        response_text: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            timestamp: Local::now(),
            preloaded,
            metrics,
            context_length,
            error: None,
            response_text: Some(response_text.into()),
            memory: None,
            descriptor: None,
            label: None,
        }
    }

    /// A failed trial keeps no text and no metrics.
    pub fn failed(
        model: impl Into<String>,
        preloaded: bool,
        error: impl Into<String>,
        context_length: u32,
    ) -> Self {
        Self {
            model: model.into(),
            timestamp: Local::now(),
            preloaded,
            metrics: TrialMetrics::default(),
            context_length,
            error: Some(error.into()),
            response_text: None,
            memory: None,
            descriptor: None,
            label: None,
        }
    }

    pub fn with_memory(mut self, memory: Option<MemorySample>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_descriptor(mut self, descriptor: Option<ModelDescriptor>) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn tokens(&self) -> u64 {
        self.metrics.tokens
    }

    pub fn load_seconds(&self) -> f64 {
        nanos_to_seconds(self.metrics.load_duration_ns)
    }

    pub fn eval_seconds(&self) -> f64 {
        nanos_to_seconds(self.metrics.eval_duration_ns)
    }

    pub fn total_seconds(&self) -> f64 {
        nanos_to_seconds(self.metrics.total_duration_ns)
    }

    pub fn prompt_eval_seconds(&self) -> f64 {
        nanos_to_seconds(self.metrics.prompt_eval_duration_ns)
    }

    /// Generation rate; zero when no evaluation time was reported.
    pub fn tokens_per_second(&self) -> f64 {
        let eval = self.eval_seconds();
        if eval > 0.0 {
            self.metrics.tokens as f64 / eval
        } else {
            0.0
        }
    }

    pub fn chars_per_second(&self) -> f64 {
        let eval = self.eval_seconds();
        match self.response_chars() {
            Some(chars) if eval > 0.0 => chars as f64 / eval,
            _ => 0.0,
        }
    }

    pub fn chars_per_token(&self) -> f64 {
        match self.response_chars() {
            Some(chars) if self.metrics.tokens > 0 => chars as f64 / self.metrics.tokens as f64,
            _ => 0.0,
        }
    }

    /// Flatten into the exported row shape.
    pub fn to_record(&self) -> TrialRecord {
        TrialRecord {
            model: self.model.clone(),
            timestamp: self.timestamp.to_rfc3339(),
            preloaded: self.preloaded,
            tokens: self.metrics.tokens,
            load_s: round_to(self.load_seconds(), 3),
            eval_s: round_to(self.eval_seconds(), 3),
            total_s: round_to(self.total_seconds(), 3),
            prompt_eval_s: round_to(self.prompt_eval_seconds(), 3),
            tokens_per_second: round_to(self.tokens_per_second(), 1),
            chars_per_token: round_to(self.chars_per_token(), 2),
            chars_per_second: round_to(self.chars_per_second(), 1),
            context_length: self.context_length,
            label: self.label.clone(),
            error: self.error.clone(),
            disk_gb: self.descriptor.as_ref().map(ModelDescriptor::disk_gb),
            cpu_percent: self.memory.as_ref().map(|m| m.ram_percent),
            gpu_percent: self.memory.as_ref().map(|m| m.vram_percent),
            memory_gb: self.memory.as_ref().map(|m| m.size_gb),
            processor: self.memory.as_ref().map(|m| m.processor.clone()),
        }
    }

    fn response_chars(&self) -> Option<usize> {
        self.response_text
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(|text| text.chars().count())
    }
}

/// Normalized flat record, one per trial, shared by every export format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub model: String,
    pub timestamp: String,
    pub preloaded: bool,
    pub tokens: u64,
    pub load_s: f64,
    pub eval_s: f64,
    pub total_s: f64,
    pub prompt_eval_s: f64,
    pub tokens_per_second: f64,
    pub chars_per_token: f64,
    pub chars_per_second: f64,
    pub context_length: u32,
    pub label: Option<String>,
    pub error: Option<String>,
    pub disk_gb: Option<f64>,
    pub cpu_percent: Option<u32>,
    pub gpu_percent: Option<u32>,
    pub memory_gb: Option<f64>,
    pub processor: Option<String>,
}

fn nanos_to_seconds(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SECOND
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(tokens: u64, eval_ns: u64) -> TrialMetrics {
        TrialMetrics {
            tokens,
            load_duration_ns: 250_000_000,
            eval_duration_ns: eval_ns,
            total_duration_ns: eval_ns + 500_000_000,
            prompt_eval_duration_ns: 100_000_000,
        }
    }

    #[test]
    fn rates_follow_eval_duration() {
        let result = TrialResult::completed("m:1b", false, metrics(100, 2_000_000_000), 4096, "x".repeat(400));
        assert_eq!(result.eval_seconds(), 2.0);
        assert_eq!(result.tokens_per_second(), 50.0);
        assert_eq!(result.chars_per_second(), 200.0);
        assert_eq!(result.chars_per_token(), 4.0);
        assert_eq!(result.load_seconds(), 0.25);
        assert_eq!(result.total_seconds(), 2.5);
    }

    #[test]
    fn zero_eval_duration_yields_zero_rates() {
        let result = TrialResult::completed("m:1b", false, metrics(100, 0), 4096, "hello");
        assert_eq!(result.eval_seconds(), 0.0);
        assert_eq!(result.tokens_per_second(), 0.0);
        assert_eq!(result.chars_per_second(), 0.0);
        assert_eq!(result.chars_per_token(), 0.05);

        let failed = TrialResult::failed("m:1b", true, "connection refused", 4096);
        assert!(failed.is_error());
        assert_eq!(failed.tokens_per_second(), 0.0);
        assert_eq!(failed.chars_per_token(), 0.0);
        assert!(failed.response_text.is_none());
    }

    #[test]
    fn chars_are_counted_not_bytes() {
        let result = TrialResult::completed("m:1b", false, metrics(2, 1_000_000_000), 2048, "héé");
        assert_eq!(result.chars_per_second(), 3.0);
        assert_eq!(result.chars_per_token(), 1.5);
    }

    #[test]
    fn record_is_rounded_and_flattened() {
        let memory = MemorySample::from_tokens(&["m:1b", "6.5", "GB", "100%", "GPU"]);
        let result = TrialResult::completed("m:1b", true, metrics(123, 3_000_000_000), 8192, "abc")
            .with_memory(Some(memory))
            .with_descriptor(Some(ModelDescriptor::new("m:1b", 1024 * 1024 * 1024)))
            .with_label(Some("baseline".into()));

        let record = result.to_record();
        assert_eq!(record.tokens_per_second, 41.0);
        assert_eq!(record.eval_s, 3.0);
        assert_eq!(record.chars_per_token, 0.02);
        assert_eq!(record.gpu_percent, Some(100));
        assert_eq!(record.cpu_percent, Some(0));
        assert_eq!(record.disk_gb, Some(1.0));
        assert_eq!(record.label.as_deref(), Some("baseline"));

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"processor\":\"100% GPU\""));
    }
}
