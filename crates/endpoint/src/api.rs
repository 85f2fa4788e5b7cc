//! Wire types for the Ollama-compatible HTTP API.

use llmbench_metrics::{ModelDescriptor, TrialMetrics};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: u32,
    pub num_ctx: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            num_predict: 256,
            num_ctx: 4096,
            seed: None,
        }
    }
}

/// Body of `POST /api/generate`. Thinking output is always disabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerateOptions,
    pub think: bool,
    pub keep_alive: String,
}

impl GenerateRequest {
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
        options: GenerateOptions,
        keep_alive: impl Into<String>,
        stream: bool,
    ) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream,
            options,
            think: false,
            keep_alive: keep_alive.into(),
        }
    }
}

/// One newline-delimited unit of a streamed generation, or the whole body of
/// a batch generation. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default)]
    pub context_length: Option<u32>,
    /// In-band failure reported by the endpoint in place of output.
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateChunk {
    /// Metrics carried by this unit; `None` when it carries none at all.
    pub fn metrics(&self) -> Option<TrialMetrics> {
        let present = [
            self.eval_count,
            self.load_duration,
            self.eval_duration,
            self.total_duration,
            self.prompt_eval_duration,
        ]
        .iter()
        .any(Option::is_some);
        present.then(|| TrialMetrics {
            tokens: self.eval_count.unwrap_or(0),
            load_duration_ns: self.load_duration.unwrap_or(0),
            eval_duration_ns: self.eval_duration.unwrap_or(0),
            total_duration_ns: self.total_duration.unwrap_or(0),
            prompt_eval_duration_ns: self.prompt_eval_duration.unwrap_or(0),
        })
    }

    pub fn text(&self) -> &str {
        self.response.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: String,
}

impl From<TagEntry> for ModelDescriptor {
    fn from(entry: TagEntry) -> Self {
        ModelDescriptor {
            name: entry.name,
            size_bytes: entry.size,
            digest: entry.digest,
            modified_at: entry.modified_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PsResponse {
    #[serde(default)]
    pub models: Vec<PsEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PsEntry {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl PsResponse {
    pub fn names(self) -> Vec<String> {
        self.models.into_iter().map(|m| m.name).collect()
    }
}
