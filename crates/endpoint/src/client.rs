//! HTTP client for the serving endpoint.

use crate::api::{GenerateChunk, GenerateRequest, PsResponse, TagsResponse};
use crate::error::EndpointError;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use llmbench_metrics::ModelDescriptor;
use std::time::Duration;
use tracing::debug;

pub const LIST_TIMEOUT: Duration = Duration::from_secs(5);
pub const PRELOAD_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);

pub type ByteStream = BoxStream<'static, Result<Bytes, EndpointError>>;

/// Host and port of the endpoint, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    pub host: String,
    pub port: u16,
}

impl EndpointAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();
        Self { host, port }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `host:port`, the form the command-line tool expects in `OLLAMA_HOST`.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for EndpointAddress {
    fn default() -> Self {
        Self::new("localhost", 11434)
    }
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(address: &EndpointAddress) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: address.base_url(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>, EndpointError> {
        let url = self.url("/api/tags");
        let tags: TagsResponse = self.get_json(&url, LIST_TIMEOUT).await?;
        debug!(count = tags.models.len(), "listed models");
        Ok(tags.models.into_iter().map(ModelDescriptor::from).collect())
    }

    pub async fn loaded_models(&self) -> Result<Vec<String>, EndpointError> {
        let url = self.url("/api/ps");
        let ps: PsResponse = self.get_json(&url, PRELOAD_PROBE_TIMEOUT).await?;
        Ok(ps.names())
    }

    /// Non-streaming generation; the whole body is one JSON document.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateChunk, EndpointError> {
        let url = self.url("/api/generate");
        let response = self.post(&url, request).await?;
        response
            .json::<GenerateChunk>()
            .await
            .map_err(|e| EndpointError::from_reqwest(&url, GENERATE_TIMEOUT, e))
    }

    /// Streaming generation. The returned stream yields raw body chunks;
    /// unit framing is left to the caller.
    pub async fn generate_stream(&self, request: &GenerateRequest) -> Result<ByteStream, EndpointError> {
        let url = self.url("/api/generate");
        let response = self.post(&url, request).await?;
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| EndpointError::from_reqwest(&url, GENERATE_TIMEOUT, e)));
        Ok(stream.boxed())
    }

    async fn post(&self, url: &str, request: &GenerateRequest) -> Result<reqwest::Response, EndpointError> {
        let response = self
            .http
            .post(url)
            .timeout(GENERATE_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| EndpointError::from_reqwest(url, GENERATE_TIMEOUT, e))?;
        ensure_success(url, response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, EndpointError> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| EndpointError::from_reqwest(url, timeout, e))?;
        let response = ensure_success(url, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| EndpointError::from_reqwest(url, timeout, e))
    }
}

async fn ensure_success(url: &str, response: reqwest::Response) -> Result<reqwest::Response, EndpointError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EndpointError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_strips_scheme_and_formats_both_forms() {
        let address = EndpointAddress::new("http://gpu-box/", 8080);
        assert_eq!(address.host, "gpu-box");
        assert_eq!(address.base_url(), "http://gpu-box:8080");
        assert_eq!(address.host_port(), "gpu-box:8080");
        assert_eq!(EndpointAddress::default().base_url(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        // Port 9 (discard) on loopback is closed on any sane test host.
        let client = OllamaClient::new(&EndpointAddress::new("127.0.0.1", 9));
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(
            err,
            EndpointError::Transport { .. } | EndpointError::Timeout { .. }
        ));
    }
}
