//! Seams between the benchmark core and the endpoint.

use crate::api::{GenerateChunk, GenerateRequest};
use crate::client::{ByteStream, OllamaClient};
use crate::command::OllamaCli;
use crate::error::EndpointError;
use llmbench_metrics::ModelDescriptor;
use std::future::Future;

/// HTTP side of the endpoint: listing, preload probe, and generation.
pub trait InferenceBackend: Send + Sync {
    fn list_models(&self) -> impl Future<Output = Result<Vec<ModelDescriptor>, EndpointError>> + Send;

    fn loaded_models(&self) -> impl Future<Output = Result<Vec<String>, EndpointError>> + Send;

    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<GenerateChunk, EndpointError>> + Send;

    fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<ByteStream, EndpointError>> + Send;
}

/// Command side of the endpoint: the resident-model report and unloading.
pub trait ResidencyProbe: Send + Sync {
    fn resident_status(&self) -> impl Future<Output = Result<String, EndpointError>> + Send;

    fn unload(&self, model: &str) -> impl Future<Output = Result<(), EndpointError>> + Send;
}

impl InferenceBackend for OllamaClient {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, EndpointError> {
        OllamaClient::list_models(self).await
    }

    async fn loaded_models(&self) -> Result<Vec<String>, EndpointError> {
        OllamaClient::loaded_models(self).await
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateChunk, EndpointError> {
        OllamaClient::generate(self, request).await
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ByteStream, EndpointError> {
        OllamaClient::generate_stream(self, request).await
    }
}

impl ResidencyProbe for OllamaCli {
    async fn resident_status(&self) -> Result<String, EndpointError> {
        self.ps().await
    }

    async fn unload(&self, model: &str) -> Result<(), EndpointError> {
        self.stop(model).await
    }
}
