use crate::selector::ModelSelector;
use crate::version::sort_versioned;
use llmbench_endpoint::InferenceBackend;
use llmbench_metrics::ModelDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Lists the endpoint's models once per run and caches their descriptors by
/// name.
pub struct ModelCatalog<B> {
    backend: Arc<B>,
    descriptors: HashMap<String, ModelDescriptor>,
}

impl<B: InferenceBackend> ModelCatalog<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            descriptors: HashMap::new(),
        }
    }

    /// Never fails: an unreachable endpoint yields an empty listing.
    pub async fn list_available(&mut self) -> Vec<ModelDescriptor> {
        match self.backend.list_models().await {
            Ok(models) => {
                self.descriptors = models.iter().map(|m| (m.name.clone(), m.clone())).collect();
                models
            }
            Err(err) => {
                warn!(error = %err, "could not list models");
                Vec::new()
            }
        }
    }

    /// Resolve `selector` against the current listing, version-sorted.
    pub async fn select(&mut self, selector: &ModelSelector) -> Vec<String> {
        let available: Vec<String> = self
            .list_available()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        let selected = Self::order(selector.resolve(&available));
        info!(available = available.len(), selected = selected.len(), "selected models");
        selected
    }

    pub fn descriptor(&self, name: &str) -> Option<&ModelDescriptor> {
        self.descriptors.get(name)
    }

    pub fn order(mut models: Vec<String>) -> Vec<String> {
        sort_versioned(&mut models);
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use futures_util::StreamExt;
    use llmbench_endpoint::{ByteStream, EndpointError, GenerateChunk, GenerateRequest};

    struct Listing(Option<Vec<&'static str>>);

    impl InferenceBackend for Listing {
        async fn list_models(&self) -> Result<Vec<ModelDescriptor>, EndpointError> {
            match &self.0 {
                Some(names) => Ok(names.iter().map(|n| ModelDescriptor::new(*n, 1 << 30)).collect()),
                None => Err(EndpointError::Transport {
                    url: "http://localhost:11434/api/tags".into(),
                    reason: "connection refused".into(),
                }),
            }
        }

        async fn loaded_models(&self) -> Result<Vec<String>, EndpointError> {
            Ok(Vec::new())
        }

        async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateChunk, EndpointError> {
            Err(EndpointError::MissingMetrics)
        }

        async fn generate_stream(&self, _request: &GenerateRequest) -> Result<ByteStream, EndpointError> {
            Ok(stream::iter(vec![Ok(bytes::Bytes::new())]).boxed())
        }
    }

    #[tokio::test]
    async fn selection_is_version_sorted_and_cached() {
        let backend = Arc::new(Listing(Some(vec!["m:10b", "m:2b", "m:9b", "other:1b"])));
        let mut catalog = ModelCatalog::new(backend);
        let selected = catalog.select(&ModelSelector::Pattern("^m:".into())).await;
        assert_eq!(selected, vec!["m:2b", "m:9b", "m:10b"]);
        assert_eq!(catalog.descriptor("m:9b").map(|d| d.disk_gb()), Some(1.0));
        assert!(catalog.descriptor("absent").is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_lists_nothing() {
        let mut catalog = ModelCatalog::new(Arc::new(Listing(None)));
        assert!(catalog.list_available().await.is_empty());
        assert!(catalog.select(&ModelSelector::All).await.is_empty());
    }
}
