//! Embedding service trait and implementations.
//!
//! - `HttpEmbeddingService` calls an OpenAI-compatible `/embeddings` endpoint.
//!   This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use sapa_core::error::SapaError;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. The same
/// model must be used for ingestion and for queries.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, SapaError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future`, which is not object-safe,
/// so this trait boxes the future. Every `EmbeddingService` gets it through
/// the blanket impl below.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, SapaError>> + Send + 'a>>;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, SapaError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// HttpEmbeddingService - OpenAI-compatible embeddings endpoint
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding backend speaking the OpenAI `/embeddings` protocol.
pub struct HttpEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl std::fmt::Debug for HttpEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingService")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl HttpEmbeddingService {
    /// Build a client. `timeout` bounds each HTTP request; callers usually
    /// add their own retry policy on top.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, SapaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SapaError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let model = model.into();
        info!(endpoint = %endpoint, model = %model, dimensions, "Embedding client ready");

        Ok(Self {
            client,
            endpoint,
            model,
            api_key: api_key.into(),
            dimensions,
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, SapaError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| SapaError::Provider(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SapaError::Provider(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| SapaError::Provider(format!("invalid embedding response: {}", e)))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| SapaError::Provider("embedding response had no data".into()))?;

        if embedding.len() != self.dimensions {
            return Err(SapaError::Provider(format!(
                "embedding model returned {} dimensions, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(embedding)
    }
}

impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SapaError> {
        if text.trim().is_empty() {
            return Err(SapaError::Validation("Cannot embed empty text".to_string()));
        }
        self.request(text).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Deterministic vector for `text`, usable when building fixture chunks.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SapaError> {
        if text.is_empty() {
            return Err(SapaError::Validation("Cannot embed empty text".to_string()));
        }
        Ok(self.vector_for(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new(16);
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 16);
        assert_eq!(EmbeddingService::dimensions(&service), 16);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::default();
        let v1 = service.embed("Vịnh Hạ Long").await.unwrap();
        let v2 = service.embed("Vịnh Hạ Long").await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1, service.vector_for("Vịnh Hạ Long"));
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::default();
        let v1 = service.embed("text one").await.unwrap();
        let v2 = service.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_is_unit_length() {
        let service = MockEmbedding::default();
        let vec = service.embed("normalized").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_text() {
        let service = MockEmbedding::default();
        assert!(service.embed("").await.is_err());
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let service: Box<dyn DynEmbeddingService> = Box::new(MockEmbedding::new(8));
        let vec = service.embed_boxed("phở").await.unwrap();
        assert_eq!(vec.len(), service.dimensions());
    }

    #[tokio::test]
    async fn test_http_embedding_unreachable_endpoint_is_provider_error() {
        let service = HttpEmbeddingService::new(
            "http://127.0.0.1:9",
            "text-embedding-3-small",
            "key",
            8,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = service.embed("hello").await.unwrap_err();
        assert!(err.is_provider());
    }

    #[tokio::test]
    async fn test_http_embedding_rejects_empty_text_before_network() {
        let service =
            HttpEmbeddingService::new("http://127.0.0.1:9", "m", "key", 8, Duration::from_secs(1))
                .unwrap();
        let err = service.embed("   ").await.unwrap_err();
        assert!(matches!(err, SapaError::Validation(_)));
    }
}
