//! Query-time retrieval: embed the query once, then rank passages.

use std::sync::Arc;

use tracing::debug;

use sapa_core::error::SapaError;
use sapa_core::retry::RetryPolicy;
use sapa_core::types::RetrievedPassage;

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::{MetadataFilter, SemanticIndex};

/// Combines the embedding service with the shared semantic index.
///
/// Uses dynamic dispatch (`Box<dyn DynEmbeddingService>`) so that production
/// code can supply `HttpEmbeddingService` while tests use `MockEmbedding`.
pub struct Retriever {
    index: Arc<SemanticIndex>,
    embedder: Box<dyn DynEmbeddingService>,
    policy: RetryPolicy,
    min_score: f32,
}

impl Retriever {
    pub fn new(
        index: Arc<SemanticIndex>,
        embedder: impl EmbeddingService + 'static,
        policy: RetryPolicy,
    ) -> Self {
        Self::new_dyn(index, Box::new(embedder), policy)
    }

    pub fn new_dyn(
        index: Arc<SemanticIndex>,
        embedder: Box<dyn DynEmbeddingService>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            index,
            embedder,
            policy,
            min_score: f32::MIN,
        }
    }

    /// Discard passages scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn index(&self) -> &Arc<SemanticIndex> {
        &self.index
    }

    /// Embed `query` under the retry policy, then return up to `k` passages
    /// by descending score. An empty result is not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedPassage>, SapaError> {
        let vector = self
            .policy
            .run("embedding", || self.embedder.embed_boxed(query))
            .await?;

        let mut passages = self.index.query(&vector, k, filter)?;
        let before = passages.len();
        passages.retain(|p| p.score >= self.min_score);

        debug!(
            k,
            hits = before,
            kept = passages.len(),
            "Retrieved passages"
        );
        Ok(passages)
    }
}
