//! Sapa vector crate - semantic index, embedding services, retrieval, and
//! chunk loading.

pub mod embedding;
pub mod index;
pub mod ingest;
pub mod retriever;

pub use embedding::{DynEmbeddingService, EmbeddingService, HttpEmbeddingService, MockEmbedding};
pub use index::{DistanceMetric, MetadataFilter, SemanticIndex};
pub use ingest::{load_chunk_file, IngestReport};
pub use retriever::Retriever;
