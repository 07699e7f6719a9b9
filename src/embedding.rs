//! Embedding provider seam
//!
//! The store never computes vectors. Callers inject a provider (a local model,
//! a remote API client, a test double) and the store only persists what it
//! returns.

use crate::Result;
use crate::storage::schema::EMBEDDING_DIMENSIONS;

/// Source of embedding vectors for item text
pub trait EmbeddingProvider {
    /// Length of every vector this provider returns
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    /// Embed a batch of texts, one vector per input in the same order
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[query.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| crate::Error::Embedding("provider returned no vector".to_string()))
    }
}
