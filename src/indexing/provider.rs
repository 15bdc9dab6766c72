//! Collaborator interfaces for semantic indexing: the embedding model and the
//! vector database. Implementations live outside this crate.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Turns text into a fixed-length vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Stores note vectors keyed by note path and answers nearest-neighbour
/// queries. Ranking and tie-breaking are up to the implementation.
pub trait VectorStore: Send + Sync {
    fn initialize_schema(&self, dimension: usize) -> Result<()>;

    /// Insert or replace the vectors for `path`.
    fn store(&self, path: &Path, vector: &[f32], content: &str) -> Result<()>;

    /// Delete every vector for `path`. Removing an unknown path is not an error.
    fn remove(&self, path: &Path) -> Result<()>;

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: PathBuf,
    pub score: f32,
    pub content: String,
}
