//! Vector document stores

pub mod memory;
pub mod surreal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::retrieval::StructuredFilter;

pub use memory::MemoryStore;
pub use surreal::{SurrealFilter, SurrealStore, render_filter};

/// A retrievable passage and its ingestion-time metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Nearest-neighbour search over one corpus, most similar first.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<Document>>;

    /// Similarity search restricted to documents whose metadata satisfy `filter`.
    async fn filtered_search(
        &self,
        query: &str,
        filter: &StructuredFilter,
        top_k: usize,
    ) -> Result<Vec<Document>>;
}
