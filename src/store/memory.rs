use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::embeddings::Embedder;
use crate::error::{ChefBoostError, Result};
use crate::retrieval::StructuredFilter;
use crate::store::{Document, DocumentStore};
use crate::utils::cosine_similarity;

/// In-process store: brute-force cosine over embedded documents, filters
/// evaluated against raw metadata. Ties keep insertion order.
pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_documents(&self, docs: Vec<Document>) -> Result<usize> {
        let mut embedded = Vec::with_capacity(docs.len());
        for doc in docs {
            let emb = self
                .embedder
                .embed(&doc.content)
                .await
                .map_err(|e| ChefBoostError::Embedding {
                    message: e.to_string(),
                })?;
            embedded.push((doc, emb));
        }
        let n = embedded.len();
        self.entries.write().await.extend(embedded);
        Ok(n)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn search(
        &self,
        query: &str,
        filter: Option<&StructuredFilter>,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        let q = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| ChefBoostError::Embedding {
                message: e.to_string(),
            })?;
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &Document)> = entries
            .iter()
            .filter(|(doc, _)| filter.is_none_or(|f| f.matches(&doc.metadata)))
            .map(|(doc, emb)| (cosine_similarity(&q, emb), doc))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<Document>> {
        self.search(query, None, top_k).await
    }

    async fn filtered_search(
        &self,
        query: &str,
        filter: &StructuredFilter,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        self.search(query, Some(filter), top_k).await
    }
}
