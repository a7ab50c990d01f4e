use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::store::{Document, DocumentStore};
use crate::utils::bounded;

/// Unfiltered nearest-neighbour search. No retries; store failures surface
/// as `RetrievalUnavailable`.
pub struct SimilarityRetriever {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl SimilarityRetriever {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Document>> {
        bounded(
            "similarity_search",
            self.timeout,
            self.store.similarity_search(query, top_k),
        )
        .await
        .map_err(|e| e.into_retrieval_unavailable())
    }
}
