use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::retrieval::schema::MetadataSchema;
use crate::retrieval::translator::QueryTranslator;
use crate::store::{Document, DocumentStore};
use crate::utils::bounded;

/// Translate the query into a metadata filter, then run a filtered search.
///
/// Without a filter this is exactly a similarity search on the original query.
pub struct SelfQueryRetriever {
    translator: QueryTranslator,
    store: Arc<dyn DocumentStore>,
    schema: Arc<MetadataSchema>,
    timeout: Duration,
}

impl SelfQueryRetriever {
    pub fn new(
        translator: QueryTranslator,
        store: Arc<dyn DocumentStore>,
        schema: Arc<MetadataSchema>,
        timeout: Duration,
    ) -> Self {
        Self {
            translator,
            store,
            schema,
            timeout,
        }
    }

    pub fn schema(&self) -> &MetadataSchema {
        &self.schema
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Document>> {
        let translation = self.translator.translate(query, &self.schema).await;
        let res = match &translation.filter {
            Some(filter) => {
                debug!(residual = %translation.residual_query, "filtered search");
                bounded(
                    "filtered_search",
                    self.timeout,
                    self.store
                        .filtered_search(&translation.residual_query, filter, top_k),
                )
                .await
            }
            None => {
                bounded(
                    "similarity_search",
                    self.timeout,
                    self.store.similarity_search(query, top_k),
                )
                .await
            }
        };
        res.map_err(|e| e.into_retrieval_unavailable())
    }
}
