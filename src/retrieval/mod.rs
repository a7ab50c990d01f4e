//! Hybrid retrieval: plain similarity, self-query and multi-query strategies

pub mod filter;
pub mod multi_query;
pub mod normalize;
pub mod schema;
pub mod self_query;
pub mod similarity;
pub mod translator;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::clients::LanguageModel;
use crate::config::{Config, RetrievalTimeouts};
use crate::error::{ChefBoostError, Result};
use crate::store::DocumentStore;

pub use filter::{Comparator, Comparison, FilterValue, StructuredFilter, facets};
pub use multi_query::{ExpansionFailure, MultiQueryRetriever, fuse};
pub use normalize::{GENERATED_SOURCE, normalize};
pub use schema::{AttributeInfo, AttributeKind, MetadataSchema, recipe_schema};
pub use self_query::SelfQueryRetriever;
pub use similarity::SimilarityRetriever;
pub use translator::{QueryTranslator, Translation, TranslationFailure, parse_translation};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Strategy {
    Similarity,
    #[default]
    SelfQuery,
    MultiQuery,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Similarity => "similarity",
            Strategy::SelfQuery => "self_query",
            Strategy::MultiQuery => "multi_query",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetadata {
    pub recipe_type: Option<String>,
    pub cuisine: Option<String>,
    pub special_considerations: Vec<String>,
    pub source: String,
    pub ingredients: Vec<String>,
    pub title: Option<String>,
    pub date_issued: Option<String>,
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: NormalizedMetadata,
    pub source_strategy: Strategy,
    /// 1-based position in the producing strategy's (or variant's) ranking
    pub rank: usize,
    pub content_hash: String,
}

/// Strategy-selectable entry point over one corpus.
pub struct Retriever {
    similarity: SimilarityRetriever,
    self_query: Arc<SelfQueryRetriever>,
    multi_query: MultiQueryRetriever,
    multi_query_cap: Option<usize>,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn LanguageModel>,
        schema: MetadataSchema,
        max_paraphrases: usize,
        multi_query_cap: Option<usize>,
        timeouts: RetrievalTimeouts,
    ) -> Self {
        let similarity = SimilarityRetriever::new(store.clone(), timeouts.store);
        let translator = QueryTranslator::new(llm.clone(), timeouts.llm);
        let self_query = Arc::new(SelfQueryRetriever::new(
            translator,
            store,
            Arc::new(schema),
            timeouts.store,
        ));
        let multi_query =
            MultiQueryRetriever::new(llm, self_query.clone(), max_paraphrases, timeouts.llm);
        Self {
            similarity,
            self_query,
            multi_query,
            multi_query_cap,
        }
    }

    /// Recipe retriever wired from configuration.
    pub fn recipes(
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn LanguageModel>,
        config: &Config,
    ) -> Self {
        Self::new(
            store,
            llm,
            recipe_schema(),
            config.retrieval.max_paraphrases,
            config.retrieval.multi_query_cap,
            config.timeouts(),
        )
    }

    pub async fn retrieve(
        &self,
        query: &str,
        strategy: Strategy,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Err(ChefBoostError::InvalidParams {
                message: "query must not be empty".into(),
            });
        }
        let top_k = top_k.max(1);
        info!(%strategy, top_k, "retrieve");
        match strategy {
            Strategy::Similarity => {
                let docs = self.similarity.search(query, top_k).await?;
                Ok(rank_all(&docs, strategy))
            }
            Strategy::SelfQuery => {
                let docs = self.self_query.search(query, top_k).await?;
                Ok(rank_all(&docs, strategy))
            }
            Strategy::MultiQuery => {
                self.multi_query
                    .search(query, top_k, self.multi_query_cap)
                    .await
            }
        }
    }
}

pub(crate) fn rank_all(
    docs: &[crate::store::Document],
    strategy: Strategy,
) -> Vec<RetrievalResult> {
    docs.iter()
        .enumerate()
        .map(|(i, d)| normalize(d, strategy, i + 1))
        .collect()
}
