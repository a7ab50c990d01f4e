use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::clients::LanguageModel;
use crate::retrieval::{SimilarityRetriever, Strategy, rank_all};
use crate::store::Document;
use crate::tools::{Tool, error_output};
use crate::utils::bounded;

pub struct BooksSimilarityTool {
    retriever: Arc<SimilarityRetriever>,
    top_k: usize,
}

impl BooksSimilarityTool {
    pub fn new(retriever: Arc<SimilarityRetriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl Tool for BooksSimilarityTool {
    fn name(&self) -> &str {
        "books_similarity_search"
    }

    fn description(&self) -> &str {
        "Simple similarity search over the cookbook corpus. Returns the top matching passages as JSON."
    }

    async fn invoke(&self, input: &str) -> String {
        match self.retriever.search(input.trim(), self.top_k).await {
            Ok(docs) => serde_json::to_string(&rank_all(&docs, Strategy::Similarity))
                .unwrap_or_else(error_output),
            Err(e) => {
                warn!("books similarity search failed: {}", e);
                error_output(e)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QaAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Retrieve book passages, then answer from them with one completion.
pub struct BooksQaTool {
    retriever: Arc<SimilarityRetriever>,
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
    timeout: Duration,
}

impl BooksQaTool {
    pub fn new(
        retriever: Arc<SimilarityRetriever>,
        llm: Arc<dyn LanguageModel>,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            llm,
            top_k,
            timeout,
        }
    }

    pub async fn answer(&self, question: &str) -> crate::error::Result<QaAnswer> {
        let docs = self.retriever.search(question, self.top_k).await?;
        let prompt = qa_prompt(question, &docs);
        let answer = bounded("books_retrieval_qa", self.timeout, async {
            self.llm
                .complete(&prompt)
                .await
                .map_err(|e| crate::error::ChefBoostError::Llm {
                    message: e.to_string(),
                })
        })
        .await?;
        Ok(QaAnswer {
            answer: answer.trim().to_string(),
            sources: distinct_sources(&docs),
        })
    }
}

fn qa_prompt(question: &str, docs: &[Document]) -> String {
    let context = docs
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
{context}\n\nQuestion: {question}\nHelpful Answer:"
    )
}

fn distinct_sources(docs: &[Document]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for d in docs {
        if let Some(s) = d.metadata.get("source").and_then(|v| v.as_str())
            && !s.trim().is_empty()
            && !out.iter().any(|o| o == s)
        {
            out.push(s.to_string());
        }
    }
    out
}

#[async_trait]
impl Tool for BooksQaTool {
    fn name(&self) -> &str {
        "books_retrieval_qa"
    }

    fn description(&self) -> &str {
        "Short question answering over the cookbook corpus. Returns an answer and its sources as JSON."
    }

    async fn invoke(&self, input: &str) -> String {
        match self.answer(input.trim()).await {
            Ok(qa) => serde_json::to_string(&qa).unwrap_or_else(error_output),
            Err(e) => {
                warn!("books retrieval QA failed: {}", e);
                error_output(e)
            }
        }
    }
}
