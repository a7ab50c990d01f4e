//! Paraphrase expansion with concurrent per-variant self-query and fusion

use futures_util::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clients::{LanguageModel, LlmError};
use crate::error::Result;
use crate::retrieval::self_query::SelfQueryRetriever;
use crate::retrieval::{RetrievalResult, Strategy, rank_all};
use crate::utils::{Expired, bounded};

/// Upper bound on paraphrases requested from the model.
pub const MAX_PARAPHRASES: usize = 5;

static LIST_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").unwrap());

/// Why expansion produced nothing usable. Recovered by searching the
/// original query alone.
#[derive(Debug, Error)]
pub enum ExpansionFailure {
    #[error("language model failed: {0}")]
    Llm(#[from] LlmError),
    #[error("paraphrase generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("no usable paraphrases in model output")]
    NoParaphrases,
}

impl From<Expired> for ExpansionFailure {
    fn from(e: Expired) -> Self {
        ExpansionFailure::Timeout {
            timeout_ms: e.timeout_ms,
        }
    }
}

pub struct MultiQueryRetriever {
    llm: Arc<dyn LanguageModel>,
    self_query: Arc<SelfQueryRetriever>,
    max_paraphrases: usize,
    timeout: Duration,
}

impl MultiQueryRetriever {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        self_query: Arc<SelfQueryRetriever>,
        max_paraphrases: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            self_query,
            max_paraphrases: max_paraphrases.min(MAX_PARAPHRASES),
            timeout,
        }
    }

    /// The query expansion set: the original query first, then paraphrases.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let mut variants = vec![query.to_string()];
        if self.max_paraphrases == 0 {
            return variants;
        }
        match self.paraphrase(query).await {
            Ok(extra) => variants.extend(extra),
            Err(e) => warn!("query expansion failed, using original only: {}", e),
        }
        variants
    }

    async fn paraphrase(&self, query: &str) -> std::result::Result<Vec<String>, ExpansionFailure> {
        let prompt = build_prompt(query, self.max_paraphrases);
        let raw = bounded("query_expansion", self.timeout, async {
            Ok::<_, ExpansionFailure>(self.llm.complete(&prompt).await?)
        })
        .await?;
        parse_paraphrases(&raw, query, self.max_paraphrases)
    }

    /// Expand, search every variant concurrently, fuse, then cap.
    pub async fn search(
        &self,
        query: &str,
        top_k_per_variant: usize,
        cap: Option<usize>,
    ) -> Result<Vec<RetrievalResult>> {
        let variants = self.expand(query).await;
        debug!(variants = variants.len(), "multi-query fan-out");

        let outcomes = join_all(
            variants
                .iter()
                .map(|v| self.self_query.search(v, top_k_per_variant)),
        )
        .await;

        let mut lists = Vec::with_capacity(outcomes.len());
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(docs) => lists.push(rank_all(&docs, Strategy::MultiQuery)),
                // The original query's results are the floor; losing them is fatal
                Err(e) if i == 0 => return Err(e),
                Err(e) => warn!(variant = %variants[i], "paraphrase search failed: {}", e),
            }
        }

        let mut fused = fuse(lists);
        if let Some(cap) = cap {
            fused.truncate(cap);
        }
        Ok(fused)
    }
}

pub fn build_prompt(query: &str, count: usize) -> String {
    format!(
        "You are an AI language model assistant. Your task is to generate {count} \
different versions of the given user question to retrieve relevant documents from a vector \
database. By generating multiple perspectives on the user question, your goal is to help the \
user overcome some of the limitations of distance-based similarity search. Provide these \
alternative questions separated by newlines.\nOriginal question: {query}"
    )
}

/// Clean model output into at most `max` distinct paraphrases.
pub fn parse_paraphrases(
    raw: &str,
    query: &str,
    max: usize,
) -> std::result::Result<Vec<String>, ExpansionFailure> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(query.trim().to_lowercase());
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = LIST_MARKER_RE.replace(line, "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !seen.insert(line.to_lowercase()) {
            continue;
        }
        out.push(line.to_string());
        if out.len() >= max {
            break;
        }
    }
    if out.is_empty() {
        return Err(ExpansionFailure::NoParaphrases);
    }
    Ok(out)
}

/// Concatenate per-variant lists in order and keep the first occurrence of
/// each content hash, with its variant-local rank. Idempotent.
pub fn fuse(lists: Vec<Vec<RetrievalResult>>) -> Vec<RetrievalResult> {
    let mut seen: HashSet<String> = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|r| seen.insert(r.content_hash.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paraphrases_are_cleaned_and_bounded() {
        let raw = "1. Easy vegetarian lasagna?\n\n- Meatless lasagna recipe\n* VEGETARIAN LASAGNA\n2) meatless lasagna recipe\nLasagna without meat\nVeggie lasagna\nGarden lasagna\nOne more";
        let out = parse_paraphrases(raw, "vegetarian lasagna", 5).unwrap();
        assert_eq!(
            out,
            vec![
                "Easy vegetarian lasagna?",
                "Meatless lasagna recipe",
                "Lasagna without meat",
                "Veggie lasagna",
                "Garden lasagna",
            ]
        );
    }

    #[test]
    fn blank_or_echo_only_output_is_a_failure() {
        assert!(matches!(
            parse_paraphrases("\n  \nVegetarian Lasagna\n", "vegetarian lasagna", 5),
            Err(ExpansionFailure::NoParaphrases)
        ));
    }

    #[test]
    fn prompt_embeds_original_question() {
        assert!(build_prompt("how to poach eggs", 5).ends_with("Original question: how to poach eggs"));
    }

    #[test]
    fn prompt_asks_for_the_configured_count() {
        let prompt = build_prompt("how to poach eggs", 2);
        assert!(prompt.contains("generate 2 different versions"));
        assert!(!prompt.contains("generate 5"));
    }
}
