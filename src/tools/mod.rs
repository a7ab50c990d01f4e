//! Retrieval tools exposed to the agent loop

pub mod books;
pub mod recipes;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clients::{LanguageModel, ToolSpec};
use crate::config::Config;
use crate::retrieval::{Retriever, SimilarityRetriever, Strategy};

pub use books::{BooksQaTool, BooksSimilarityTool};
pub use recipes::RecipeSearchTool;

/// Text in, JSON text out. Failures are reported inside the output so the
/// model can react to them.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn invoke(&self, input: &str) -> String;
}

pub(crate) fn error_output(message: impl std::fmt::Display) -> String {
    json!({ "error": message.to_string() }).to_string()
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// The ChefBoost tool set over the recipe and book corpora.
    pub fn for_request(
        recipes: Arc<Retriever>,
        books: Arc<SimilarityRetriever>,
        llm: Arc<dyn LanguageModel>,
        config: &Config,
    ) -> Self {
        let top_k = config.retrieval.top_k;
        let mut registry = Self::new();
        registry.register(Arc::new(RecipeSearchTool::new(
            "recipes_similarity_search",
            "Simple similarity search over the recipes store. Returns the top matching recipes as JSON.",
            recipes.clone(),
            Strategy::Similarity,
            top_k,
        )));
        registry.register(Arc::new(RecipeSearchTool::new(
            "recipes_self_query",
            "Search recipes with metadata filtering (recipe_type, cuisine, special_considerations, ingredients, source, date_issued).",
            recipes.clone(),
            Strategy::SelfQuery,
            top_k,
        )));
        registry.register(Arc::new(RecipeSearchTool::new(
            "recipes_multi_query",
            "Search recipes with several rephrasings of the question plus metadata filtering. Best for broad or vague requests.",
            recipes,
            Strategy::MultiQuery,
            top_k,
        )));
        registry.register(Arc::new(BooksSimilarityTool::new(books.clone(), top_k)));
        registry.register(Arc::new(BooksQaTool::new(
            books,
            llm,
            top_k,
            config.timeouts().llm,
        )));
        registry
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    pub async fn invoke(&self, name: &str, input: &str) -> String {
        match self.get(name) {
            Some(tool) => {
                debug!(tool = name, "invoking tool");
                tool.invoke(input).await
            }
            None => {
                warn!("model requested unknown tool '{}'", name);
                error_output(format!("unknown tool '{name}'"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        async fn invoke(&self, input: &str) -> String {
            json!({ "echo": input }).to_string()
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        assert_eq!(registry.specs()[0].name, "echo");
        assert_eq!(registry.invoke("echo", "hi").await, r#"{"echo":"hi"}"#);
        let missing: serde_json::Value =
            serde_json::from_str(&registry.invoke("nope", "hi").await).unwrap();
        assert_eq!(missing["error"], "unknown tool 'nope'");
    }
}
