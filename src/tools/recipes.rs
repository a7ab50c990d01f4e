use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::retrieval::{Retriever, Strategy};
use crate::tools::{Tool, error_output};

/// One recipe retrieval strategy wrapped as a tool.
pub struct RecipeSearchTool {
    name: String,
    description: String,
    retriever: Arc<Retriever>,
    strategy: Strategy,
    top_k: usize,
}

impl RecipeSearchTool {
    pub fn new(
        name: &str,
        description: &str,
        retriever: Arc<Retriever>,
        strategy: Strategy,
        top_k: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            retriever,
            strategy,
            top_k,
        }
    }
}

#[async_trait]
impl Tool for RecipeSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: &str) -> String {
        let query = input.trim();
        match self.retriever.retrieve(query, self.strategy, self.top_k).await {
            Ok(results) => serde_json::to_string(&results).unwrap_or_else(error_output),
            Err(e) => {
                warn!(tool = %self.name, "recipe search failed: {}", e);
                error_output(e)
            }
        }
    }
}
