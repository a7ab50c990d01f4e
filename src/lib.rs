pub mod agent;
pub mod clients;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod http;
pub mod retrieval;
pub mod store;
pub mod stream;
pub mod tools;
pub mod utils;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::clients::OpenAiClient;
use crate::config::Config;
use crate::http::AppState;
use crate::retrieval::{Retriever, SimilarityRetriever};
use crate::store::{DocumentStore, SurrealStore};

/// Connect the stores and clients once and wire them into shared state.
pub async fn build_state(config: Config) -> Result<AppState> {
    let embedder = crate::embeddings::create_embedder(&config)
        .await
        .context("Failed to create embedder")?;
    info!("Embedder initialized with {} dimensions", embedder.dimensions());

    let db = crate::store::surreal::connect(&config).await?;
    let recipes_store = SurrealStore::new(
        db.clone(),
        config.retrieval.recipes_table.clone(),
        embedder.clone(),
    );
    let books_store = SurrealStore::new(db, config.retrieval.books_table.clone(), embedder);
    recipes_store.ensure_schema().await?;
    books_store.ensure_schema().await?;

    let client = Arc::new(OpenAiClient::from_config(&config)?);
    let recipes_store: Arc<dyn DocumentStore> = Arc::new(recipes_store);
    let books_store: Arc<dyn DocumentStore> = Arc::new(books_store);

    let recipes = Arc::new(Retriever::recipes(recipes_store, client.clone(), &config));
    let books = Arc::new(SimilarityRetriever::new(books_store, config.timeouts().store));

    Ok(AppState {
        config: Arc::new(config),
        recipes,
        books,
        llm: client.clone(),
        chat: client,
    })
}
