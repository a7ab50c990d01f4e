use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

/// OpenAI-compatible `/embeddings` client. One request per call; deadlines
/// and retries belong to the caller.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl OpenAIEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: String,
        model: String,
        dims: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build reqwest client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(
            "Generating OpenAI embedding (model={}, chars={})",
            self.model,
            text.len()
        );

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error {}: {}", status, body);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("No embedding returned")
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Deterministic bag-of-words embedder for offline runs and tests (no network).
///
/// Each lower-cased alphanumeric token is hashed into one bucket, so texts that
/// share words land close together under cosine similarity.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = blake3::hash(token.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest.as_bytes()[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dims as u64) as usize;
            out[bucket] += 1.0;
        }
        out
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Wraps an embedder with a bounded LRU cache of query embeddings.
///
/// Multi-query retrieval re-embeds the same residual queries often; the lock
/// is released before the inner embedder is awaited.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.lock().await.get(text).cloned() {
            return Ok(hit);
        }
        let emb = self.inner.embed(text).await?;
        self.cache.lock().await.put(text.to_string(), emb.clone());
        Ok(emb)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Build the configured embedder. Falls back to the hash embedder when no
/// OpenAI key is present so offline runs still work.
pub async fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let base: Arc<dyn Embedder> = match config.runtime.openai_api_key.clone() {
        Some(key) if !key.trim().is_empty() => {
            info!(
                "Using OpenAI embeddings (model={}, dims={})",
                config.system.embedding_model, config.system.embedding_dimensions
            );
            Arc::new(OpenAIEmbedder::new(
                config.system.llm_base_url.clone(),
                key,
                config.system.embedding_model.clone(),
                config.system.embedding_dimensions,
            )?)
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not set, using local hash embedder");
            Arc::new(HashEmbedder::new(config.system.embedding_dimensions))
        }
    };
    Ok(Arc::new(CachedEmbedder::new(
        base,
        config.system.embedding_cache_size,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32])
        }

        fn dimensions(&self) -> usize {
            1
        }
    }

    /// Serve `/embeddings` locally, answering `status` and counting hits.
    async fn embedding_server(status: u16) -> (String, Arc<AtomicUsize>) {
        use axum::{Json, Router, http::StatusCode, routing::post};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/embeddings",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let code = StatusCode::from_u16(status).unwrap();
                    (code, Json(serde_json::json!({"data": [{"embedding": [0.5, 0.25]}]})))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), hits)
    }

    #[tokio::test]
    async fn openai_embedder_reads_first_vector() {
        let (base, hits) = embedding_server(200).await;
        let e = OpenAIEmbedder::new(base, "sk-test".into(), "m".into(), 2).unwrap();
        assert_eq!(e.embed("soup").await.unwrap(), vec![0.5, 0.25]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn openai_embedder_fails_once_without_retrying() {
        let (base, hits) = embedding_server(503).await;
        let e = OpenAIEmbedder::new(base, "sk-test".into(), "m".into(), 2).unwrap();
        let err = e.embed("soup").await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_sized() {
        let e = HashEmbedder::new(64);
        let a = e.embed("Vegetarian lasagna").await.unwrap();
        let b = e.embed("vegetarian LASAGNA").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn cached_embedder_hits_inner_once_per_text() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 4);
        cached.embed("soup").await.unwrap();
        cached.embed("soup").await.unwrap();
        cached.embed("salad").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
