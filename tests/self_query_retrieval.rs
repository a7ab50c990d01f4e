//! Self-query retrieval: filtering, fail-closed translation and timeouts

mod common;

use chefboost::config::RetrievalTimeouts;
use chefboost::error::ChefBoostError;
use chefboost::retrieval::{Retriever, Strategy, recipe_schema};
use common::{ScriptedLlm, StubStore, doc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn soups() -> StubStore {
    let docs = vec![
        doc("Thai green curry soup", json!({"cuisine": "thai", "recipe_type": "soup"})),
        doc("French onion soup", json!({"cuisine": "French", "recipe_type": "soup"})),
        doc("Vichyssoise", json!({"cuisine": "french", "recipe_type": "Soup", "date_issued": "1917-05-01"})),
    ];
    StubStore::new()
        .with("french soups before 1920", docs.clone())
        .with("soups", docs)
}

fn retriever(store: Arc<StubStore>, llm: ScriptedLlm, timeouts: RetrievalTimeouts) -> Retriever {
    Retriever::new(store, Arc::new(llm), recipe_schema(), 5, None, timeouts)
}

#[tokio::test]
async fn filter_never_admits_non_matching_documents() {
    let store = Arc::new(soups());
    let llm = ScriptedLlm::new().translate(
        "french soups before 1920",
        r#"{"query": "soups", "filter": {"and": [{"eq": ["cuisine", "French"]}, {"lt": ["date_issued", "1920"]}]}}"#,
    );
    let r = retriever(store.clone(), llm, RetrievalTimeouts::default());

    let results = r
        .retrieve("french soups before 1920", Strategy::SelfQuery, 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "Vichyssoise");
    assert_eq!(results[0].metadata.cuisine.as_deref(), Some("french"));
    assert_eq!(results[0].metadata.recipe_type.as_deref(), Some("soup"));

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "soups");
    assert!(calls[0].1.is_some());
}

#[tokio::test]
async fn invalid_translation_degrades_to_similarity_on_original_query() {
    let store = Arc::new(soups());
    let llm = ScriptedLlm::new().translate(
        "french soups before 1920",
        r#"{"query": "soups", "filter": {"eq": ["calories", "low"]}}"#,
    );
    let r = retriever(store.clone(), llm, RetrievalTimeouts::default());

    let self_query = r
        .retrieve("french soups before 1920", Strategy::SelfQuery, 10)
        .await
        .unwrap();
    let similarity = r
        .retrieve("french soups before 1920", Strategy::Similarity, 10)
        .await
        .unwrap();
    let contents = |v: &[chefboost::retrieval::RetrievalResult]| {
        v.iter().map(|r| r.content.clone()).collect::<Vec<_>>()
    };
    assert_eq!(contents(&self_query), contents(&similarity));
    assert_eq!(store.calls()[0], ("french soups before 1920".to_string(), None));
}

#[tokio::test(start_paused = true)]
async fn translator_timeout_fails_closed() {
    let store = Arc::new(soups());
    let llm = ScriptedLlm::new()
        .translate(
            "french soups before 1920",
            r#"{"query": "soups", "filter": {"eq": ["cuisine", "thai"]}}"#,
        )
        .stalling(Duration::from_secs(60));
    let timeouts = RetrievalTimeouts {
        llm: Duration::from_millis(500),
        store: Duration::from_secs(5),
    };
    let r = retriever(store, llm, timeouts);

    let results = r
        .retrieve("french soups before 1920", Strategy::SelfQuery, 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn store_failure_is_retrieval_unavailable() {
    let store = Arc::new(StubStore::new().failing_on("soups"));
    let r = retriever(store.clone(), ScriptedLlm::new(), RetrievalTimeouts::default());

    for strategy in [Strategy::Similarity, Strategy::SelfQuery] {
        let err = r.retrieve("soups", strategy, 4).await.unwrap_err();
        assert!(
            matches!(err, ChefBoostError::RetrievalUnavailable { .. }),
            "{strategy}: {err}"
        );
    }
    // No retries
    assert_eq!(store.calls().len(), 2);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let r = retriever(Arc::new(soups()), ScriptedLlm::new(), RetrievalTimeouts::default());
    let err = r.retrieve("   ", Strategy::Similarity, 4).await.unwrap_err();
    assert!(matches!(err, ChefBoostError::InvalidParams { .. }));
}
