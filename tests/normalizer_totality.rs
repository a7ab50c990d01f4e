//! The normalizer accepts any metadata shape without failing

use chefboost::retrieval::{GENERATED_SOURCE, Strategy as RetrievalStrategy, normalize};
use chefboost::store::Document;
use proptest::prelude::*;
use serde_json::{Map, Value};

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".{0,24}".prop_map(Value::String),
        r"\[('[a-z ]{0,8}', ){0,3}\]".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn metadata() -> impl Strategy<Value = Map<String, Value>> {
    let keys = prop_oneof![
        Just("recipe_type".to_string()),
        Just("cuisine".to_string()),
        Just("special_considerations".to_string()),
        Just("source".to_string()),
        Just("ingredients".to_string()),
        Just("title".to_string()),
        Just("date_issued".to_string()),
        Just("authors".to_string()),
        "[a-z_]{1,10}",
    ];
    prop::collection::btree_map(keys, json_value(), 0..10).prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn normalize_is_total(content in ".{0,64}", meta in metadata(), rank in 1usize..50) {
        let doc = Document { content: content.clone(), metadata: meta.clone() };
        let r = normalize(&doc, RetrievalStrategy::SelfQuery, rank);

        prop_assert_eq!(&r.content, &content);
        prop_assert_eq!(r.rank, rank);
        prop_assert!(!r.metadata.source.is_empty());
        if !matches!(meta.get("source"), Some(Value::String(s)) if !s.trim().is_empty()) {
            prop_assert_eq!(r.metadata.source.as_str(), GENERATED_SOURCE);
        }
        for label in [&r.metadata.recipe_type, &r.metadata.cuisine].into_iter().flatten() {
            prop_assert_eq!(label.clone(), label.to_lowercase());
            prop_assert_eq!(label.trim(), label.as_str());
        }
        for item in &r.metadata.special_considerations {
            prop_assert!(!item.is_empty());
            prop_assert_eq!(item.clone(), item.to_lowercase());
        }
        for key in r.metadata.extra.keys() {
            prop_assert!(meta.contains_key(key));
        }
    }

    #[test]
    fn normalize_is_deterministic(content in ".{0,32}", meta in metadata()) {
        let doc = Document { content, metadata: meta };
        prop_assert_eq!(
            normalize(&doc, RetrievalStrategy::Similarity, 1),
            normalize(&doc, RetrievalStrategy::Similarity, 1)
        );
    }
}
