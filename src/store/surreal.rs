use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::Embedder;
use crate::error::{ChefBoostError, Result};
use crate::retrieval::filter::{canonical_date, facets, parse_date};
use crate::retrieval::{Comparator, FilterValue, StructuredFilter};
use crate::store::{Document, DocumentStore};

/// A parameterised SurrealQL condition over the stored `facets` projection.
/// Values are never spliced into the clause text; each one is bound as `$fN`.
#[derive(Debug, Clone, PartialEq)]
pub struct SurrealFilter {
    pub clause: String,
    pub bindings: Vec<(String, Value)>,
}

pub fn render_filter(filter: &StructuredFilter) -> Result<SurrealFilter> {
    let mut bindings = Vec::new();
    let clause = render_node(filter, &mut bindings)?;
    Ok(SurrealFilter { clause, bindings })
}

fn bind(bindings: &mut Vec<(String, Value)>, value: Value) -> String {
    let param = format!("f{}", bindings.len());
    bindings.push((param.clone(), value));
    param
}

fn render_node(node: &StructuredFilter, bindings: &mut Vec<(String, Value)>) -> Result<String> {
    match node {
        StructuredFilter::And(children) | StructuredFilter::Or(children) => {
            let joiner = if matches!(node, StructuredFilter::And(_)) {
                " AND "
            } else {
                " OR "
            };
            if children.is_empty() {
                return Ok(if joiner == " AND " { "true" } else { "false" }.to_string());
            }
            let parts = children
                .iter()
                .map(|c| render_node(c, bindings))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", parts.join(joiner)))
        }
        StructuredFilter::Comparison(c) => {
            if c.attribute.is_empty()
                || !c
                    .attribute
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            {
                return Err(ChefBoostError::Validation {
                    message: format!("attribute name '{}' cannot be queried", c.attribute),
                });
            }
            let field = format!("facets.{}", c.attribute);
            let expr = match (&c.comparator, &c.value) {
                (Comparator::Eq, FilterValue::Text(want)) => {
                    let p = bind(bindings, Value::String(want.to_lowercase()));
                    format!("{field}.label = ${p}")
                }
                (Comparator::In, FilterValue::List(set)) => {
                    let set = set.iter().map(|w| Value::String(w.to_lowercase())).collect();
                    let p = bind(bindings, Value::Array(set));
                    format!("{field}.label IN ${p}")
                }
                (Comparator::Contains, FilterValue::Text(want)) => {
                    let p = bind(bindings, Value::String(want.to_lowercase()));
                    format!("{field}.items CONTAINS ${p}")
                }
                (cmp, FilterValue::Text(bound)) if cmp.is_range() => match parse_date(bound) {
                    Some(date) => {
                        let p = bind(bindings, Value::String(canonical_date(date)));
                        let op = match cmp {
                            Comparator::Gt => ">",
                            Comparator::Gte => ">=",
                            Comparator::Lt => "<",
                            _ => "<=",
                        };
                        format!("({field}.date != NONE AND {field}.date {op} ${p})")
                    }
                    None => "false".to_string(),
                },
                // Shapes the in-memory evaluation never matches
                _ => "false".to_string(),
            };
            Ok(expr)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DocumentRow {
    content: String,
    #[serde(default)]
    metadata: Option<Value>,
    #[allow(dead_code)]
    similarity: Option<f32>,
}

/// SurrealDB-backed store over one table (`recipes` or `books`).
pub struct SurrealStore {
    db: Arc<Surreal<Client>>,
    table: String,
    embedder: Arc<dyn Embedder>,
}

/// Expects host:port without a scheme.
fn normalize_ws_url(s: &str) -> String {
    s.strip_prefix("ws://")
        .or_else(|| s.strip_prefix("wss://"))
        .or_else(|| s.strip_prefix("http://"))
        .or_else(|| s.strip_prefix("https://"))
        .unwrap_or(s)
        .to_string()
}

/// Open one authenticated connection, shared by every store.
pub async fn connect(config: &Config) -> Result<Arc<Surreal<Client>>> {
    let url = normalize_ws_url(&config.system.database_url);
    info!("Connecting to SurrealDB at {}", url);
    let db = Surreal::new::<Ws>(url.as_str())
        .await
        .map_err(|e| ChefBoostError::Database {
            message: format!(
                "Failed to connect to SurrealDB at {}: {}",
                config.system.database_url, e
            ),
        })?;

    db.signin(surrealdb::opt::auth::Root {
        username: config.runtime.database_user.as_str(),
        password: config.runtime.database_pass.as_str(),
    })
    .await
    .map_err(|e| ChefBoostError::Database {
        message: format!(
            "Failed to authenticate with SurrealDB as user '{}': {}",
            config.runtime.database_user, e
        ),
    })?;

    db.use_ns(config.system.database_ns.as_str())
        .use_db(config.system.database_db.as_str())
        .await?;

    Ok(Arc::new(db))
}

impl SurrealStore {
    pub fn new(db: Arc<Surreal<Client>>, table: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            db,
            table: table.into(),
            embedder,
        }
    }

    /// Define the table and its HNSW index if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let dim = self.embedder.dimensions();
        let t = &self.table;
        let sql = format!(
            r#"
            DEFINE TABLE IF NOT EXISTS {t} SCHEMAFULL;
            DEFINE FIELD IF NOT EXISTS content ON TABLE {t} TYPE string;
            DEFINE FIELD IF NOT EXISTS metadata ON TABLE {t} FLEXIBLE TYPE object;
            DEFINE FIELD IF NOT EXISTS facets ON TABLE {t} FLEXIBLE TYPE object;
            DEFINE FIELD IF NOT EXISTS embedding ON TABLE {t} TYPE array<float>;
            DEFINE INDEX IF NOT EXISTS {t}_embedding_idx ON TABLE {t} FIELDS embedding HNSW DIMENSION {dim} DIST COSINE;
            "#
        );
        self.db.query(sql).await?.check()?;
        info!("Schema ready for table {} (dim={})", t, dim);
        Ok(())
    }

    pub async fn add_documents(&self, docs: Vec<Document>) -> Result<usize> {
        let mut n = 0;
        for doc in docs {
            let embedding = self.embed(&doc.content).await?;
            let doc_facets = facets(&doc.metadata);
            self.db
                .query("CREATE type::table($table) CONTENT { content: $content, metadata: $metadata, facets: $facets, embedding: $embedding }")
                .bind(("table", self.table.clone()))
                .bind(("content", doc.content))
                .bind(("metadata", Value::Object(doc.metadata)))
                .bind(("facets", Value::Object(doc_facets)))
                .bind(("embedding", embedding))
                .await?
                .check()?;
            n += 1;
        }
        debug!("Inserted {} documents into {}", n, self.table);
        Ok(n)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| ChefBoostError::Embedding {
                message: e.to_string(),
            })
    }

    async fn search(
        &self,
        query: &str,
        filter: Option<&StructuredFilter>,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        let q = self.embed(query).await?;
        let rendered = filter.map(render_filter).transpose()?;

        let mut sql = "SELECT content, metadata, vector::similarity::cosine(embedding, $q) AS similarity \
             FROM type::table($table) WHERE embedding IS NOT NULL"
            .to_string();
        if let Some(f) = &rendered {
            sql.push_str(" AND ");
            sql.push_str(&f.clause);
        }
        sql.push_str(" ORDER BY similarity DESC LIMIT $limit");

        let mut query = self
            .db
            .query(sql)
            .bind(("q", q))
            .bind(("table", self.table.clone()))
            .bind(("limit", top_k as i64));
        if let Some(f) = rendered {
            for binding in f.bindings {
                query = query.bind(binding);
            }
        }
        let rows: Vec<DocumentRow> = query.await?.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let metadata = match row.metadata {
                    Some(Value::Object(m)) => m,
                    Some(other) => {
                        warn!("non-object metadata in {}: {}", self.table, other);
                        Default::default()
                    }
                    None => Default::default(),
                };
                Document {
                    content: row.content,
                    metadata,
                }
            })
            .collect())
    }
}

#[async_trait]
impl DocumentStore for SurrealStore {
    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<Document>> {
        self.search(query, None, top_k).await
    }

    async fn filtered_search(
        &self,
        query: &str,
        filter: &StructuredFilter,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        self.search(query, Some(filter), top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_value_is_bound_as_a_parameter() {
        let filter = StructuredFilter::And(vec![
            StructuredFilter::comparison(
                "cuisine",
                Comparator::In,
                FilterValue::List(vec!["italian".into(), "french".into()]),
            ),
            StructuredFilter::Or(vec![
                StructuredFilter::comparison(
                    "special_considerations",
                    Comparator::Contains,
                    FilterValue::Text("vegan".into()),
                ),
                StructuredFilter::comparison(
                    "date_issued",
                    Comparator::Lt,
                    FilterValue::Text("1900-01-01".into()),
                ),
            ]),
        ]);
        let rendered = render_filter(&filter).unwrap();
        assert_eq!(
            rendered.clause,
            "(facets.cuisine.label IN $f0 AND (facets.special_considerations.items CONTAINS $f1 OR (facets.date_issued.date != NONE AND facets.date_issued.date < $f2)))"
        );
        assert_eq!(rendered.bindings.len(), 3);
        assert!(!rendered.clause.contains("vegan"));
        assert_eq!(
            rendered.bindings[0],
            ("f0".to_string(), serde_json::json!(["italian", "french"]))
        );
    }

    #[test]
    fn mixed_case_title_binds_the_stored_label_form() {
        let filter = StructuredFilter::comparison(
            "title",
            Comparator::Eq,
            FilterValue::Text("Soda Bread".into()),
        );
        let rendered = render_filter(&filter).unwrap();
        assert_eq!(rendered.clause, "facets.title.label = $f0");
        assert_eq!(rendered.bindings[0].1, serde_json::json!("soda bread"));

        let stored = facets(
            serde_json::json!({"title": "Soda Bread"})
                .as_object()
                .unwrap(),
        );
        assert_eq!(stored["title"]["label"], rendered.bindings[0].1);
    }

    #[test]
    fn bare_year_dates_compare_as_calendar_dates() {
        let filter = StructuredFilter::comparison(
            "date_issued",
            Comparator::Gte,
            FilterValue::Text("1900".into()),
        );
        let rendered = render_filter(&filter).unwrap();
        assert_eq!(
            rendered.clause,
            "(facets.date_issued.date != NONE AND facets.date_issued.date >= $f0)"
        );
        assert_eq!(rendered.bindings[0].1, serde_json::json!("1900-01-01"));

        let stored = facets(
            serde_json::json!({"date_issued": "1900"})
                .as_object()
                .unwrap(),
        );
        assert_eq!(stored["date_issued"]["date"], "1900-01-01");
    }

    #[test]
    fn shapes_that_never_match_render_false() {
        let unparsable = StructuredFilter::comparison(
            "date_issued",
            Comparator::Lt,
            FilterValue::Text("someday".into()),
        );
        let eq_list = StructuredFilter::comparison(
            "cuisine",
            Comparator::Eq,
            FilterValue::List(vec!["thai".into()]),
        );
        for filter in [unparsable, eq_list] {
            let rendered = render_filter(&filter).unwrap();
            assert_eq!(rendered.clause, "false");
            assert!(rendered.bindings.is_empty());
        }
    }

    #[test]
    fn hostile_attribute_names_are_rejected() {
        let filter = StructuredFilter::comparison(
            "cuisine = 1 OR true; --",
            Comparator::Eq,
            FilterValue::Text("x".into()),
        );
        assert!(render_filter(&filter).is_err());
    }

    #[test]
    fn ws_url_scheme_is_stripped() {
        assert_eq!(normalize_ws_url("ws://127.0.0.1:8000"), "127.0.0.1:8000");
        assert_eq!(normalize_ws_url("127.0.0.1:8000"), "127.0.0.1:8000");
    }
}
