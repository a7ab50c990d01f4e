//! Natural-language query -> (structured filter, residual query)

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clients::{LanguageModel, LlmError};
use crate::retrieval::filter::{
    Comparator, FilterValue, StructuredFilter, canonical_date, parse_date,
};
use crate::retrieval::schema::{AttributeInfo, AttributeKind, MetadataSchema};
use crate::utils::{Expired, bounded};

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

const NO_FILTER: &str = "NO_FILTER";

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub filter: Option<StructuredFilter>,
    pub residual_query: String,
}

impl Translation {
    fn unfiltered(query: &str) -> Self {
        Self {
            filter: None,
            residual_query: query.to_string(),
        }
    }
}

/// Why a translation was discarded. Always recovered from, never surfaced.
#[derive(Debug, Error)]
pub enum TranslationFailure {
    #[error("language model failed: {0}")]
    Llm(#[from] LlmError),
    #[error("translation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("malformed translator output: {0}")]
    Parse(String),
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),
    #[error("operator '{op}' not valid for attribute '{attribute}'")]
    IncompatibleOperator { attribute: String, op: String },
    #[error("value '{value}' not allowed for attribute '{attribute}'")]
    DisallowedValue { attribute: String, value: String },
    #[error("'{value}' is not a date (attribute '{attribute}')")]
    InvalidDate { attribute: String, value: String },
}

impl From<Expired> for TranslationFailure {
    fn from(e: Expired) -> Self {
        TranslationFailure::Timeout {
            timeout_ms: e.timeout_ms,
        }
    }
}

pub struct QueryTranslator {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl QueryTranslator {
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// One completion; on any failure the query passes through unfiltered.
    pub async fn translate(&self, query: &str, schema: &MetadataSchema) -> Translation {
        match self.try_translate(query, schema).await {
            Ok(t) => {
                debug!(filter = ?t.filter, residual = %t.residual_query, "query translated");
                t
            }
            Err(e) => {
                warn!("query translation failed, searching unfiltered: {}", e);
                Translation::unfiltered(query)
            }
        }
    }

    async fn try_translate(
        &self,
        query: &str,
        schema: &MetadataSchema,
    ) -> Result<Translation, TranslationFailure> {
        let prompt = build_prompt(query, schema);
        let raw = bounded("query_translation", self.timeout, async {
            Ok::<_, TranslationFailure>(self.llm.complete(&prompt).await?)
        })
        .await?;
        parse_translation(&raw, schema, query)
    }
}

pub fn build_prompt(query: &str, schema: &MetadataSchema) -> String {
    let attributes =
        serde_json::to_string_pretty(&schema.attributes).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"Your goal is to structure the user's query to match the request schema provided below.

Documents: {description}

Filterable attributes:
{attributes}

Respond with a single JSON object and nothing else:
{{"query": "<text to match against document contents>", "filter": <filter>}}

<filter> is either the string "{no_filter}" or an expression:
  {{"and": [<filter>, ...]}}
  {{"or": [<filter>, ...]}}
  {{"<op>": ["<attribute>", <value>]}}

Operators:
  eq       string, enum or date attributes
  in       string or enum attributes; value is a list of strings
  contains list attributes; value is a single string
  gt, gte, lt, lte  date attributes only; value is YYYY-MM-DD

Only use attributes listed above and, where a list of allowed values is given, only those values.
Remove from "query" anything already expressed by the filter. If nothing in the query maps to an attribute, use "{no_filter}".

User query: {query}"#,
        description = schema.content_description,
        no_filter = NO_FILTER,
    )
}

/// Parse and validate raw model output against `schema`.
pub fn parse_translation(
    raw: &str,
    schema: &MetadataSchema,
    query: &str,
) -> Result<Translation, TranslationFailure> {
    let body = extract_json(raw).ok_or_else(|| TranslationFailure::Parse(truncate(raw)))?;
    let value: Value =
        serde_json::from_str(body).map_err(|e| TranslationFailure::Parse(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| TranslationFailure::Parse("expected a JSON object".into()))?;

    let residual = obj
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or(query)
        .to_string();

    let filter = match obj.get("filter") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case(NO_FILTER) => None,
        Some(expr) => Some(parse_expr(expr, schema)?),
    };

    Ok(Translation {
        filter,
        residual_query: residual,
    })
}

fn extract_json(raw: &str) -> Option<&str> {
    if let Some(caps) = FENCE_RE.captures(raw)
        && let Some(m) = caps.get(1)
    {
        return Some(m.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn truncate(raw: &str) -> String {
    raw.chars().take(120).collect()
}

fn parse_expr(expr: &Value, schema: &MetadataSchema) -> Result<StructuredFilter, TranslationFailure> {
    let obj = expr
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| TranslationFailure::Parse(format!("bad filter node: {expr}")))?;
    let Some((op, args)) = obj.iter().next() else {
        return Err(TranslationFailure::Parse("empty filter node".into()));
    };

    match op.to_ascii_lowercase().as_str() {
        "and" | "or" => {
            let children = args
                .as_array()
                .filter(|a| !a.is_empty())
                .ok_or_else(|| TranslationFailure::Parse(format!("'{op}' needs a non-empty list")))?
                .iter()
                .map(|c| parse_expr(c, schema))
                .collect::<Result<Vec<_>, _>>()?;
            if op.eq_ignore_ascii_case("and") {
                Ok(StructuredFilter::And(children))
            } else {
                Ok(StructuredFilter::Or(children))
            }
        }
        other => {
            let comparator = Comparator::parse(other)
                .ok_or_else(|| TranslationFailure::Parse(format!("unknown operator '{other}'")))?;
            let pair = args
                .as_array()
                .filter(|a| a.len() == 2)
                .ok_or_else(|| {
                    TranslationFailure::Parse(format!("'{other}' needs [attribute, value]"))
                })?;
            let name = pair[0]
                .as_str()
                .ok_or_else(|| TranslationFailure::Parse("attribute must be a string".into()))?;
            let attr = schema
                .get(name)
                .ok_or_else(|| TranslationFailure::UnknownAttribute(name.to_string()))?;
            let value = validate_value(attr, comparator, &pair[1])?;
            Ok(StructuredFilter::comparison(&attr.name, comparator, value))
        }
    }
}

fn operator_fits(kind: AttributeKind, comparator: Comparator) -> bool {
    match comparator {
        Comparator::Eq => matches!(
            kind,
            AttributeKind::String | AttributeKind::Enum | AttributeKind::Date
        ),
        Comparator::In => matches!(kind, AttributeKind::String | AttributeKind::Enum),
        Comparator::Contains => kind == AttributeKind::ListOfString,
        _ => kind == AttributeKind::Date,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn validate_value(
    attr: &AttributeInfo,
    comparator: Comparator,
    raw: &Value,
) -> Result<FilterValue, TranslationFailure> {
    if !operator_fits(attr.kind, comparator) {
        return Err(TranslationFailure::IncompatibleOperator {
            attribute: attr.name.clone(),
            op: comparator.as_str().to_string(),
        });
    }

    let check = |text: String| -> Result<String, TranslationFailure> {
        if attr.kind == AttributeKind::Date {
            return parse_date(&text)
                .map(canonical_date)
                .ok_or_else(|| TranslationFailure::InvalidDate {
                    attribute: attr.name.clone(),
                    value: text.clone(),
                });
        }
        if !attr.allows(&text) {
            return Err(TranslationFailure::DisallowedValue {
                attribute: attr.name.clone(),
                value: text,
            });
        }
        Ok(text.to_lowercase())
    };

    if comparator == Comparator::In {
        let items = raw.as_array().ok_or_else(|| {
            TranslationFailure::Parse(format!("'in' on '{}' needs a list", attr.name))
        })?;
        let values = items
            .iter()
            .map(|v| {
                scalar_text(v)
                    .ok_or_else(|| TranslationFailure::Parse(format!("bad list item {v}")))
                    .and_then(check)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.is_empty() {
            return Err(TranslationFailure::Parse(format!(
                "'in' on '{}' needs at least one value",
                attr.name
            )));
        }
        return Ok(FilterValue::List(values));
    }

    let text = scalar_text(raw)
        .ok_or_else(|| TranslationFailure::Parse(format!("bad value for '{}': {raw}", attr.name)))?;
    Ok(FilterValue::Text(check(text)?))
}
