//! Boolean metadata filter produced by the query translator

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::retrieval::normalize::{coerce_string_list, normalize_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    In,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim().to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "in" => Some(Self::In),
            "contain" | "contains" => Some(Self::Contains),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::In => "in",
            Self::Contains => "contains",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub attribute: String,
    pub comparator: Comparator,
    pub value: FilterValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredFilter {
    And(Vec<StructuredFilter>),
    Or(Vec<StructuredFilter>),
    Comparison(Comparison),
}

impl StructuredFilter {
    pub fn comparison(attribute: &str, comparator: Comparator, value: FilterValue) -> Self {
        Self::Comparison(Comparison {
            attribute: attribute.to_string(),
            comparator,
            value,
        })
    }

    /// Every attribute name referenced anywhere in the tree.
    pub fn attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for c in children {
                    c.collect_attributes(out);
                }
            }
            Self::Comparison(c) => out.push(c.attribute.as_str()),
        }
    }

    /// Evaluate against a raw metadata map. Missing attributes never match.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.matches(metadata)),
            Self::Or(children) => children.iter().any(|c| c.matches(metadata)),
            Self::Comparison(c) => c.matches(metadata),
        }
    }
}

impl Comparison {
    fn matches(&self, metadata: &Map<String, Value>) -> bool {
        let Some(raw) = metadata.get(&self.attribute) else {
            return false;
        };
        match (&self.comparator, &self.value) {
            (Comparator::Eq, FilterValue::Text(want)) => {
                normalize_label(raw).is_some_and(|have| have == want.to_lowercase())
            }
            (Comparator::In, FilterValue::List(set)) => normalize_label(raw)
                .is_some_and(|have| set.iter().any(|w| w.to_lowercase() == have)),
            (Comparator::Contains, FilterValue::Text(want)) => {
                let want = want.to_lowercase();
                coerce_string_list(raw).iter().any(|v| *v == want)
            }
            (cmp, FilterValue::Text(bound)) if cmp.is_range() => {
                let (Some(have), Some(bound)) =
                    (raw.as_str().and_then(parse_date), parse_date(bound))
                else {
                    return false;
                };
                match cmp {
                    Comparator::Gt => have > bound,
                    Comparator::Gte => have >= bound,
                    Comparator::Lt => have < bound,
                    _ => have <= bound,
                }
            }
            _ => false,
        }
    }
}

/// Canonical forms of each metadata value, stored beside the raw metadata so
/// a database evaluating `=`, `IN`, `CONTAINS` and ordering over them reaches
/// the same verdict as [`StructuredFilter::matches`] on the raw map.
///
/// Every attribute maps to `{label?, items, date?}`: the normalized label for
/// string values, the coerced list, and the calendar date when one parses.
pub fn facets(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(key, raw)| {
            let mut forms = Map::new();
            if let Some(label) = normalize_label(raw) {
                forms.insert("label".into(), Value::String(label));
            }
            let items = coerce_string_list(raw).into_iter().map(Value::String).collect();
            forms.insert("items".into(), Value::Array(items));
            if let Some(date) = raw.as_str().and_then(parse_date) {
                forms.insert("date".into(), Value::String(canonical_date(date)));
            }
            (key.clone(), Value::Object(forms))
        })
        .collect()
}

/// `YYYY-MM-DD`; sorts lexically in calendar order.
pub fn canonical_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Lenient date reading: `YYYY-MM-DD`, an RFC 3339 timestamp, or a bare year.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if s.len() == 4
        && let Ok(year) = s.parse::<i32>()
    {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}
