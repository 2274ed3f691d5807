use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use trellis_types::query::MetricKind;

/// One filter inside the request's top-level bool query.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Quickwit only supports datetime range filters formatted as RFC3339.
    DateRange {
        field: String,
        gte: String,
        lte: String,
    },
    QueryString {
        query: String,
        analyze_wildcard: bool,
    },
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            Filter::DateRange { field, gte, lte } => json!({
                "range": {
                    field: { "gte": gte, "lte": lte }
                }
            }),
            Filter::QueryString {
                query,
                analyze_wildcard,
            } => json!({
                "query_string": {
                    "query": query,
                    "analyze_wildcard": analyze_wildcard,
                    "default_operator": "AND",
                }
            }),
        };
        value.serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BoolQuery {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Filter>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchQuery {
    #[serde(rename = "bool")]
    pub bool_query: BoolQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

pub fn sort_entry(field: &str, order: SortOrder, format: Option<&str>) -> Value {
    let mut body = Map::new();
    body.insert("order".to_string(), Value::from(order.as_str()));
    if let Some(format) = format {
        body.insert("format".to_string(), Value::from(format));
    }
    json!({ field: body })
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtendedBounds {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateHistogramAgg {
    pub field: String,
    pub fixed_interval: String,
    pub min_doc_count: i64,
    pub extended_bounds: ExtendedBounds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramAgg {
    pub field: String,
    pub interval: i64,
    pub min_doc_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TermsAgg {
    pub field: String,
    pub size: i64,
    pub shard_size: i64,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub order: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_doc_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FiltersAgg {
    /// Display label to query_string filter body.
    pub filters: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NestedAgg {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeohashGridAgg {
    pub field: String,
    pub precision: i64,
}

/// A node body in the aggregation tree: one concrete aggregation kind plus
/// its typed settings. Metric and pipeline bodies stay open maps since
/// their settings pass through to the engine as authored.
#[derive(Debug, Clone)]
pub enum Aggregation {
    DateHistogram(DateHistogramAgg),
    Histogram(HistogramAgg),
    Terms(TermsAgg),
    Filters(FiltersAgg),
    Nested(NestedAgg),
    GeohashGrid(GeohashGridAgg),
    Metric { kind: MetricKind, body: Map<String, Value> },
    Pipeline { kind: MetricKind, body: Map<String, Value> },
}

impl Aggregation {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Aggregation::DateHistogram(_) => "date_histogram",
            Aggregation::Histogram(_) => "histogram",
            Aggregation::Terms(_) => "terms",
            Aggregation::Filters(_) => "filters",
            Aggregation::Nested(_) => "nested",
            Aggregation::GeohashGrid(_) => "geohash_grid",
            Aggregation::Metric { kind, .. } | Aggregation::Pipeline { kind, .. } => {
                kind.wire_name()
            }
        }
    }
}

/// A keyed aggregation-tree node: the key is the query model's agg id and
/// doubles as the response-bucket lookup key on the way back.
#[derive(Debug, Clone)]
pub struct Agg {
    pub key: String,
    pub aggregation: Aggregation,
    pub aggs: Aggs,
}

impl Agg {
    pub fn new(key: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            key: key.into(),
            aggregation,
            aggs: Aggs::default(),
        }
    }

    pub fn with_children(mut self, children: Aggs) -> Self {
        self.aggs = children;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggs(pub Vec<Agg>);

impl Aggs {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct AggNode<'a>(&'a Agg);

impl Serialize for AggNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let agg = self.0;
        let mut map = serializer.serialize_map(None)?;
        match &agg.aggregation {
            Aggregation::DateHistogram(body) => map.serialize_entry(agg.aggregation.wire_name(), body)?,
            Aggregation::Histogram(body) => map.serialize_entry(agg.aggregation.wire_name(), body)?,
            Aggregation::Terms(body) => map.serialize_entry(agg.aggregation.wire_name(), body)?,
            Aggregation::Filters(body) => map.serialize_entry(agg.aggregation.wire_name(), body)?,
            Aggregation::Nested(body) => map.serialize_entry(agg.aggregation.wire_name(), body)?,
            Aggregation::GeohashGrid(body) => map.serialize_entry(agg.aggregation.wire_name(), body)?,
            Aggregation::Metric { body, .. } | Aggregation::Pipeline { body, .. } => {
                map.serialize_entry(agg.aggregation.wire_name(), body)?
            }
        }
        if !agg.aggs.is_empty() {
            map.serialize_entry("aggs", &agg.aggs)?;
        }
        map.end()
    }
}

impl Serialize for Aggs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for agg in &self.0 {
            map.serialize_entry(&agg.key, &AggNode(agg))?;
        }
        map.end()
    }
}

/// One built search request, ready for multi-search encoding. Index and
/// interval ride along for the batch header and the placeholder
/// substitution; neither is part of the serialized body.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    #[serde(skip)]
    pub index: Vec<String>,
    #[serde(skip)]
    pub interval: Duration,
    pub size: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<SearchQuery>,
    #[serde(skip_serializing_if = "Aggs::is_empty")]
    pub aggs: Aggs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_after: Option<Vec<Value>>,
}

impl SearchRequest {
    pub fn new(index: Vec<String>, interval: Duration) -> Self {
        Self {
            index,
            interval,
            size: 0,
            sort: Vec::new(),
            query: None,
            aggs: Aggs::default(),
            search_after: None,
        }
    }

    pub fn add_filter(&mut self, filter: Filter) {
        self.query
            .get_or_insert_with(SearchQuery::default)
            .bool_query
            .filter
            .push(filter);
    }

    pub fn add_sort(&mut self, field: &str, order: SortOrder, format: Option<&str>) {
        self.sort.push(sort_entry(field, order, format));
    }

    pub fn add_search_after(&mut self, value: Value) {
        self.search_after.get_or_insert_with(Vec::new).push(value);
    }
}
