use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketAggKind {
    DateHistogram,
    Histogram,
    Terms,
    Filters,
    Nested,
    GeohashGrid,
}

impl BucketAggKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            BucketAggKind::DateHistogram => "date_histogram",
            BucketAggKind::Histogram => "histogram",
            BucketAggKind::Terms => "terms",
            BucketAggKind::Filters => "filters",
            BucketAggKind::Nested => "nested",
            BucketAggKind::GeohashGrid => "geohash_grid",
        }
    }

    /// date_histogram falls back to the configured time field and filters
    /// needs no field at all; everything else must name one.
    pub fn requires_field(self) -> bool {
        !matches!(self, BucketAggKind::DateHistogram | BucketAggKind::Filters)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketAgg {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BucketAggKind,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Count,
    Avg,
    Sum,
    Max,
    Min,
    ExtendedStats,
    Percentiles,
    TopMetrics,
    Cardinality,
    Rate,
    MovingAvg,
    MovingFn,
    Derivative,
    CumulativeSum,
    SerialDiff,
    BucketScript,
    RawData,
    RawDocument,
    Logs,
}

impl MetricKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            MetricKind::Count => "count",
            MetricKind::Avg => "avg",
            MetricKind::Sum => "sum",
            MetricKind::Max => "max",
            MetricKind::Min => "min",
            MetricKind::ExtendedStats => "extended_stats",
            MetricKind::Percentiles => "percentiles",
            MetricKind::TopMetrics => "top_metrics",
            MetricKind::Cardinality => "cardinality",
            MetricKind::Rate => "rate",
            MetricKind::MovingAvg => "moving_avg",
            MetricKind::MovingFn => "moving_fn",
            MetricKind::Derivative => "derivative",
            MetricKind::CumulativeSum => "cumulative_sum",
            MetricKind::SerialDiff => "serial_diff",
            MetricKind::BucketScript => "bucket_script",
            MetricKind::RawData => "raw_data",
            MetricKind::RawDocument => "raw_document",
            MetricKind::Logs => "logs",
        }
    }

    /// Human title used for series and column names.
    pub fn title(self) -> &'static str {
        match self {
            MetricKind::Count => "Count",
            MetricKind::Avg => "Average",
            MetricKind::Sum => "Sum",
            MetricKind::Max => "Max",
            MetricKind::Min => "Min",
            MetricKind::ExtendedStats => "Extended Stats",
            MetricKind::Percentiles => "Percentiles",
            MetricKind::TopMetrics => "Top Metrics",
            MetricKind::Cardinality => "Unique Count",
            MetricKind::Rate => "Rate",
            MetricKind::MovingAvg => "Moving Average",
            MetricKind::MovingFn => "Moving Function",
            MetricKind::Derivative => "Derivative",
            MetricKind::CumulativeSum => "Cumulative Sum",
            MetricKind::SerialDiff => "Serial Difference",
            MetricKind::BucketScript => "Bucket Script",
            MetricKind::RawData => "Raw Data",
            MetricKind::RawDocument => "Raw Document",
            MetricKind::Logs => "Logs",
        }
    }

    /// Pipeline metrics compute over sibling aggregation outputs instead of
    /// raw documents, referenced through a buckets_path expression.
    pub fn is_pipeline(self) -> bool {
        matches!(
            self,
            MetricKind::MovingAvg
                | MetricKind::MovingFn
                | MetricKind::Derivative
                | MetricKind::CumulativeSum
                | MetricKind::SerialDiff
                | MetricKind::BucketScript
        )
    }

    pub fn has_multiple_bucket_paths(self) -> bool {
        matches!(self, MetricKind::BucketScript)
    }

    pub fn supports_inline_script(self) -> bool {
        matches!(
            self,
            MetricKind::Avg
                | MetricKind::Sum
                | MetricKind::Max
                | MetricKind::Min
                | MetricKind::ExtendedStats
                | MetricKind::Percentiles
                | MetricKind::Cardinality
                | MetricKind::MovingFn
                | MetricKind::Derivative
                | MetricKind::CumulativeSum
                | MetricKind::BucketScript
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineVariable {
    pub name: String,
    #[serde(rename = "pipelineAgg")]
    pub pipeline_agg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricAgg {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub hide: bool,
    #[serde(default, rename = "pipelineAgg")]
    pub pipeline_agg: String,
    #[serde(default, rename = "pipelineVariables")]
    pub pipeline_variables: Vec<PipelineVariable>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub meta: Settings,
}

impl MetricAgg {
    /// The single bucket-path reference of a pipeline metric. The frontend
    /// stores it in `field`, older persisted queries in `pipelineAgg`, so
    /// both are honored, field winning.
    pub fn pipeline_agg_field(&self) -> &str {
        if !self.field.is_empty() {
            &self.field
        } else {
            &self.pipeline_agg
        }
    }
}

/// Inbound panel target shape, one per dashboard panel query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelQuery {
    pub ref_id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub bucket_aggs: Vec<BucketAgg>,
    #[serde(default)]
    pub metrics: Vec<MetricAgg>,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub interval_ms: i64,
    #[serde(default)]
    pub max_data_points: i64,
}

/// A parsed panel query plus its resolved time range, the unit the request
/// builder and the response parser both work from.
#[derive(Debug, Clone)]
pub struct Query {
    pub ref_id: String,
    pub raw_query: String,
    pub bucket_aggs: Vec<BucketAgg>,
    pub metrics: Vec<MetricAgg>,
    pub alias: String,
    pub interval: Duration,
    pub interval_ms: i64,
    pub max_data_points: i64,
    /// Epoch millis, inclusive.
    pub range_from: i64,
    pub range_to: i64,
}

impl Query {
    pub fn first_metric_kind(&self) -> Option<MetricKind> {
        self.metrics.first().map(|m| m.kind)
    }

    pub fn is_logs_query(&self) -> bool {
        self.first_metric_kind() == Some(MetricKind::Logs)
    }

    pub fn is_raw_data_query(&self) -> bool {
        self.first_metric_kind() == Some(MetricKind::RawData)
    }

    pub fn is_raw_document_query(&self) -> bool {
        self.first_metric_kind() == Some(MetricKind::RawDocument)
    }

    pub fn is_document_query(&self) -> bool {
        self.is_raw_data_query() || self.is_raw_document_query()
    }

    pub fn find_metric(&self, id: &str) -> Option<&MetricAgg> {
        self.metrics.iter().find(|m| m.id == id)
    }
}

pub fn parse_queries(panels: Vec<PanelQuery>, range_from: i64, range_to: i64) -> Vec<Query> {
    panels
        .into_iter()
        .map(|panel| {
            let mut metrics = panel.metrics;
            for metric in &mut metrics {
                metric.settings.scrub_legacy_nulls();
            }

            Query {
                ref_id: panel.ref_id,
                raw_query: panel.query,
                bucket_aggs: panel.bucket_aggs,
                metrics,
                alias: panel.alias,
                interval: Duration::from_millis(panel.interval_ms.max(0) as u64),
                interval_ms: panel.interval_ms,
                max_data_points: panel.max_data_points,
                range_from,
                range_to,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_panel_query() {
        let panel: PanelQuery = serde_json::from_value(json!({
            "refId": "A",
            "query": "level:error",
            "metrics": [
                { "type": "avg", "id": "1", "field": "@value" },
                {
                    "id": "4",
                    "type": "bucket_script",
                    "pipelineVariables": [{ "name": "var1", "pipelineAgg": "1" }],
                    "settings": { "script": "params.var1 * 2", "window": "null" }
                }
            ],
            "bucketAggs": [
                { "type": "terms", "field": "host", "id": "2", "settings": { "size": "10" } },
                { "type": "date_histogram", "field": "@timestamp", "id": "3" }
            ],
            "intervalMs": 15000
        }))
        .unwrap();

        let queries = parse_queries(vec![panel], 1000, 2000);
        assert_eq!(queries.len(), 1);
        let q = &queries[0];

        assert_eq!(q.ref_id, "A");
        assert_eq!(q.interval, Duration::from_millis(15000));
        assert_eq!(q.bucket_aggs[0].kind, BucketAggKind::Terms);
        assert_eq!(q.metrics[1].kind, MetricKind::BucketScript);
        assert_eq!(q.metrics[1].pipeline_variables[0].pipeline_agg, "1");
        // legacy "null" strings are scrubbed from metric settings
        assert!(q.metrics[1].settings.get("window").is_none());
        assert_eq!(q.metrics[1].settings.get_str("script"), Some("params.var1 * 2"));
    }

    #[test]
    fn test_pipeline_agg_field_precedence() {
        let mut metric: MetricAgg = serde_json::from_value(json!({
            "id": "2", "type": "derivative", "pipelineAgg": "1"
        }))
        .unwrap();
        assert_eq!(metric.pipeline_agg_field(), "1");

        metric.field = "3".to_string();
        assert_eq!(metric.pipeline_agg_field(), "3");
    }

    #[test]
    fn test_query_shape_predicates() {
        let panel: PanelQuery = serde_json::from_value(json!({
            "refId": "A",
            "metrics": [{ "type": "logs" }]
        }))
        .unwrap();
        let q = &parse_queries(vec![panel], 0, 0)[0];
        assert!(q.is_logs_query());
        assert!(!q.is_document_query());
    }
}
