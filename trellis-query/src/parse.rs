use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use trellis_client::ConfiguredFields;
use trellis_common::time_format::TimestampFormat;
use trellis_types::frame::{FieldConfig, FieldValues, Frame, FrameField};
use trellis_types::query::{BucketAgg, BucketAggKind, MetricAgg, MetricKind, Query};
use trellis_types::result::{DataResponse, QueryDataResponse};
use trellis_types::settings::coerce_f64;

use crate::docs::{
    process_logs_response, process_raw_data_response, process_raw_document_response,
};

const FILTER_LABEL_KEY: &str = "filter";
const UNKNOWN_ERROR: &str = "Unknown elasticsearch error response";

/// Converts the raw per-query response bodies (order-matched 1:1 to the
/// submitted queries) into per-ref-id results. A response entry carrying
/// an error marker only fails its own query; siblings parse normally.
pub fn parse_response(
    responses: &[Value],
    queries: &[Query],
    configured: &ConfiguredFields,
) -> QueryDataResponse {
    let time_format = TimestampFormat::parse(&configured.time_output_format);
    let mut out = QueryDataResponse::new();

    for (query, response) in queries.iter().zip(responses) {
        let result = parse_single_response(response, query, configured, time_format.as_ref());
        out.insert(query.ref_id.clone(), result);
    }

    out
}

fn parse_single_response(
    response: &Value,
    query: &Query,
    configured: &ConfiguredFields,
    time_format: Option<&TimestampFormat>,
) -> DataResponse {
    if let Some(error) = response.get("error") {
        let status = response
            .get("status")
            .and_then(Value::as_i64)
            .map_or(500, |s| s as u16);
        return DataResponse::error(status, error_reason(error));
    }

    if query.is_logs_query() {
        DataResponse::frames(vec![process_logs_response(
            response,
            query,
            configured,
            time_format,
        )])
    } else if query.is_raw_data_query() {
        DataResponse::frames(vec![process_raw_data_response(
            response,
            query,
            configured,
            time_format,
        )])
    } else if query.is_raw_document_query() {
        DataResponse::frames(vec![process_raw_document_response(response, query)])
    } else {
        DataResponse::frames(process_time_series_response(response, query))
    }
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn error_reason(error: &Value) -> String {
    if let Value::String(message) = error {
        return message.clone();
    }

    if let Some(reason) = non_empty(error.pointer("/root_cause/0/reason")) {
        return reason.to_string();
    }
    if let Some(reason) = non_empty(error.get("reason")) {
        return reason.to_string();
    }
    if let Some(reason) = non_empty(error.pointer("/caused_by/reason")) {
        return reason.to_string();
    }

    UNKNOWN_ERROR.to_string()
}

/// One accumulated (label path, metric) time series, named after the walk.
struct Series {
    labels: Vec<(String, String)>,
    metric_index: usize,
    metric_label: String,
    times: Vec<Option<DateTime<Utc>>>,
    values: Vec<Option<f64>>,
}

enum TableValues {
    String(Vec<Option<String>>),
    Number(Vec<Option<f64>>),
}

impl TableValues {
    fn into_field_values(self) -> FieldValues {
        match self {
            TableValues::String(v) => FieldValues::String(v),
            TableValues::Number(v) => FieldValues::Number(v),
        }
    }
}

enum ColumnSource {
    Label(usize),
    BucketKey,
    Metric { metric_index: usize, extractor: ValueExtractor },
}

struct TableColumn {
    name: String,
    source: ColumnSource,
    values: TableValues,
}

/// Flat table accumulated across every terminal bucket list of the walk
/// when the innermost aggregation is not a date histogram.
#[derive(Default)]
struct Table {
    columns: Vec<TableColumn>,
}

#[derive(Default)]
struct WalkAcc {
    series: Vec<Series>,
    table: Option<Table>,
}

fn process_time_series_response(response: &Value, query: &Query) -> Vec<Frame> {
    let Some(aggs) = response.get("aggregations").and_then(Value::as_object) else {
        return Vec::new();
    };
    if query.bucket_aggs.is_empty() {
        return Vec::new();
    }

    let mut acc = WalkAcc::default();
    walk_buckets(aggs, query, 0, &mut Vec::new(), &mut acc);

    trim_edges(query, &mut acc.series);

    let mut frames = name_series(query, acc.series);
    if let Some(table) = acc.table {
        frames.push(table_into_frame(table));
    }
    frames
}

/// Recursive descent over the nested bucket tree. By construction the
/// bucket aggregation at depth `d` is `query.bucket_aggs[d]`, located in
/// the response object by its id.
fn walk_buckets(
    aggs: &Map<String, Value>,
    query: &Query,
    depth: usize,
    labels: &mut Vec<(String, String)>,
    acc: &mut WalkAcc,
) {
    let Some(bucket_agg) = query.bucket_aggs.get(depth) else {
        return;
    };
    let Some(agg_value) = aggs.get(&bucket_agg.id) else {
        return;
    };

    if depth == query.bucket_aggs.len() - 1 {
        if bucket_agg.kind == BucketAggKind::DateHistogram {
            process_metric_buckets(agg_value, query, labels, acc);
        } else {
            process_table_buckets(agg_value, bucket_agg, query, labels, acc);
        }
        return;
    }

    match agg_value.get("buckets") {
        Some(Value::Array(buckets)) => {
            for bucket in buckets {
                let Some(bucket_obj) = bucket.as_object() else {
                    continue;
                };
                labels.push((bucket_agg.field.clone(), bucket_key_label(bucket_obj)));
                walk_buckets(bucket_obj, query, depth + 1, labels, acc);
                labels.pop();
            }
        }
        // filters aggregations key their buckets by filter label
        Some(Value::Object(keyed)) => {
            for (key, bucket) in keyed {
                let Some(bucket_obj) = bucket.as_object() else {
                    continue;
                };
                labels.push((FILTER_LABEL_KEY.to_string(), key.clone()));
                walk_buckets(bucket_obj, query, depth + 1, labels, acc);
                labels.pop();
            }
        }
        _ => {}
    }
}

fn bucket_key_label(bucket: &Map<String, Value>) -> String {
    if let Some(key_as_string) = non_empty(bucket.get("key_as_string")) {
        return key_as_string.to_string();
    }
    match bucket.get("key") {
        Some(Value::String(key)) => key.clone(),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|i| i.to_string())
            .unwrap_or_else(|| n.to_string()),
        _ => String::new(),
    }
}

/// How to pull one scalar out of a bucket's per-metric payload.
#[derive(Clone)]
enum ValueExtractor {
    DocCount,
    MetricValue,
    Percentile(String),
    Stat(String),
    TopMetric(String),
}

fn extract_value(bucket: &Value, metric_id: &str, extractor: &ValueExtractor) -> Option<f64> {
    let value = match extractor {
        ValueExtractor::DocCount => bucket.get("doc_count"),
        ValueExtractor::MetricValue => bucket.get(metric_id).and_then(|m| m.get("value")),
        ValueExtractor::Percentile(percent) => bucket
            .get(metric_id)
            .and_then(|m| m.get("values"))
            .and_then(|values| values.get(percent)),
        ValueExtractor::Stat(stat) => match stat.as_str() {
            "std_deviation_bounds_upper" => bucket
                .get(metric_id)
                .and_then(|m| m.pointer("/std_deviation_bounds/upper")),
            "std_deviation_bounds_lower" => bucket
                .get(metric_id)
                .and_then(|m| m.pointer("/std_deviation_bounds/lower")),
            _ => bucket.get(metric_id).and_then(|m| m.get(stat)),
        },
        ValueExtractor::TopMetric(name) => bucket
            .get(metric_id)
            .and_then(|m| m.pointer("/top/0/metrics"))
            .and_then(|metrics| metrics.get(name)),
    };

    value.and_then(coerce_f64)
}

/// Expands one metric into its emitted value streams: most metrics yield
/// one, while percentiles, extended stats and top metrics fan out.
fn metric_expansions(
    metric: &MetricAgg,
    first_bucket: Option<&Value>,
) -> Vec<(String, ValueExtractor)> {
    match metric.kind {
        MetricKind::Count => vec![("count".to_string(), ValueExtractor::DocCount)],
        MetricKind::Percentiles => {
            let Some(values) = first_bucket
                .and_then(|b| b.get(&metric.id))
                .and_then(|m| m.get("values"))
                .and_then(Value::as_object)
            else {
                return Vec::new();
            };
            let mut percents: Vec<&String> = values.keys().collect();
            percents.sort_by(|a, b| {
                let a = a.parse::<f64>().unwrap_or(f64::MAX);
                let b = b.parse::<f64>().unwrap_or(f64::MAX);
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            });
            percents
                .into_iter()
                .map(|p| (format!("p{p}"), ValueExtractor::Percentile(p.clone())))
                .collect()
        }
        MetricKind::ExtendedStats => metric
            .meta
            .0
            .iter()
            .filter(|(_, enabled)| enabled.as_bool() == Some(true))
            .map(|(stat, _)| (stat.clone(), ValueExtractor::Stat(stat.clone())))
            .collect(),
        MetricKind::TopMetrics => metric
            .settings
            .get_array("metrics")
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|name| {
                        (
                            format!("Top Metrics {name}"),
                            ValueExtractor::TopMetric(name.to_string()),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default(),
        _ => vec![(
            metric.kind.wire_name().to_string(),
            ValueExtractor::MetricValue,
        )],
    }
}

fn process_metric_buckets(
    agg_value: &Value,
    query: &Query,
    labels: &[(String, String)],
    acc: &mut WalkAcc,
) {
    let Some(buckets) = agg_value.get("buckets").and_then(Value::as_array) else {
        return;
    };

    let times: Vec<Option<DateTime<Utc>>> = buckets
        .iter()
        .map(|bucket| {
            bucket
                .get("key")
                .and_then(coerce_f64)
                .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
        })
        .collect();

    for (metric_index, metric) in query.metrics.iter().enumerate() {
        if metric.hide {
            continue;
        }

        for (metric_label, extractor) in metric_expansions(metric, buckets.first()) {
            let values = buckets
                .iter()
                .map(|bucket| extract_value(bucket, &metric.id, &extractor))
                .collect();

            acc.series.push(Series {
                labels: labels.to_vec(),
                metric_index,
                metric_label,
                times: times.clone(),
                values,
            });
        }
    }
}

/// Column name for a metric in table mode. Metrics sharing a kind get
/// their field appended, kind+field duplicates additionally get the metric
/// id; bucket scripts show their script text.
fn table_metric_name(
    metric: &MetricAgg,
    metric_label: &str,
    extractor: &ValueExtractor,
    metrics: &[MetricAgg],
) -> String {
    match extractor {
        ValueExtractor::DocCount => "Count".to_string(),
        ValueExtractor::Percentile(percent) => {
            if metric.field.is_empty() {
                format!("p{percent}")
            } else {
                format!("p{percent} {}", metric.field)
            }
        }
        ValueExtractor::Stat(stat) => {
            let title = title_for_label(stat);
            if metric.field.is_empty() {
                title
            } else {
                format!("{title} {}", metric.field)
            }
        }
        ValueExtractor::TopMetric(_) => metric_label.to_string(),
        ValueExtractor::MetricValue => {
            if metric.kind == MetricKind::BucketScript {
                return metric.settings.get_string_or("script", "");
            }

            let mut name = metric.kind.title().to_string();
            let same_kind: Vec<&MetricAgg> =
                metrics.iter().filter(|m| m.kind == metric.kind).collect();
            if same_kind.len() > 1 {
                if !metric.field.is_empty() {
                    name = format!("{name} {}", metric.field);
                }
                let same_field = same_kind
                    .iter()
                    .filter(|m| m.field == metric.field)
                    .count();
                if same_field > 1 {
                    name = format!("{name} {}", metric.id);
                }
            }
            name
        }
    }
}

fn process_table_buckets(
    agg_value: &Value,
    bucket_agg: &BucketAgg,
    query: &Query,
    labels: &[(String, String)],
    acc: &mut WalkAcc,
) {
    let Some(buckets) = agg_value.get("buckets").and_then(Value::as_array) else {
        return;
    };
    let Some(first_bucket) = buckets.first() else {
        return;
    };

    if acc.table.is_none() {
        let mut columns = Vec::new();

        for (index, (key, _)) in labels.iter().enumerate() {
            columns.push(TableColumn {
                name: key.clone(),
                source: ColumnSource::Label(index),
                values: TableValues::String(Vec::new()),
            });
        }

        let key_values = if first_bucket.get("key").map_or(false, Value::is_string) {
            TableValues::String(Vec::new())
        } else {
            TableValues::Number(Vec::new())
        };
        columns.push(TableColumn {
            name: bucket_agg.field.clone(),
            source: ColumnSource::BucketKey,
            values: key_values,
        });

        for (metric_index, metric) in query.metrics.iter().enumerate() {
            if metric.hide {
                continue;
            }
            for (metric_label, extractor) in metric_expansions(metric, Some(first_bucket)) {
                columns.push(TableColumn {
                    name: table_metric_name(metric, &metric_label, &extractor, &query.metrics),
                    source: ColumnSource::Metric {
                        metric_index,
                        extractor,
                    },
                    values: TableValues::Number(Vec::new()),
                });
            }
        }

        acc.table = Some(Table { columns });
    }

    let table = acc.table.as_mut().expect("table initialized above");
    for bucket in buckets {
        for column in &mut table.columns {
            match &column.source {
                ColumnSource::Label(index) => {
                    let label = labels.get(*index).map(|(_, value)| value.clone());
                    match &mut column.values {
                        TableValues::String(values) => values.push(label),
                        TableValues::Number(_) => {}
                    }
                }
                ColumnSource::BucketKey => match &mut column.values {
                    TableValues::String(values) => values.push(
                        bucket
                            .get("key")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    ),
                    TableValues::Number(values) => {
                        values.push(bucket.get("key").and_then(coerce_f64))
                    }
                },
                ColumnSource::Metric {
                    metric_index,
                    extractor,
                } => {
                    let metric = &query.metrics[*metric_index];
                    let value = extract_value(bucket, &metric.id, extractor);
                    match &mut column.values {
                        TableValues::Number(values) => values.push(value),
                        TableValues::String(_) => {}
                    }
                }
            }
        }
    }
}

fn table_into_frame(table: Table) -> Frame {
    let fields = table
        .columns
        .into_iter()
        .map(|column| {
            let filterable = !matches!(column.source, ColumnSource::Metric { .. });
            let mut field = FrameField::new(column.name, column.values.into_field_values());
            if filterable {
                field = field.with_config(FieldConfig::filterable());
            }
            field
        })
        .collect();

    Frame::new("", fields)
}

/// Drops N leading and trailing buckets from every emitted series; series
/// no longer than 2N trim to empty.
fn trim_edges(query: &Query, series: &mut [Series]) {
    let Some(histogram) = query
        .bucket_aggs
        .iter()
        .find(|b| b.kind == BucketAggKind::DateHistogram)
    else {
        return;
    };
    let Some(trim) = histogram.settings.get_i64("trimEdges").filter(|n| *n > 0) else {
        return;
    };
    let trim = trim as usize;

    for s in series {
        if s.times.len() > trim * 2 {
            let end = s.times.len() - trim;
            s.times = s.times[trim..end].to_vec();
            s.values = s.values[trim..end].to_vec();
        } else {
            s.times.clear();
            s.values.clear();
        }
    }
}

fn title_for_label(label: &str) -> String {
    match label {
        "count" => "Count",
        "avg" => "Average",
        "sum" => "Sum",
        "max" => "Max",
        "min" => "Min",
        "extended_stats" => "Extended Stats",
        "percentiles" => "Percentiles",
        "top_metrics" => "Top Metrics",
        "cardinality" => "Unique Count",
        "rate" => "Rate",
        "moving_avg" => "Moving Average",
        "moving_fn" => "Moving Function",
        "derivative" => "Derivative",
        "cumulative_sum" => "Cumulative Sum",
        "serial_diff" => "Serial Difference",
        "bucket_script" => "Bucket Script",
        "std_deviation" => "Std Dev",
        "std_deviation_bounds_upper" => "Std Dev Upper",
        "std_deviation_bounds_lower" => "Std Dev Lower",
        "variance" => "Variance",
        "sum_of_squares" => "Sum of Squares",
        other => other,
    }
    .to_string()
}

fn describe_metric(metric: &MetricAgg) -> String {
    if metric.kind == MetricKind::Count {
        return "Count".to_string();
    }
    format!("{} {}", metric.kind.title(), metric.field)
}

fn name_series(query: &Query, series: Vec<Series>) -> Vec<Frame> {
    let metric_label_count = {
        let mut labels: Vec<&str> = series.iter().map(|s| s.metric_label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels.len()
    };

    series
        .into_iter()
        .map(|s| {
            let name = series_name(query, &s, metric_label_count);
            Frame::time_series(name, s.times, s.values)
        })
        .collect()
}

fn metric_base_name(query: &Query, s: &Series, metric: &MetricAgg) -> String {
    if metric.kind.is_pipeline() {
        if metric.kind.has_multiple_bucket_paths() {
            // The series carries the script text, with each variable
            // described through the metric it references.
            let mut name = metric.settings.get_string_or("script", "");
            for variable in &metric.pipeline_variables {
                if let Some(referenced) = query.find_metric(&variable.pipeline_agg) {
                    name = name.replace(
                        &format!("params.{}", variable.name),
                        &describe_metric(referenced),
                    );
                }
            }
            return name;
        }

        return match query.find_metric(metric.pipeline_agg_field()) {
            Some(referenced) => format!(
                "{} {}",
                title_for_label(&s.metric_label),
                describe_metric(referenced)
            ),
            None => "Unset".to_string(),
        };
    }

    let mut name = title_for_label(&s.metric_label);
    if !metric.field.is_empty()
        && !matches!(metric.kind, MetricKind::Count | MetricKind::TopMetrics)
    {
        name = format!("{name} {}", metric.field);
    }
    name
}

fn label_value<'a>(s: &'a Series, key: &str) -> Option<&'a str> {
    // innermost matching group wins
    s.labels
        .iter()
        .rev()
        .find(|(label_key, _)| label_key == key)
        .map(|(_, value)| value.as_str())
}

fn find_placeholders(alias: &str) -> Vec<(String, String)> {
    let mut placeholders = Vec::new();
    let mut rest = alias;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            break;
        };
        let full = &rest[start..start + end + 2];
        let inner = full[2..full.len() - 2].trim().to_string();
        placeholders.push((full.to_string(), inner));
        rest = &rest[start + end + 2..];
    }
    placeholders
}

/// Alias template override: `{{term field}}` resolves to the innermost
/// matching group label (empty when absent), `{{metric}}` and `{{field}}`
/// to the plain metric title and field, a bare `{{label}}` to the label
/// value when one exists; anything else stays literal text.
fn apply_alias(query: &Query, s: &Series, metric: &MetricAgg) -> String {
    let mut out = query.alias.clone();

    for (full, inner) in find_placeholders(&query.alias) {
        let replacement = if let Some(field) = inner.strip_prefix("term ") {
            Some(label_value(s, field).unwrap_or_default().to_string())
        } else if inner == "metric" {
            Some(title_for_label(&s.metric_label))
        } else if inner == "field" {
            Some(metric.field.clone())
        } else {
            label_value(s, &inner).map(str::to_string)
        };

        if let Some(replacement) = replacement {
            out = out.replacen(&full, &replacement, 1);
        }
    }

    out
}

fn series_name(query: &Query, s: &Series, metric_label_count: usize) -> String {
    let metric = &query.metrics[s.metric_index];

    if !query.alias.is_empty() {
        return apply_alias(query, s, metric);
    }

    let base_name = metric_base_name(query, s, metric);
    if s.labels.is_empty() {
        return base_name;
    }

    let joined = s
        .labels
        .iter()
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    if metric_label_count == 1 {
        joined
    } else {
        format!("{joined} {base_name}")
    }
}
