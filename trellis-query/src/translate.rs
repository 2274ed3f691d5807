use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use trellis_client::msearch::INTERVAL_MS_PLACEHOLDER;
use trellis_client::search_request::{
    Agg, Aggregation, Aggs, DateHistogramAgg, ExtendedBounds, Filter, FiltersAgg, GeohashGridAgg,
    HistogramAgg, NestedAgg, SearchRequest, SortOrder, TermsAgg,
};
use trellis_types::query::{BucketAgg, BucketAggKind, MetricAgg, MetricKind, Query};
use trellis_types::settings::Settings;

const DEFAULT_SIZE: i64 = 100;
const DEFAULT_TERMS_SIZE: i64 = 100;
const DEFAULT_HISTOGRAM_INTERVAL: i64 = 1000;

/// The reference behavior disagrees on the default geohash-grid precision
/// between call sites, so it is configuration rather than a constant.
#[derive(Debug, Clone, Copy)]
pub struct GeohashDefaults {
    pub precision: i64,
}

impl Default for GeohashDefaults {
    fn default() -> Self {
        Self { precision: 3 }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("invalid query, missing metrics and aggregations")]
    MissingMetricsAndAggregations,

    #[error("invalid query, bucket aggregation '{id}' (type: {kind}) is missing required field")]
    MissingField { id: String, kind: &'static str },

    #[error("date_histogram aggregation '{id}' has no field specified and the datasource time field is empty")]
    MissingTimeField { id: String },
}

/// Compiles the parsed queries into wire-format search requests, one per
/// query, validating each before any building happens.
pub fn build_search_requests(
    queries: &[Query],
    index: &str,
    default_time_field: &str,
    geohash: GeohashDefaults,
) -> Result<Vec<SearchRequest>, TranslateError> {
    queries
        .iter()
        .map(|query| build_search_request(query, index, default_time_field, geohash))
        .collect()
}

fn validate(query: &Query) -> Result<(), TranslateError> {
    if query.bucket_aggs.is_empty() {
        if query.metrics.is_empty() || !(query.is_logs_query() || query.is_document_query()) {
            return Err(TranslateError::MissingMetricsAndAggregations);
        }
        return Ok(());
    }

    for bucket_agg in &query.bucket_aggs {
        if bucket_agg.kind.requires_field() && bucket_agg.field.is_empty() {
            return Err(TranslateError::MissingField {
                id: bucket_agg.id.clone(),
                kind: bucket_agg.kind.wire_name(),
            });
        }
    }

    Ok(())
}

fn build_search_request(
    query: &Query,
    index: &str,
    default_time_field: &str,
    geohash: GeohashDefaults,
) -> Result<SearchRequest, TranslateError> {
    validate(query)?;

    let indexes = index.split(',').map(str::to_string).collect();
    let mut request = SearchRequest::new(indexes, query.interval);

    request.add_filter(Filter::DateRange {
        field: default_time_field.to_string(),
        gte: epoch_millis_to_rfc3339(query.range_from),
        lte: epoch_millis_to_rfc3339(query.range_to),
    });
    if !query.raw_query.trim().is_empty() {
        request.add_filter(Filter::QueryString {
            query: query.raw_query.clone(),
            analyze_wildcard: true,
        });
    }

    if query.is_logs_query() {
        process_logs_query(query, &mut request, default_time_field);
    } else if query.is_document_query() {
        process_document_query(query, &mut request, default_time_field);
    } else {
        request.aggs = build_bucket_aggs(&query.bucket_aggs, query, default_time_field, geohash)?;
    }

    Ok(request)
}

fn process_logs_query(query: &Query, request: &mut SearchRequest, default_time_field: &str) {
    let metric = &query.metrics[0];

    // Ascending order is only requested by the log-context view, which
    // pages around a selected log line.
    let order = if metric.settings.get_str("sortDirection") == Some("asc") {
        SortOrder::Asc
    } else {
        SortOrder::Desc
    };
    request.add_sort(default_time_field, order, Some("epoch_nanos_int"));
    request.size = metric.settings.get_size_or("limit", DEFAULT_SIZE);

    if let Some(search_after) = metric.settings.get_array("searchAfter") {
        for value in search_after {
            request.add_search_after(value.clone());
        }
    }
}

fn process_document_query(query: &Query, request: &mut SearchRequest, default_time_field: &str) {
    let metric = &query.metrics[0];
    request.add_sort(default_time_field, SortOrder::Desc, Some("epoch_nanos_int"));
    // Stable tiebreak on internal document order.
    request.add_sort("_doc", SortOrder::Desc, None);
    request.size = metric.settings.get_size_or("size", DEFAULT_SIZE);
}

/// Builds the nested bucket chain front-to-back: the first bucket agg is
/// the outermost node, metric aggregations land at the deepest level.
fn build_bucket_aggs(
    bucket_aggs: &[BucketAgg],
    query: &Query,
    default_time_field: &str,
    geohash: GeohashDefaults,
) -> Result<Aggs, TranslateError> {
    let Some((head, rest)) = bucket_aggs.split_first() else {
        return Ok(build_metric_aggs(query));
    };

    let mut children = build_bucket_aggs(rest, query, default_time_field, geohash)?;

    let aggregation = match head.kind {
        BucketAggKind::DateHistogram => date_histogram_agg(head, query, default_time_field)?,
        BucketAggKind::Histogram => histogram_agg(head),
        BucketAggKind::Terms => {
            let (aggregation, order_metric) = terms_agg(head, &query.metrics);
            if let Some(order_metric) = order_metric {
                children.0.insert(0, order_metric);
            }
            aggregation
        }
        BucketAggKind::Filters => match filters_agg(head) {
            Some(aggregation) => aggregation,
            // An empty filter list emits no aggregation; the level
            // collapses and deeper aggs attach to the parent.
            None => return Ok(children),
        },
        BucketAggKind::Nested => Aggregation::Nested(NestedAgg {
            path: head.field.clone(),
        }),
        BucketAggKind::GeohashGrid => Aggregation::GeohashGrid(GeohashGridAgg {
            field: head.field.clone(),
            precision: head.settings.get_i64_or("precision", geohash.precision),
        }),
    };

    Ok(Aggs(vec![
        Agg::new(head.id.clone(), aggregation).with_children(children)
    ]))
}

fn date_histogram_agg(
    bucket_agg: &BucketAgg,
    query: &Query,
    default_time_field: &str,
) -> Result<Aggregation, TranslateError> {
    let field = if bucket_agg.field.is_empty() {
        default_time_field
    } else {
        &bucket_agg.field
    };
    if field.is_empty() {
        return Err(TranslateError::MissingTimeField {
            id: bucket_agg.id.clone(),
        });
    }

    let mut fixed_interval = bucket_agg.settings.get_string_or("interval", "auto");
    if fixed_interval == "auto" {
        // Substitution of the ms placeholder happens on the marshalled
        // body and leaves the trailing unit, yielding e.g. `15000ms`.
        fixed_interval = format!("{INTERVAL_MS_PLACEHOLDER}ms");
    }

    let time_zone = bucket_agg
        .settings
        .get_str("timeZone")
        .filter(|tz| *tz != "utc")
        .map(str::to_string);

    Ok(Aggregation::DateHistogram(DateHistogramAgg {
        field: field.to_string(),
        fixed_interval,
        min_doc_count: bucket_agg.settings.get_i64_or("min_doc_count", 0),
        extended_bounds: ExtendedBounds {
            min: query.range_from,
            max: query.range_to,
        },
        offset: bucket_agg.settings.get_str("offset").map(str::to_string),
        missing: bucket_agg.settings.get_str("missing").map(str::to_string),
        time_zone,
    }))
}

fn histogram_agg(bucket_agg: &BucketAgg) -> Aggregation {
    Aggregation::Histogram(HistogramAgg {
        field: bucket_agg.field.clone(),
        interval: bucket_agg
            .settings
            .get_size_or("interval", DEFAULT_HISTOGRAM_INTERVAL),
        min_doc_count: bucket_agg.settings.get_i64_or("min_doc_count", 0),
        missing: bucket_agg.settings.get_i64("missing"),
    })
}

fn terms_agg(bucket_agg: &BucketAgg, metrics: &[MetricAgg]) -> (Aggregation, Option<Agg>) {
    let mut order = Map::new();
    let mut order_metric = None;

    if let Some(order_by) = bucket_agg.settings.get_str("orderBy") {
        let direction = bucket_agg.settings.get_string_or("order", "desc");

        // Extended stats and percentiles order keys look like
        // `{metricId}[bucket_path]`; everything else is a bare metric id
        // or a reserved key.
        let metric_id: String = order_by.chars().take_while(char::is_ascii_digit).collect();

        if !metric_id.is_empty() {
            if let Some(metric) = metrics.iter().find(|m| m.id == metric_id) {
                if metric.kind == MetricKind::Count {
                    // Count is implicit in every bucket's doc_count.
                    order.insert("_count".to_string(), Value::from(direction));
                } else {
                    order.insert(order_by.to_string(), Value::from(direction));

                    // The ordering metric must exist as a sibling so the
                    // engine can compute it.
                    let mut body = Map::new();
                    if !metric.field.is_empty() {
                        body.insert("field".to_string(), Value::from(metric.field.clone()));
                    }
                    order_metric = Some(Agg::new(
                        metric.id.clone(),
                        Aggregation::Metric {
                            kind: metric.kind,
                            body,
                        },
                    ));
                }
            }
        } else {
            order.insert(order_by.to_string(), Value::from(direction));
        }
    }

    // The ancient `_term` alias is long deprecated in the engine.
    if let Some(direction) = order.remove("_term") {
        order.insert("_key".to_string(), direction);
    }

    let aggregation = Aggregation::Terms(TermsAgg {
        field: bucket_agg.field.clone(),
        size: bucket_agg.settings.get_size_or("size", DEFAULT_TERMS_SIZE),
        shard_size: bucket_agg
            .settings
            .get_size_or("shard_size", DEFAULT_TERMS_SIZE),
        order,
        min_doc_count: bucket_agg.settings.get_i64("min_doc_count"),
        missing: bucket_agg.settings.get_str("missing").map(str::to_string),
    });

    (aggregation, order_metric)
}

fn filters_agg(bucket_agg: &BucketAgg) -> Option<Aggregation> {
    let mut filters = Map::new();

    if let Some(entries) = bucket_agg.settings.get_array("filters") {
        for entry in entries {
            let query = entry.get("query").and_then(Value::as_str).unwrap_or("");
            let label = entry
                .get("label")
                .and_then(Value::as_str)
                .filter(|label| !label.is_empty())
                .unwrap_or(query);
            filters.insert(
                label.to_string(),
                json!({
                    "query_string": { "query": query, "analyze_wildcard": true }
                }),
            );
        }
    }

    if filters.is_empty() {
        None
    } else {
        Some(Aggregation::Filters(FiltersAgg { filters }))
    }
}

fn build_metric_aggs(query: &Query) -> Aggs {
    let mut aggs = Vec::new();

    for metric in &query.metrics {
        if metric.kind == MetricKind::Count {
            // Implicit in every bucket's doc_count.
            continue;
        }

        if metric.kind.is_pipeline() {
            if let Some(agg) = build_pipeline_agg(metric, query) {
                aggs.push(agg);
            }
            continue;
        }

        let mut body = metric_settings_for_dsl(metric);
        if !metric.field.is_empty() {
            body.insert("field".to_string(), Value::from(metric.field.clone()));
        }
        aggs.push(Agg::new(
            metric.id.clone(),
            Aggregation::Metric {
                kind: metric.kind,
                body,
            },
        ));
    }

    Aggs(aggs)
}

fn is_metric_id(reference: &str) -> bool {
    !reference.is_empty() && reference.chars().all(|c| c.is_ascii_digit())
}

fn resolve_bucket_path(reference: &str, query: &Query) -> Option<String> {
    if !is_metric_id(reference) {
        return None;
    }
    let referenced = query.find_metric(reference)?;
    if referenced.kind == MetricKind::Count {
        Some("_count".to_string())
    } else {
        Some(reference.to_string())
    }
}

/// Unresolvable references drop the pipeline metric from the tree; the
/// referenced metric may have been hidden or removed by the user.
fn build_pipeline_agg(metric: &MetricAgg, query: &Query) -> Option<Agg> {
    let buckets_path = if metric.kind.has_multiple_bucket_paths() {
        let mut paths = Map::new();
        for variable in &metric.pipeline_variables {
            if let Some(path) = resolve_bucket_path(&variable.pipeline_agg, query) {
                paths.insert(variable.name.clone(), Value::from(path));
            }
        }
        if paths.is_empty() {
            return None;
        }
        Value::Object(paths)
    } else {
        Value::from(resolve_bucket_path(metric.pipeline_agg_field(), query)?)
    };

    let mut body = metric_settings_for_dsl(metric);
    body.insert("buckets_path".to_string(), buckets_path);

    Some(Agg::new(
        metric.id.clone(),
        Aggregation::Pipeline {
            kind: metric.kind,
            body,
        },
    ))
}

/// Engine-specific coercions the query DSL requires: a handful of settings
/// must be numbers even when the editor persisted them as strings, and the
/// legacy nested script shape is flattened.
fn metric_settings_for_dsl(metric: &MetricAgg) -> Map<String, Value> {
    let mut settings = metric.settings.clone();

    match metric.kind {
        MetricKind::MovingAvg => {
            settings.coerce_entry_to_f64("window");
            settings.coerce_entry_to_f64("predict");
            if let Some(Value::Object(inner)) = settings.0.get_mut("settings") {
                let mut inner_settings = Settings(std::mem::take(inner));
                for key in ["alpha", "beta", "gamma", "period"] {
                    inner_settings.coerce_entry_to_f64(key);
                }
                *inner = inner_settings.into_map();
            }
        }
        MetricKind::SerialDiff => {
            settings.coerce_entry_to_f64("lag");
        }
        MetricKind::Percentiles => {
            // The engine only accepts numeric percents.
            if let Some(Value::Array(percents)) = settings.0.get_mut("percents") {
                for percent in percents.iter_mut() {
                    if let Value::String(s) = percent {
                        let parsed = s.trim().parse::<f64>().unwrap_or(0.0);
                        *percent = Value::from(parsed);
                    }
                }
            }
        }
        _ => {}
    }

    if metric.kind.supports_inline_script() {
        // Old persisted queries stored scripts as `script: {inline: "..."}`.
        if let Some(Value::Object(script)) = settings.get("script") {
            if let Some(Value::String(inline)) = script.get("inline") {
                let inline = inline.clone();
                settings.insert("script", Value::from(inline));
            }
        }
    }

    settings.into_map()
}

fn epoch_millis_to_rfc3339(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
