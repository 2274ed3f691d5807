use serde_json::{json, Map, Value};

use trellis_client::ConfiguredFields;
use trellis_common::time_format::{parse_time, parse_time_auto, TimestampFormat};
use trellis_types::frame::{
    FieldConfig, FieldValues, Frame, FrameField, FrameMeta, VIS_TYPE_LOGS,
};
use trellis_types::query::Query;

use crate::lucene::extract_search_words;

/// Nesting bound for source flattening; deeper content is kept as an
/// opaque nested value under the truncation-point key.
pub const MAX_FLATTEN_DEPTH: usize = 10;

pub const LOG_LINE_FIELD: &str = "line";
pub const LOG_LEVEL_FIELD: &str = "level";
pub const SOURCE_FIELD: &str = "_source";
pub const SORT_FIELD: &str = "sort";

const DEFAULT_LOGS_LIMIT: i64 = 100;

/// Rewrites a nested object into a flat key to value mapping with
/// dot-joined compound keys.
pub fn flatten(source: &Map<String, Value>, max_depth: usize) -> Map<String, Value> {
    let mut output = Map::new();
    flatten_step(0, source, "", &mut output, max_depth);
    output
}

fn flatten_step(
    depth: usize,
    object: &Map<String, Value>,
    prefix: &str,
    output: &mut Map<String, Value>,
    max_depth: usize,
) {
    for (key, value) in object {
        let compound = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            Value::Object(inner) if depth < max_depth => {
                flatten_step(depth + 1, inner, &compound, output, max_depth);
            }
            _ => {
                output.insert(compound, value.clone());
            }
        }
    }
}

fn response_hits(response: &Value) -> &[Value] {
    response
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// Flattened `_source` merged with the `fields` projections of one hit.
fn flattened_hit(hit: &Value) -> Map<String, Value> {
    let mut doc = match hit.get(SOURCE_FIELD) {
        Some(Value::Object(source)) => flatten(source, MAX_FLATTEN_DEPTH),
        _ => Map::new(),
    };

    if let Some(Value::Object(fields)) = hit.get("fields") {
        for (key, value) in flatten(fields, MAX_FLATTEN_DEPTH) {
            doc.insert(key, value);
        }
    }

    doc
}

fn rename_field(doc: &mut Map<String, Value>, from: &str, to: &str) {
    if from.is_empty() || from == to {
        return;
    }
    if let Some(value) = doc.remove(from) {
        doc.insert(to.to_string(), value);
    }
}

/// Column order: the configured time field first, the log line second for
/// log tables, everything else alphabetical.
fn sorted_prop_names(
    docs: &[Map<String, Value>],
    configured: &ConfiguredFields,
    logs: bool,
) -> Vec<String> {
    let mut names: Vec<&str> = Vec::new();
    for doc in docs {
        for key in doc.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
    }
    names.sort_unstable();

    let mut sorted = Vec::with_capacity(names.len());
    if names.contains(&configured.time_field.as_str()) {
        sorted.push(configured.time_field.clone());
    }
    if logs && names.contains(&LOG_LINE_FIELD) {
        sorted.push(LOG_LINE_FIELD.to_string());
    }
    for name in names {
        if !sorted.iter().any(|s| s == name) {
            sorted.push(name.to_string());
        }
    }
    sorted
}

fn parse_doc_time(value: &Value, format: Option<&TimestampFormat>) -> Option<chrono::DateTime<chrono::Utc>> {
    match format {
        Some(format) => parse_time(value, format).ok(),
        None => parse_time_auto(value).ok(),
    }
}

/// Column type is decided by the first non-null value observed; cells that
/// do not match the column type become null.
fn doc_field(docs: &[Map<String, Value>], name: &str) -> FieldValues {
    let first = docs
        .iter()
        .filter_map(|doc| doc.get(name))
        .find(|v| !v.is_null());

    match first {
        Some(Value::Number(_)) => FieldValues::Number(
            docs.iter()
                .map(|doc| doc.get(name).and_then(Value::as_f64))
                .collect(),
        ),
        Some(Value::String(_)) => FieldValues::String(
            docs.iter()
                .map(|doc| doc.get(name).and_then(Value::as_str).map(str::to_string))
                .collect(),
        ),
        Some(Value::Bool(_)) => FieldValues::Bool(
            docs.iter()
                .map(|doc| doc.get(name).and_then(Value::as_bool))
                .collect(),
        ),
        _ => FieldValues::Json(
            docs.iter()
                .map(|doc| doc.get(name).filter(|v| !v.is_null()).cloned())
                .collect(),
        ),
    }
}

fn docs_to_fields(
    docs: &[Map<String, Value>],
    prop_names: &[String],
    configured: &ConfiguredFields,
    time_format: Option<&TimestampFormat>,
) -> Vec<FrameField> {
    prop_names
        .iter()
        .map(|name| {
            let values = if *name == configured.time_field {
                FieldValues::Time(
                    docs.iter()
                        .map(|doc| doc.get(name).and_then(|v| parse_doc_time(v, time_format)))
                        .collect(),
                )
            } else {
                doc_field(docs, name)
            };

            FrameField::new(name.clone(), values).with_config(FieldConfig::filterable())
        })
        .collect()
}

pub fn process_logs_response(
    response: &Value,
    query: &Query,
    configured: &ConfiguredFields,
    time_format: Option<&TimestampFormat>,
) -> Frame {
    let docs: Vec<Map<String, Value>> = response_hits(response)
        .iter()
        .map(|hit| {
            let flattened = flattened_hit(hit);
            let mut doc = flattened.clone();
            doc.insert(SOURCE_FIELD.to_string(), Value::Object(flattened));
            if let Some(sort) = hit.get(SORT_FIELD) {
                doc.insert(SORT_FIELD.to_string(), sort.clone());
            }
            rename_field(&mut doc, &configured.log_message_field, LOG_LINE_FIELD);
            rename_field(&mut doc, &configured.log_level_field, LOG_LEVEL_FIELD);
            doc
        })
        .collect();

    let prop_names = sorted_prop_names(&docs, configured, true);
    let fields = docs_to_fields(&docs, &prop_names, configured, time_format);

    let limit = query
        .metrics
        .first()
        .map_or(DEFAULT_LOGS_LIMIT, |m| {
            m.settings.get_size_or("limit", DEFAULT_LOGS_LIMIT)
        });

    Frame::new(query.ref_id.clone(), fields).with_meta(FrameMeta {
        preferred_visualization: Some(VIS_TYPE_LOGS.to_string()),
        custom: Some(json!({
            "searchWords": extract_search_words(&query.raw_query),
            "limit": limit,
        })),
    })
}

pub fn process_raw_data_response(
    response: &Value,
    query: &Query,
    configured: &ConfiguredFields,
    time_format: Option<&TimestampFormat>,
) -> Frame {
    let docs: Vec<Map<String, Value>> = response_hits(response).iter().map(flattened_hit).collect();

    let prop_names = sorted_prop_names(&docs, configured, false);
    let fields = docs_to_fields(&docs, &prop_names, configured, time_format);

    Frame::new(query.ref_id.clone(), fields)
}

pub fn process_raw_document_response(response: &Value, query: &Query) -> Frame {
    let values: Vec<Option<Value>> = response_hits(response)
        .iter()
        .map(|hit| Some(Value::Object(flattened_hit(hit))))
        .collect();

    let field = FrameField::new(query.ref_id.clone(), FieldValues::Json(values))
        .with_config(FieldConfig::filterable());

    Frame::new(query.ref_id.clone(), vec![field])
}
