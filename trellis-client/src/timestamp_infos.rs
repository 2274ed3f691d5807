use serde::Deserialize;
use tracing::debug;

use crate::client::{ClientError, QuickwitClient};

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub field_mappings: Option<Vec<FieldMapping>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocMapping {
    #[serde(default)]
    pub timestamp_field: String,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub doc_mapping: DocMapping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexMetadata {
    pub index_config: IndexConfig,
}

/// The declared timestamp field of an index and its declared output
/// format (empty when the mapping declares none).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampFieldInfos {
    pub field: String,
    pub output_format: String,
}

/// Recursively searches a field-mapping tree for the datetime field whose
/// dot-joined name matches the declared timestamp field, returning its
/// declared output format.
pub fn find_timestamp_format(timestamp_field: &str, mappings: &[FieldMapping]) -> Option<String> {
    find_timestamp_format_inner(timestamp_field, "", mappings)
}

fn find_timestamp_format_inner(
    timestamp_field: &str,
    prefix: &str,
    mappings: &[FieldMapping],
) -> Option<String> {
    for mapping in mappings {
        let full_name = if prefix.is_empty() {
            mapping.name.clone()
        } else {
            format!("{prefix}.{}", mapping.name)
        };

        if mapping.kind == "datetime" && full_name == timestamp_field {
            if let Some(format) = &mapping.output_format {
                return Some(format.clone());
            }
        } else if mapping.kind == "object" {
            if let Some(children) = &mapping.field_mappings {
                if let Some(found) =
                    find_timestamp_format_inner(timestamp_field, &full_name, children)
                {
                    return Some(found);
                }
            }
        }
    }

    None
}

fn infos_from(metadata: &IndexMetadata) -> TimestampFieldInfos {
    let doc_mapping = &metadata.index_config.doc_mapping;
    let output_format =
        find_timestamp_format(&doc_mapping.timestamp_field, &doc_mapping.field_mappings)
            .unwrap_or_default();
    TimestampFieldInfos {
        field: doc_mapping.timestamp_field.clone(),
        output_format,
    }
}

/// Resolves the timestamp field infos across every index matching a
/// pattern. All matched indexes must agree on both the field name and its
/// output format.
pub fn timestamp_infos_from_metadata(
    metadata: &[IndexMetadata],
) -> Result<TimestampFieldInfos, ClientError> {
    let mut reference: Option<TimestampFieldInfos> = None;

    for index in metadata {
        let infos = infos_from(index);
        match &reference {
            None => reference = Some(infos),
            Some(existing) if *existing != infos => {
                return Err(ClientError::ConflictingTimestampFields {
                    first: existing.field.clone(),
                    first_format: existing.output_format.clone(),
                    second: infos.field,
                    second_format: infos.output_format,
                });
            }
            Some(_) => {}
        }
    }

    Ok(reference.unwrap_or_default())
}

impl QuickwitClient {
    /// Fetches the timestamp field name and output format for an index or
    /// an index pattern (`*` wildcards, comma-separated lists).
    pub async fn fetch_timestamp_field_infos(
        &self,
        index: &str,
    ) -> Result<TimestampFieldInfos, ClientError> {
        let infos = if index.contains('*') || index.contains(',') {
            let mut bytes = self
                .get_json(&format!("indexes?index_id_patterns={index}"))
                .await?;
            let metadata: Vec<IndexMetadata> = simd_json::serde::from_slice(bytes.as_mut())?;
            timestamp_infos_from_metadata(&metadata)?
        } else {
            let mut bytes = self.get_json(&format!("indexes/{index}")).await?;
            let metadata: IndexMetadata = simd_json::serde::from_slice(bytes.as_mut())?;
            infos_from(&metadata)
        };

        debug!(field = %infos.field, format = %infos.output_format, "Resolved timestamp field");
        Ok(infos)
    }
}
