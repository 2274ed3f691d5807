use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const TIME_FIELD_NAME: &str = "time";
pub const VALUE_FIELD_NAME: &str = "value";

pub const VIS_TYPE_LOGS: &str = "logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Time,
    Number,
    Bool,
    String,
    Json,
}

/// One typed column. Column length is the row count of the owning frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValues {
    Time(Vec<Option<DateTime<Utc>>>),
    Number(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    String(Vec<Option<String>>),
    Json(Vec<Option<Value>>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(v) => v.len(),
            FieldValues::Number(v) => v.len(),
            FieldValues::Bool(v) => v.len(),
            FieldValues::String(v) => v.len(),
            FieldValues::Json(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValues::Time(_) => FieldKind::Time,
            FieldValues::Number(_) => FieldKind::Number,
            FieldValues::Bool(_) => FieldKind::Bool,
            FieldValues::String(_) => FieldKind::String,
            FieldValues::Json(_) => FieldKind::Json,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
}

impl FieldConfig {
    pub fn filterable() -> Self {
        Self {
            display_name: None,
            filterable: Some(true),
        }
    }

    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            filterable: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,
    pub values: FieldValues,
}

impl FrameField {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        let kind = values.kind();
        Self {
            name: name.into(),
            kind,
            config: None,
            values,
        }
    }

    pub fn with_config(mut self, config: FieldConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.display_name.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_visualization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

/// The tabular output unit consumed by the visualization layer: either a
/// two-column time series or a multi-column document/log table.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
    pub fields: Vec<FrameField>,
}

impl Frame {
    pub fn new(name: impl Into<String>, fields: Vec<FrameField>) -> Self {
        Self {
            name: name.into(),
            meta: None,
            fields,
        }
    }

    pub fn with_meta(mut self, meta: FrameMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Row count; all fields are equal length by construction.
    pub fn row_len(&self) -> usize {
        self.fields.first().map_or(0, FrameField::len)
    }

    pub fn field(&self, name: &str) -> Option<&FrameField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Builds the canonical two-column time series frame. The display name
    /// lands on the value field config, the frame name mirrors it.
    pub fn time_series(
        name: impl Into<String>,
        times: Vec<Option<DateTime<Utc>>>,
        values: Vec<Option<f64>>,
    ) -> Self {
        let name = name.into();
        Frame {
            name: name.clone(),
            meta: None,
            fields: vec![
                FrameField::new(TIME_FIELD_NAME, FieldValues::Time(times)),
                FrameField::new(VALUE_FIELD_NAME, FieldValues::Number(values))
                    .with_config(FieldConfig::display_name(name)),
            ],
        }
    }
}
