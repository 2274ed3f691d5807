use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::frame::Frame;

/// Upstream failure surfaced for a single panel: the best available HTTP
/// status plus the engine's reason text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryError {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.message)
    }
}

impl std::error::Error for QueryError {}

/// Result for one panel query. Frames and error are mutually exclusive in
/// practice, but an errored response still carries its (empty) frame list
/// so callers can render partial batches uniformly.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl DataResponse {
    pub fn frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            error: None,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(QueryError {
                status,
                message: message.into(),
            }),
        }
    }
}

/// Per-ref-id results for one inbound batch. One panel erroring never
/// hides the sibling panels' data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

impl QueryDataResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ref_id: impl Into<String>, response: DataResponse) {
        self.responses.insert(ref_id.into(), response);
    }

    pub fn get(&self, ref_id: &str) -> Option<&DataResponse> {
        self.responses.get(ref_id)
    }
}
