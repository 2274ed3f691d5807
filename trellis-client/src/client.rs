use bytes::BytesMut;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::msearch::encode_multi_search;
use crate::search_request::SearchRequest;

const MSEARCH_PATH: &str = "_elastic/_msearch";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response; the body may be an engine-formatted error payload
    /// or free text from an intermediary proxy.
    #[error("server responded with status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("failed to encode multi-search request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to decode multi-search response: {0}")]
    Decode(#[from] simd_json::Error),

    #[error("indexes matching one pattern must agree on their timestamp field, found {first} ({first_format}) and {second} ({second_format})")]
    ConflictingTimestampFields {
        first: String,
        first_format: String,
        second: String,
        second_format: String,
    },
}

impl ClientError {
    /// Best-available HTTP-like status to surface to the caller.
    pub fn status(&self) -> u16 {
        match self {
            ClientError::Http(_) => 502,
            ClientError::Server { status, .. } => *status,
            ClientError::Encode(_) | ClientError::Decode(_) => 500,
            ClientError::ConflictingTimestampFields { .. } => 400,
        }
    }
}

/// Resolved per-datasource field configuration: where the time lives and
/// how it is encoded, plus the optional log rendering fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfiguredFields {
    pub time_field: String,
    #[serde(default)]
    pub time_output_format: String,
    #[serde(default)]
    pub log_message_field: String,
    #[serde(default)]
    pub log_level_field: String,
}

fn default_max_concurrent_shard_requests() -> i64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickwitConfig {
    pub url: String,
    pub index: String,

    #[serde(default = "default_max_concurrent_shard_requests")]
    pub max_concurrent_shard_requests: i64,

    #[serde(flatten)]
    pub configured_fields: ConfiguredFields,
}

#[derive(Debug, Deserialize)]
pub struct MultiSearchResponse {
    pub responses: Vec<Value>,
}

#[derive(Debug)]
pub struct QuickwitClient {
    config: QuickwitConfig,
    client: Client,
}

impl QuickwitClient {
    pub fn new(config: QuickwitConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn configured_fields(&self) -> &ConfiguredFields {
        &self.config.configured_fields
    }

    pub fn index(&self) -> &str {
        &self.config.index
    }

    pub fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn http(&self) -> &Client {
        &self.client
    }

    /// Sends one multi-search batch and returns the per-request response
    /// bodies in submission order.
    #[instrument(skip_all, name = "POST quickwit msearch", fields(requests = requests.len()))]
    pub async fn execute_multi_search(
        &self,
        requests: &[SearchRequest],
    ) -> Result<MultiSearchResponse, ClientError> {
        let payload = encode_multi_search(requests)?;
        debug!(bytes = payload.len(), "Encoded multi-search batch");

        let max_concurrent = if self.config.max_concurrent_shard_requests > 0 {
            self.config.max_concurrent_shard_requests
        } else {
            default_max_concurrent_shard_requests()
        };

        let url = format!("{}/{}", self.base_url(), MSEARCH_PATH);
        let response = self
            .http()
            .post(&url)
            .query(&[("max_concurrent_shard_requests", max_concurrent)])
            .header(header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes: BytesMut = response.bytes().await?.into();
        let decoded: MultiSearchResponse = simd_json::serde::from_slice(bytes.as_mut())?;
        Ok(decoded)
    }

    pub(crate) async fn get_json(&self, path_and_query: &str) -> Result<BytesMut, ClientError> {
        let url = format!("{}/{}", self.base_url(), path_and_query);
        let response = self.http().get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Server {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.into())
    }
}
