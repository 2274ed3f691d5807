use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use trellis_client::QuickwitClient;
use trellis_query::query_data;
use trellis_query::translate::{GeohashDefaults, TranslateError};
use trellis_types::query::PanelQuery;

use crate::config::Config;

const INTERNAL_SERVER_ERROR: &str = "Internal server error";

struct App {
    client: QuickwitClient,
    geohash: GeohashDefaults,
}

pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, message: String) -> HttpError {
        Self { status, message }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = if self.status.is_server_error() {
            error!("Internal server error: {}", self.message);
            Json(json!({"error": INTERNAL_SERVER_ERROR}))
        } else {
            error!("User error: {}", self.message);
            Json(json!({"error": self.message}))
        };

        (self.status, body).into_response()
    }
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub queries: Vec<PanelQuery>,
    pub range: TimeRange,
}

/// Runs one batch of panel queries against the configured index.
async fn query(
    State(state): State<Arc<App>>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, HttpError> {
    info!(queries = request.queries.len(), "Running query batch");

    let result = query_data(
        request.queries,
        request.range.from,
        request.range.to,
        &state.client,
        state.geohash,
    )
    .await
    .map_err(|e| match e.downcast_ref::<TranslateError>() {
        Some(_) => HttpError::new(StatusCode::BAD_REQUEST, format!("{e:#}")),
        None => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    })?;

    Ok(Json(result))
}

pub fn create_axum_app(config: Config) -> Router {
    let geohash = config.geohash_defaults();
    let app = Arc::new(App {
        client: QuickwitClient::new(config.quickwit),
        geohash,
    });

    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(query))
        .with_state(app)
}
