pub mod docs;
pub mod lucene;
pub mod parse;
pub mod translate;

use color_eyre::eyre::{bail, Context, Result};
use serde_json::json;
use tracing::debug;

use trellis_client::{ClientError, QuickwitClient};
use trellis_types::query::{parse_queries, PanelQuery, Query};
use trellis_types::result::{DataResponse, QueryDataResponse};

use crate::parse::parse_response;
use crate::translate::{build_search_requests, GeohashDefaults};

/// Runs one inbound batch end to end: validate and build the search
/// requests, execute them as a single multi-search call, parse the
/// responses into per-ref-id frames.
pub async fn query_data(
    panels: Vec<PanelQuery>,
    range_from: i64,
    range_to: i64,
    client: &QuickwitClient,
    geohash: GeohashDefaults,
) -> Result<QueryDataResponse> {
    if panels.is_empty() {
        bail!("request contains no queries");
    }

    let queries = parse_queries(panels, range_from, range_to);
    let requests = build_search_requests(
        &queries,
        client.index(),
        &client.configured_fields().time_field,
        geohash,
    )
    .context("build search requests")?;

    match client.execute_multi_search(&requests).await {
        Ok(response) => {
            debug!(responses = response.responses.len(), "Parsing multi-search responses");
            Ok(parse_response(
                &response.responses,
                &queries,
                client.configured_fields(),
            ))
        }
        // A whole-batch engine error still renders per panel, so each
        // query gets its own copy of the failure.
        Err(error @ ClientError::Server { .. }) => Ok(fan_out_batch_error(&queries, &error)),
        Err(error) => Err(error).context("execute multi-search"),
    }
}

fn fan_out_batch_error(queries: &[Query], error: &ClientError) -> QueryDataResponse {
    let status = error.status();
    let body = match error {
        ClientError::Server { body, .. } => body.clone(),
        other => other.to_string(),
    };
    let payload = json!({
        "status": status,
        "message": "Error on multisearch",
        "body": body,
    })
    .to_string();

    let mut out = QueryDataResponse::new();
    for query in queries {
        out.insert(query.ref_id.clone(), DataResponse::error(status, payload.clone()));
    }
    out
}
