use serde_json::json;

use crate::search_request::SearchRequest;

/// Placeholder tokens the query author may reference; both are substituted
/// textually on the marshalled body, after JSON serialization, so they
/// must always land inside string or numeric literal positions.
pub const INTERVAL_PLACEHOLDER: &str = "$__interval";
pub const INTERVAL_MS_PLACEHOLDER: &str = "$__interval_ms";

/// Encodes a batch of search requests as newline-delimited JSON pairs:
/// a routing header line then the request body line, per request. Pure
/// function of its inputs.
pub fn encode_multi_search(requests: &[SearchRequest]) -> Result<Vec<u8>, serde_json::Error> {
    let mut payload = Vec::new();

    for request in requests {
        let header = json!({
            "ignore_unavailable": true,
            "index": request.index,
        });
        payload.extend_from_slice(serde_json::to_string(&header)?.as_bytes());
        payload.push(b'\n');

        // The ms placeholder must be substituted first; the plain interval
        // placeholder is its prefix.
        let body = serde_json::to_string(request)?
            .replace(
                INTERVAL_MS_PLACEHOLDER,
                &request.interval.as_millis().to_string(),
            )
            .replace(
                INTERVAL_PLACEHOLDER,
                &humantime::format_duration(request.interval).to_string(),
            );
        payload.extend_from_slice(body.as_bytes());
        payload.push(b'\n');
    }

    Ok(payload)
}
