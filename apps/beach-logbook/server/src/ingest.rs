//! HTTP entry point for log producers.
//!
//! `POST /channels/{channel}/lines` takes either a plain-text body (one log
//! line per line) or `{"lines": [...]}` and publishes each non-blank line in
//! order.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::hub::{validate_channel, HubError};
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
struct LinesPayload {
    lines: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResponse {
    pub channel: String,
    pub published: usize,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Channel(#[from] HubError),
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request body is not valid UTF-8")]
    InvalidUtf8,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, IngestError> {
    let channel = validate_channel(&channel).inspect_err(|err| {
        warn!(error = %err, "rejecting ingest request");
    })?;
    let lines = decode_lines(&headers, &body)?;

    let mut response = IngestResponse {
        channel: channel.to_string(),
        ..IngestResponse::default()
    };
    for line in lines.iter().filter(|line| !line.trim().is_empty()) {
        let report = state.publish(channel, line);
        response.published += 1;
        response.delivered += report.delivered;
        response.dropped += report.dropped;
    }

    debug!(
        channel,
        published = response.published,
        delivered = response.delivered,
        dropped = response.dropped,
        "ingested producer lines"
    );
    Ok(Json(response))
}

fn decode_lines(headers: &HeaderMap, body: &[u8]) -> Result<Vec<String>, IngestError> {
    if is_json(headers) {
        let payload: LinesPayload = serde_json::from_slice(body)?;
        // A JSON entry may itself carry several lines.
        return Ok(payload
            .lines
            .iter()
            .flat_map(|entry| entry.lines())
            .map(str::to_string)
            .collect());
    }

    let text = std::str::from_utf8(body).map_err(|_| IngestError::InvalidUtf8)?;
    Ok(text.lines().map(str::to_string).collect())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().starts_with("application/json"))
        .unwrap_or(false)
}
