//! Progress polling endpoints.
//!
//! GET /api/progress/:progress_id
//! GET /api/progress
//!
//! Single reads carry an `ETag` over the payload (minus `timestamp`) so
//! pollers get `304 Not Modified` until something actually changes, and an
//! `X-Poll-Interval` hint that drops to 0 once the operation is terminal.

use anyhow::Context;
use axum::{
    extract::{Extension, Path},
    http::{
        header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH, LAST_MODIFIED},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::common::utils::{etag_for, if_none_match_matches};
use crate::common::Lookup;
use crate::context::AppContext;
use crate::server::error::{ApiError, ApiResult};

pub const X_POLL_INTERVAL: HeaderName = HeaderName::from_static("x-poll-interval");
const NO_CACHE: &str = "no-cache, must-revalidate";

pub async fn get_progress_handler(
    Extension(ctx): Extension<AppContext>,
    Path(progress_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let record = match ctx.tracker.get_progress(&progress_id).await? {
        Lookup::Found(record) => record,
        Lookup::NotFound => {
            warn!(progress_id = %progress_id, "operation not found");
            return Err(ApiError::NotFound(format!("Operation {} not found", progress_id)));
        }
    };

    let mut body = serde_json::to_value(&record).context("failed to serialize progress")?;
    let etag = etag_for(&body);
    let etag_header = HeaderValue::from_str(&etag).context("invalid etag")?;

    let client_etag = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    if client_etag.is_some_and(|value| if_none_match_matches(value, &etag)) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (ETAG, etag_header),
                (CACHE_CONTROL, HeaderValue::from_static(NO_CACHE)),
            ],
        )
            .into_response());
    }

    body["timestamp"] = json!(Utc::now());
    let poll_interval = record.poll_interval_ms();

    info!(
        progress_id = %progress_id,
        status = %record.status,
        progress = record.progress,
        "progress retrieved"
    );

    Ok((
        [
            (ETAG, etag_header),
            (
                LAST_MODIFIED,
                HeaderValue::from_str(&http_date(record.updated_at)).context("invalid date")?,
            ),
            (CACHE_CONTROL, HeaderValue::from_static(NO_CACHE)),
            (X_POLL_INTERVAL, HeaderValue::from(poll_interval)),
        ],
        Json(body),
    )
        .into_response())
}

pub async fn list_progress_handler(Extension(ctx): Extension<AppContext>) -> impl IntoResponse {
    let operations = ctx.tracker.list_active().await;

    Json(json!({
        "count": operations.len(),
        "operations": operations,
        "timestamp": Utc::now(),
    }))
}

/// IMF-fixdate, as used by `Last-Modified`.
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
