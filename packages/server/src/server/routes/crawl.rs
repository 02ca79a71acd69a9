//! Crawl request intake.
//!
//! POST /api/crawl
//!
//! Body is a crawl request plus optional queue options:
//! `{"url": "...", "max_depth": 2, ..., "priority": 5, "max_retries": 3}`

use axum::{extract::Extension, http::StatusCode, Json};
use crawler::{CrawlRequest, PayloadError};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::context::AppContext;
use crate::kernel::jobs::NewJob;
use crate::kernel::progress::ProgressRecord;
use crate::server::error::ApiResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCrawlResponse {
    pub success: bool,
    pub progress_id: String,
    pub status: &'static str,
    pub message: &'static str,
}

pub async fn start_crawl_handler(
    Extension(ctx): Extension<AppContext>,
    Json(mut body): Json<Value>,
) -> ApiResult<(StatusCode, Json<StartCrawlResponse>)> {
    let priority = take_int(&mut body, "priority")?.unwrap_or(0);
    let max_retries = take_int(&mut body, "max_retries")?.unwrap_or(3);
    let request = CrawlRequest::from_value(body)?;

    let job = ctx
        .jobs
        .insert(
            NewJob::builder()
                .request(request.clone())
                .priority(priority)
                .max_retries(max_retries)
                .build(),
        )
        .await?;

    let progress_id = job.id.to_string();
    ctx.tracker.start(ProgressRecord::crawl_pending(
        &progress_id,
        &request.url,
        &request.knowledge_type,
    ));

    info!(job_id = %job.id, url = %request.url, priority, "crawl queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartCrawlResponse {
            success: true,
            progress_id,
            status: "pending",
            message: "Crawl queued",
        }),
    ))
}

/// Remove an optional integer queue option from the request body.
fn take_int(body: &mut Value, key: &str) -> Result<Option<i32>, PayloadError> {
    let Some(object) = body.as_object_mut() else {
        return Ok(None);
    };
    match object.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| PayloadError::Malformed(format!("{} must be an integer", key))),
    }
}
