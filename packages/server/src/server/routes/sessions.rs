//! Session endpoints.
//!
//! GET    /api/sessions
//! POST   /api/sessions
//! GET    /api/sessions/info
//! PATCH  /api/sessions/:session_id
//! POST   /api/sessions/:session_id/validate
//! DELETE /api/sessions/:session_id

use axum::{
    extract::{Extension, Path},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::AppContext;
use crate::kernel::sessions::Transport;
use crate::server::error::{ApiError, ApiResult};
use crate::server::middleware::ClientIp;

pub async fn list_sessions_handler(Extension(ctx): Extension<AppContext>) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let sessions: Vec<_> = ctx
        .sessions
        .list_all()
        .await?
        .iter()
        .map(|s| s.view(now))
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions,
        "timestamp": now,
    })))
}

pub async fn session_info_handler(Extension(ctx): Extension<AppContext>) -> ApiResult<Json<Value>> {
    let active = ctx.sessions.active_count().await?;

    Ok(Json(json!({
        "active_sessions": active,
        "session_timeout": ctx.sessions.timeout_secs(),
        "server_uptime_seconds": ctx.uptime_seconds(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterSession {
    pub transport: Option<Transport>,
}

pub async fn register_session_handler(
    Extension(ctx): Extension<AppContext>,
    client_ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
    body: Option<Json<RegisterSession>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let transport = body
        .and_then(|Json(b)| b.transport)
        .unwrap_or(Transport::Interactive);
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_ip = client_ip.map(|Extension(ip)| ip.to_string());

    let session_id = ctx.sessions.register(transport, client_ip, user_agent).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "session_id": session_id, "transport": transport })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ClientInfo {
    pub client_name: Option<String>,
    pub client_version: Option<String>,
}

pub async fn update_session_handler(
    Extension(ctx): Extension<AppContext>,
    Path(session_id): Path<String>,
    Json(info): Json<ClientInfo>,
) -> ApiResult<Json<Value>> {
    let updated = ctx
        .sessions
        .update_info(
            &session_id,
            info.client_name.as_deref(),
            info.client_version.as_deref(),
        )
        .await?;

    Ok(Json(json!({ "session_id": session_id, "updated": updated })))
}

pub async fn validate_session_handler(
    Extension(ctx): Extension<AppContext>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let valid = ctx.sessions.validate(&session_id).await?;
    Ok(Json(json!({ "session_id": session_id, "valid": valid })))
}

pub async fn unregister_session_handler(
    Extension(ctx): Extension<AppContext>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !ctx.sessions.unregister(&session_id).await? {
        return Err(ApiError::NotFound(format!("Session {} not found", session_id)));
    }
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}
