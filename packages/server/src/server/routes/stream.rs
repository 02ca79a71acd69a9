//! Streaming-transport endpoint.
//!
//! GET /api/sessions/stream
//!
//! The connection is the session: it is registered when the client
//! connects, kept active by periodic pings, and unregistered when the
//! client goes away and the stream is dropped.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::{header::USER_AGENT, HeaderMap},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::kernel::sessions::{SessionManager, Transport};
use crate::server::error::ApiResult;
use crate::server::middleware::ClientIp;

const ACTIVITY_INTERVAL: Duration = Duration::from_secs(30);

/// Unregisters the session when the stream is dropped.
struct StreamSession {
    sessions: SessionManager,
    session_id: String,
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let sessions = self.sessions.clone();
        let session_id = std::mem::take(&mut self.session_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %session_id, "no runtime to unregister stream session");
            return;
        };
        handle.spawn(async move {
            match sessions.unregister(&session_id).await {
                Ok(_) => debug!(session_id = %session_id, "stream session closed"),
                Err(e) => warn!(session_id = %session_id, error = %e, "failed to unregister stream session"),
            }
        });
    }
}

pub async fn session_stream_handler(
    Extension(ctx): Extension<AppContext>,
    client_ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_ip = client_ip.map(|Extension(ip)| ip.to_string());

    let session_id = ctx
        .sessions
        .register(Transport::Streaming, client_ip, user_agent)
        .await?;
    let guard = Arc::new(StreamSession {
        sessions: ctx.sessions.clone(),
        session_id: session_id.clone(),
    });

    let connected = stream::once(async move {
        Event::default()
            .event("session")
            .json_data(json!({ "session_id": session_id }))
    });

    let ticks = IntervalStream::new(interval_at(Instant::now() + ACTIVITY_INTERVAL, ACTIVITY_INTERVAL));
    let activity = ticks.then(move |_| {
        let guard = guard.clone();
        async move {
            let active = match guard.sessions.validate(&guard.session_id).await {
                Ok(active) => active,
                Err(e) => {
                    warn!(session_id = %guard.session_id, error = %e, "failed to refresh stream session");
                    true
                }
            };
            Event::default()
                .event("ping")
                .json_data(json!({ "session_id": guard.session_id, "active": active }))
        }
    });

    Ok(Sse::new(connected.chain(activity)).keep_alive(KeepAlive::default()))
}
