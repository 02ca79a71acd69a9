use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::session::{Session, Transport};
use super::store::SessionStore;
use crate::common::Lookup;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Tracks connected clients of both transports and expires idle ones.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    timeout: chrono::Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, timeout: Duration) -> Result<Self> {
        let timeout = chrono::Duration::from_std(timeout).context("session timeout out of range")?;
        Ok(Self { store, timeout })
    }

    pub fn timeout_secs(&self) -> i64 {
        self.timeout.num_seconds()
    }

    pub async fn register(
        &self,
        transport: Transport,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let session = Session::new(&session_id, transport, client_ip, user_agent, Utc::now());
        self.store.insert(session).await?;

        info!(session_id = %session_id, transport = %transport, "registered session");
        Ok(session_id)
    }

    /// Record client details from the handshake. True only when a non-empty
    /// field was applied to a known session.
    pub async fn update_info(
        &self,
        session_id: &str,
        client_name: Option<&str>,
        client_version: Option<&str>,
    ) -> Result<bool> {
        let client_name = client_name.filter(|s| !s.is_empty());
        let client_version = client_version.filter(|s| !s.is_empty());
        if client_name.is_none() && client_version.is_none() {
            return Ok(false);
        }

        let updated = self
            .store
            .update_client_info(session_id, client_name, client_version)
            .await?;
        if updated {
            info!(
                session_id = %session_id,
                client_name = ?client_name,
                client_version = ?client_version,
                "updated session client info"
            );
        }
        Ok(updated)
    }

    pub async fn unregister(&self, session_id: &str) -> Result<bool> {
        let removed = self.store.remove(session_id).await?;
        if removed {
            info!(session_id = %session_id, "unregistered session");
        }
        Ok(removed)
    }

    /// True and refreshes `last_active` for a live session; an idle one is
    /// deleted and reported false.
    pub async fn validate(&self, session_id: &str) -> Result<bool> {
        let session = match self.store.find(session_id).await? {
            Lookup::Found(session) => session,
            Lookup::NotFound => return Ok(false),
        };

        let now = Utc::now();
        if session.is_expired(now, self.timeout) {
            self.store.remove(session_id).await?;
            info!(session_id = %session_id, "session expired and removed");
            return Ok(false);
        }

        self.store.touch(session_id, now).await
    }

    /// Live sessions, after sweeping expired ones.
    pub async fn list_all(&self) -> Result<Vec<Session>> {
        self.cleanup_expired().await?;
        self.store.list().await
    }

    pub async fn active_count(&self) -> Result<usize> {
        Ok(self.list_all().await?.len())
    }

    pub async fn cleanup_expired(&self) -> Result<usize> {
        let removed = self.store.remove_idle(Utc::now() - self.timeout).await?;
        if removed.is_empty() {
            debug!("no expired sessions");
        } else {
            info!(count = removed.len(), "cleaned up expired sessions");
        }
        Ok(removed.len())
    }
}
