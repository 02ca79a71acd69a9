//! Sessions in one JSON file shared between processes.
//!
//! Every call reloads the file into the in-memory mirror first, and every
//! mutation rewrites it through a uniquely named temporary file plus rename. Two processes
//! can still lose each other's writes between reload and rename; session
//! data is advisory, so that race is tolerated.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, warn};

use super::session::{Session, SessionView};
use super::store::SessionStore;
use crate::common::Lookup;

pub struct FileSessionStore {
    path: PathBuf,
    mirror: Mutex<HashMap<String, Session>>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirror: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the mirror with the file's contents. A missing or unreadable
    /// file keeps the current mirror.
    async fn reload(&self, mirror: &mut HashMap<String, Session>) {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to read sessions file");
                return;
            }
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to parse sessions file");
                return;
            }
        };

        mirror.clear();
        for entry in entries {
            match serde_json::from_value::<Session>(entry) {
                Ok(session) => {
                    mirror.insert(session.session_id.clone(), session);
                }
                Err(e) => warn!(error = %e, "skipping unparseable session entry"),
            }
        }
    }

    async fn persist(&self, mirror: &HashMap<String, Session>) -> Result<()> {
        let now = Utc::now();
        let mut sessions: Vec<SessionView> = mirror.values().map(|s| s.view(now)).collect();
        sessions.sort_by(|a, b| a.session.created_at.cmp(&b.session.created_at));
        let json = serde_json::to_vec(&sessions)?;

        // Temp path is unique per write; concurrent writers never share one.
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let mut tmp = tempfile::NamedTempFile::new_in(dir)
                .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
            tmp.write_all(&json)
                .with_context(|| format!("failed to write {}", tmp.path().display()))?;
            tmp.persist(&path)
                .with_context(|| format!("failed to replace {}", path.display()))?;
            Ok(())
        })
        .await
        .context("sessions file writer panicked")??;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn insert(&self, session: Session) -> Result<()> {
        let mut mirror = self.mirror.lock().await;
        self.reload(&mut mirror).await;
        mirror.insert(session.session_id.clone(), session);
        self.persist(&mirror).await
    }

    async fn find(&self, session_id: &str) -> Result<Lookup<Session>> {
        let mut mirror = self.mirror.lock().await;
        self.reload(&mut mirror).await;
        Ok(mirror.get(session_id).cloned().into())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let mut mirror = self.mirror.lock().await;
        self.reload(&mut mirror).await;
        let mut sessions: Vec<Session> = mirror.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn update_client_info(
        &self,
        session_id: &str,
        client_name: Option<&str>,
        client_version: Option<&str>,
    ) -> Result<bool> {
        let mut mirror = self.mirror.lock().await;
        self.reload(&mut mirror).await;
        let Some(session) = mirror.get_mut(session_id) else {
            return Ok(false);
        };

        if let Some(name) = client_name {
            session.client_name = Some(name.to_string());
        }
        if let Some(version) = client_version {
            session.client_version = Some(version.to_string());
        }
        self.persist(&mirror).await?;
        Ok(true)
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut mirror = self.mirror.lock().await;
        self.reload(&mut mirror).await;
        let Some(session) = mirror.get_mut(session_id) else {
            return Ok(false);
        };

        session.last_active = at;
        self.persist(&mirror).await?;
        Ok(true)
    }

    async fn remove(&self, session_id: &str) -> Result<bool> {
        let mut mirror = self.mirror.lock().await;
        self.reload(&mut mirror).await;
        if mirror.remove(session_id).is_none() {
            return Ok(false);
        }
        self.persist(&mirror).await?;
        Ok(true)
    }

    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut mirror = self.mirror.lock().await;
        self.reload(&mut mirror).await;
        let expired: Vec<String> = mirror
            .values()
            .filter(|s| s.last_active <= cutoff)
            .map(|s| s.session_id.clone())
            .collect();

        if !expired.is_empty() {
            for id in &expired {
                mirror.remove(id);
            }
            self.persist(&mirror).await?;
        }
        Ok(expired)
    }
}
