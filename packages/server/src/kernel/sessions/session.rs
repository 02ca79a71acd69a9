use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "crawl_session_transport", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Request/response client on a long-lived process
    #[serde(alias = "stdio")]
    Interactive,
    /// Event-stream client over HTTP
    #[serde(alias = "sse")]
    Streaming,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Interactive => "interactive",
            Transport::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" | "stdio" => Ok(Transport::Interactive),
            "streaming" | "sse" => Ok(Transport::Streaming),
            other => anyhow::bail!("unknown transport '{}'", other),
        }
    }
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub transport: Transport,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_version: Option<String>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        transport: Transport,
        client_ip: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            created_at: now,
            last_active: now,
            client_ip,
            user_agent,
            client_name: None,
            client_version: None,
        }
    }

    /// Idle for at least `timeout`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_active >= timeout
    }

    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        SessionView {
            session: self.clone(),
            uptime_seconds: self.uptime_seconds(now),
        }
    }
}

/// A session as listed to clients and written to the shared file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub uptime_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transport_aliases() {
        let t: Transport = serde_json::from_value(json!("sse")).unwrap();
        assert_eq!(t, Transport::Streaming);
        let t: Transport = serde_json::from_value(json!("stdio")).unwrap();
        assert_eq!(t, Transport::Interactive);
        assert_eq!("SSE".parse::<Transport>().unwrap(), Transport::Streaming);
        assert!("carrier-pigeon".parse::<Transport>().is_err());
        assert_eq!(serde_json::to_value(Transport::Streaming).unwrap(), json!("streaming"));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let timeout = Duration::seconds(3600);
        let mut session = Session::new("s", Transport::Interactive, None, None, now);

        session.last_active = now - Duration::seconds(3599);
        assert!(!session.is_expired(now, timeout));
        session.last_active = now - Duration::seconds(3600);
        assert!(session.is_expired(now, timeout));
        session.last_active = now - Duration::seconds(3601);
        assert!(session.is_expired(now, timeout));
    }

    #[test]
    fn test_view_adds_uptime() {
        let now = Utc::now();
        let session = Session::new("s", Transport::Streaming, Some("10.0.0.1".into()), None, now - Duration::seconds(90));
        let value = serde_json::to_value(session.view(now)).unwrap();
        assert_eq!(value["session_id"], "s");
        assert_eq!(value["transport"], "streaming");
        assert_eq!(value["client_ip"], "10.0.0.1");
        assert_eq!(value["uptime_seconds"], 90.0);
    }

    #[test]
    fn test_parses_legacy_entry() {
        let session: Session = serde_json::from_value(json!({
            "session_id": "abc",
            "transport": "sse",
            "created_at": "2025-01-01T00:00:00+00:00",
            "last_active": "2025-01-01T00:10:00+00:00",
            "uptime_seconds": 12.5
        }))
        .unwrap();
        assert_eq!(session.transport, Transport::Streaming);
        assert!(session.client_name.is_none());
    }
}
