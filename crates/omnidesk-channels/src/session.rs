//! Webchat visitor session registry.
//!
//! Sessions are process-local and never persisted; they exist to lazily
//! materialize a Contact and Conversation on a visitor's first event and
//! to route session-scoped broadcasts. Entries are evicted when their
//! connection disconnects or when [`SessionRegistry::evict_idle`] sweeps
//! them out.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use omnidesk_core::types::{CompanyId, ConnectionId};

/// Ephemeral visitor session state.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The webchat connection this session arrived on.
    pub connection_id: ConnectionId,
    /// Owning tenant.
    pub company_id: CompanyId,
    /// Visitor name, when the widget collected one.
    pub visitor_name: Option<String>,
    /// Visitor email, when collected.
    pub visitor_email: Option<String>,
    /// Visitor phone, when collected.
    pub visitor_phone: Option<String>,
    /// First-seen time.
    pub created_at: DateTime<Utc>,
    /// Last-activity time, refreshed on every event.
    pub last_seen_at: DateTime<Utc>,
}

/// In-memory map from visitor session id to session state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionInfo>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity for a session, creating it on first contact and
    /// refreshing visitor identity fields when the widget re-sends them.
    pub async fn touch(
        &self,
        session_id: &str,
        connection_id: ConnectionId,
        company_id: CompanyId,
        visitor_name: Option<String>,
        visitor_email: Option<String>,
        visitor_phone: Option<String>,
    ) -> SessionInfo {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionInfo {
                connection_id,
                company_id,
                visitor_name: None,
                visitor_email: None,
                visitor_phone: None,
                created_at: now,
                last_seen_at: now,
            });
        entry.last_seen_at = now;
        if visitor_name.is_some() {
            entry.visitor_name = visitor_name;
        }
        if visitor_email.is_some() {
            entry.visitor_email = visitor_email;
        }
        if visitor_phone.is_some() {
            entry.visitor_phone = visitor_phone;
        }
        entry.clone()
    }

    /// Look up a session.
    pub async fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop every session belonging to a connection (on disconnect).
    pub async fn evict_for_connection(&self, connection_id: &ConnectionId) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, info| &info.connection_id != connection_id);
        before - sessions.len()
    }

    /// Drop sessions idle longer than `ttl`. Returns the eviction count.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, info| info.last_seen_at >= cutoff);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle webchat sessions");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ConnectionId, CompanyId) {
        (ConnectionId::new("conn1"), CompanyId::new("co1"))
    }

    #[tokio::test]
    async fn test_touch_creates_once() {
        let registry = SessionRegistry::new();
        let (conn, co) = ids();

        let first = registry
            .touch("sess-1", conn.clone(), co.clone(), None, None, None)
            .await;
        let second = registry
            .touch(
                "sess-1",
                conn,
                co,
                Some("Visitor".to_string()),
                None,
                None,
            )
            .await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.visitor_name.as_deref(), Some("Visitor"));
    }

    #[tokio::test]
    async fn test_identity_fields_not_cleared_by_omission() {
        let registry = SessionRegistry::new();
        let (conn, co) = ids();

        registry
            .touch(
                "sess-1",
                conn.clone(),
                co.clone(),
                Some("Visitor".to_string()),
                Some("v@example.com".to_string()),
                None,
            )
            .await;
        let after = registry.touch("sess-1", conn, co, None, None, None).await;

        assert_eq!(after.visitor_name.as_deref(), Some("Visitor"));
        assert_eq!(after.visitor_email.as_deref(), Some("v@example.com"));
    }

    #[tokio::test]
    async fn test_evict_for_connection() {
        let registry = SessionRegistry::new();
        let (conn, co) = ids();
        let other = ConnectionId::new("conn2");

        registry
            .touch("a", conn.clone(), co.clone(), None, None, None)
            .await;
        registry
            .touch("b", conn.clone(), co.clone(), None, None, None)
            .await;
        registry.touch("c", other, co, None, None, None).await;

        assert_eq!(registry.evict_for_connection(&conn).await, 2);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_fresh_sessions() {
        let registry = SessionRegistry::new();
        let (conn, co) = ids();

        registry.touch("fresh", conn, co, None, None, None).await;

        assert_eq!(registry.evict_idle(Duration::minutes(30)).await, 0);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_evict_idle_drops_stale_sessions() {
        let registry = SessionRegistry::new();
        let (conn, co) = ids();

        registry.touch("stale", conn, co, None, None, None).await;
        {
            let mut sessions = registry.sessions.write().await;
            sessions.get_mut("stale").unwrap().last_seen_at =
                Utc::now() - Duration::minutes(90);
        }

        assert_eq!(registry.evict_idle(Duration::minutes(30)).await, 1);
        assert!(registry.is_empty().await);
    }
}
