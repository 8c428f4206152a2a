//! Session record storage.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AuthResult;
use crate::session::AuthorizedSession;

/// Storage for authorized session records.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get(&self, session_id: &str) -> AuthResult<Option<AuthorizedSession>>;

    /// Inserts or replaces a record.
    async fn save(&self, session: &AuthorizedSession) -> AuthResult<()>;

    async fn delete(&self, session_id: &str) -> AuthResult<()>;

    async fn list(&self) -> AuthResult<Vec<AuthorizedSession>>;
}

/// In-memory [`SessionStorage`] backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    sessions: DashMap<String, AuthorizedSession>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn get(&self, session_id: &str) -> AuthResult<Option<AuthorizedSession>> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn save(&self, session: &AuthorizedSession) -> AuthResult<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> AuthResult<()> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn list(&self) -> AuthResult<Vec<AuthorizedSession>> {
        Ok(self.sessions.iter().map(|s| s.value().clone()).collect())
    }
}
