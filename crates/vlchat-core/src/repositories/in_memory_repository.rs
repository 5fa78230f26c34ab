use std::sync::Arc;

use parking_lot::Mutex;

use super::error::RepositoryResult;
use super::session_repository::{BoxFuture, PersistedSession, SessionRepository};

/// In-memory repository for the session blob
/// Useful for testing and for `--no-persist` runs
#[derive(Clone, Default)]
pub struct InMemorySessionRepository {
    session: Arc<Mutex<Option<PersistedSession>>>,
    saves: Arc<Mutex<usize>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: PersistedSession) -> Self {
        let repo = Self::new();
        *repo.session.lock() = Some(session);
        repo
    }

    /// Last saved session
    pub fn snapshot(&self) -> Option<PersistedSession> {
        self.session.lock().clone()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl SessionRepository for InMemorySessionRepository {
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Option<PersistedSession>>> {
        let session = self.session.clone();
        Box::pin(async move { Ok(session.lock().clone()) })
    }

    fn save(&self, data: PersistedSession) -> BoxFuture<'static, RepositoryResult<()>> {
        let session = self.session.clone();
        let saves = self.saves.clone();
        Box::pin(async move {
            *session.lock() = Some(data);
            *saves.lock() += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let repo = InMemorySessionRepository::new();
        assert!(repo.load().await.unwrap().is_none());

        repo.save(PersistedSession::default()).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), Some(PersistedSession::default()));
        assert_eq!(repo.save_count(), 1);
    }
}
