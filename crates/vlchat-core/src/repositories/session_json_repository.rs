use std::path::PathBuf;

use super::error::{RepositoryError, RepositoryResult};
use super::session_repository::{BoxFuture, PersistedSession, SessionRepository};

/// JSON file-based repository for the session blob.
/// Defaults to ~/.config/vlchat/session.json
pub struct SessionJsonRepository {
    file_path: PathBuf,
}

impl SessionJsonRepository {
    pub fn new() -> RepositoryResult<Self> {
        let config_dir = dirs::config_dir().ok_or(RepositoryError::NoConfigDir)?;

        Ok(Self {
            file_path: config_dir.join("vlchat").join("session.json"),
        })
    }

    /// Create repository with custom path (for testing)
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn storage_path(&self) -> String {
        self.file_path.to_string_lossy().to_string()
    }
}

impl SessionRepository for SessionJsonRepository {
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Option<PersistedSession>>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            // First run
            if !path.exists() {
                return Ok(None);
            }

            let contents = tokio::fs::read_to_string(&path).await?;
            let session: PersistedSession = serde_json::from_str(&contents)?;
            Ok(Some(session))
        })
    }

    fn save(&self, session: PersistedSession) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let json = serde_json::to_string_pretty(&session)?;

            // Write atomically using temp file + rename
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, json).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationContext, ConversationSummary, Turn};

    fn sample_session() -> PersistedSession {
        let mut ctx = ConversationContext::new(false);
        ctx.history.push(Turn::user("describe this", vec!["cat.png".to_string()]));

        let mut session = PersistedSession::default();
        session.conversations.push(ConversationSummary {
            key: "conv-1".to_string(),
            label: "describe this".to_string(),
        });
        session.conversation_contexts.insert("conv-1".to_string(), ctx);
        session
    }

    #[tokio::test]
    async fn test_load_missing_file_is_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionJsonRepository::with_path(dir.path().join("session.json"));
        assert!(repo.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let repo = SessionJsonRepository::with_path(path.clone());

        repo.save(sample_session()).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded, sample_session());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let repo = SessionJsonRepository::with_path(path);
        assert!(matches!(
            repo.load().await,
            Err(RepositoryError::Malformed(_))
        ));
    }
}
