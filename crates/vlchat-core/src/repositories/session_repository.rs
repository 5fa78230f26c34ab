use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::error::RepositoryResult;
use crate::models::{ConversationContext, ConversationSummary};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The persisted subset of the session state.
///
/// Layout matches the browser-storage blob: a sidebar list under
/// `conversations` and the per-conversation contexts keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
    #[serde(default)]
    pub conversation_contexts: HashMap<String, ConversationContext>,
}

/// Repository trait for session persistence
pub trait SessionRepository: Send + Sync + 'static {
    /// Load the persisted session, `None` on first run
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Option<PersistedSession>>>;

    /// Replace the persisted session
    fn save(&self, session: PersistedSession) -> BoxFuture<'static, RepositoryResult<()>>;
}
