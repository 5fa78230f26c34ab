use std::collections::HashMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::conversation::{ConversationContext, ConversationSummary, Role, Segment, Turn};
use super::stream_manager::StreamStatus;
use crate::error::StateError;
use crate::repositories::PersistedSession;

/// Full, immutable copy of the session state handed to renderers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub conversations: Vec<ConversationSummary>,
    pub conversation_contexts: HashMap<String, ConversationContext>,
    pub active_id: Option<String>,
    pub enable_thinking: bool,
    pub streaming: Vec<String>,
}

/// Root aggregate of all conversations.
///
/// Invariants:
/// - a summary exists for a key iff a context exists for it;
/// - the active id, when set, is a known key;
/// - at most one in-flight request per conversation.
pub struct ConversationsStore {
    contexts: HashMap<String, ConversationContext>,
    summaries: Vec<ConversationSummary>,
    active_id: Option<String>,
    /// Thinking toggle shown by the UI for the next submission
    enable_thinking: bool,
    in_flight: HashMap<String, CancellationToken>,
    /// Latest request state per conversation
    statuses: HashMap<String, StreamStatus>,
}

impl ConversationsStore {
    pub fn new() -> Self {
        Self {
            contexts: HashMap::new(),
            summaries: Vec::new(),
            active_id: None,
            enable_thinking: true,
            in_flight: HashMap::new(),
            statuses: HashMap::new(),
        }
    }

    /// Create a conversation labeled with its first message and make it active.
    pub fn create_conversation(&mut self, first_message: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.contexts
            .insert(id.clone(), ConversationContext::new(self.enable_thinking));
        self.summaries.push(ConversationSummary {
            key: id.clone(),
            label: first_message.to_string(),
        });
        self.active_id = Some(id.clone());
        debug!(conv_id = %id, "Created conversation");
        id
    }

    /// Switch the active conversation. Returns false for the active or an unknown id.
    pub fn select_conversation(&mut self, id: &str) -> bool {
        if self.active_id.as_deref() == Some(id) {
            return false;
        }
        let Some(ctx) = self.contexts.get(id) else {
            return false;
        };
        self.enable_thinking = ctx.enable_thinking;
        self.active_id = Some(id.to_string());
        true
    }

    /// Leave the active conversation; the next message starts a new one.
    pub fn new_chat(&mut self) -> bool {
        if self.active_id.is_none() {
            return false;
        }
        self.active_id = None;
        self.enable_thinking = true;
        true
    }

    /// Remove a conversation and its summary. Returns whether it was active.
    pub fn delete_conversation(&mut self, id: &str) -> Result<bool, StateError> {
        self.ensure_idle(id)?;
        if self.contexts.remove(id).is_none() {
            return Err(StateError::UnknownConversation(id.to_string()));
        }
        self.summaries.retain(|s| s.key != id);
        self.statuses.remove(id);

        let was_active = self.active_id.as_deref() == Some(id);
        if was_active {
            self.active_id = None;
        }
        Ok(was_active)
    }

    /// Empty the active conversation's history. No-op without an active conversation.
    pub fn clear_history(&mut self) -> Result<bool, StateError> {
        let Some(id) = self.active_id.clone() else {
            return Ok(false);
        };
        self.ensure_idle(&id)?;
        if let Some(ctx) = self.contexts.get_mut(&id) {
            ctx.history.clear();
        }
        Ok(true)
    }

    /// Replace the content of a turn in the active conversation.
    pub fn edit_turn(
        &mut self,
        index: usize,
        content: Vec<Segment>,
        edited_marker: &str,
    ) -> Result<(), StateError> {
        let history = self.active_history_for_mutation()?;
        let len = history.len();
        let turn = history
            .get_mut(index)
            .ok_or(StateError::TurnOutOfRange { index, len })?;
        turn.apply_edit(content, edited_marker);
        Ok(())
    }

    /// Remove a turn from the active conversation.
    pub fn delete_turn(&mut self, index: usize) -> Result<Turn, StateError> {
        let history = self.active_history_for_mutation()?;
        if index >= history.len() {
            return Err(StateError::TurnOutOfRange {
                index,
                len: history.len(),
            });
        }
        Ok(history.remove(index))
    }

    /// Drop the turn at `index` and everything after it, recording the
    /// current thinking flag. Returns the active conversation id.
    pub fn truncate_for_regenerate(&mut self, index: usize) -> Result<String, StateError> {
        let enable_thinking = self.enable_thinking;
        let id = self
            .active_id
            .clone()
            .ok_or(StateError::NoActiveConversation)?;
        self.ensure_idle(&id)?;
        let ctx = self
            .contexts
            .get_mut(&id)
            .ok_or_else(|| StateError::UnknownConversation(id.clone()))?;
        if index > ctx.history.len() {
            return Err(StateError::TurnOutOfRange {
                index,
                len: ctx.history.len(),
            });
        }
        // Regenerating needs a user turn left to answer
        if index == 0 || ctx.history[index - 1].role != Role::User {
            return Err(StateError::NoPendingUserTurn(id));
        }
        ctx.history.truncate(index);
        ctx.enable_thinking = enable_thinking;
        Ok(id)
    }

    /// Append a user turn to the active conversation, creating one first if needed.
    pub fn push_user_turn(&mut self, text: &str, files: Vec<String>) -> Result<String, StateError> {
        let id = match self.active_id.clone() {
            Some(id) => id,
            None => self.create_conversation(text),
        };
        self.ensure_idle(&id)?;
        let enable_thinking = self.enable_thinking;
        let ctx = self
            .contexts
            .get_mut(&id)
            .ok_or_else(|| StateError::UnknownConversation(id.clone()))?;
        ctx.enable_thinking = enable_thinking;
        ctx.history.push(Turn::user(text, files));
        Ok(id)
    }

    fn active_history_for_mutation(&mut self) -> Result<&mut Vec<Turn>, StateError> {
        let id = self
            .active_id
            .clone()
            .ok_or(StateError::NoActiveConversation)?;
        self.ensure_idle(&id)?;
        self.contexts
            .get_mut(&id)
            .map(|ctx| &mut ctx.history)
            .ok_or(StateError::UnknownConversation(id))
    }

    fn ensure_idle(&self, id: &str) -> Result<(), StateError> {
        if self.in_flight.contains_key(id) {
            return Err(StateError::Busy(id.to_string()));
        }
        Ok(())
    }

    /// Register an in-flight request and append the pending assistant turn.
    ///
    /// Fails when the conversation is unknown, already streaming, or has no
    /// trailing user turn to answer.
    pub fn begin_request(
        &mut self,
        id: &str,
        assistant_header: &str,
    ) -> Result<CancellationToken, StateError> {
        self.ensure_idle(id)?;
        let ctx = self
            .contexts
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownConversation(id.to_string()))?;
        if !ctx.has_trailing_user_turn() {
            return Err(StateError::NoPendingUserTurn(id.to_string()));
        }
        ctx.history.push(Turn::pending_assistant(assistant_header));

        let handle = CancellationToken::new();
        self.in_flight.insert(id.to_string(), handle.clone());
        self.statuses.insert(id.to_string(), StreamStatus::Streaming);
        Ok(handle)
    }

    /// Release the conversation and record how its request ended.
    pub fn end_request(&mut self, id: &str, status: StreamStatus) {
        debug_assert!(status.is_terminal());
        self.in_flight.remove(id);
        if self.contexts.contains_key(id) {
            self.statuses.insert(id.to_string(), status);
        }
    }

    pub fn stream_status(&self, id: &str) -> StreamStatus {
        self.statuses.get(id).cloned().unwrap_or(StreamStatus::Idle)
    }

    pub fn in_flight(&self, id: &str) -> Option<&CancellationToken> {
        self.in_flight.get(id)
    }

    pub fn is_streaming(&self, id: &str) -> bool {
        self.in_flight.contains_key(id)
    }

    /// The trailing assistant turn of a conversation, if it is the in-flight one.
    pub fn streaming_turn_mut(&mut self, id: &str) -> Option<&mut Turn> {
        self.contexts
            .get_mut(id)
            .and_then(|ctx| ctx.history.last_mut())
            .filter(|turn| turn.role == Role::Assistant)
    }

    pub fn get(&self, id: &str) -> Option<&ConversationContext> {
        self.contexts.get(id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_history(&self) -> &[Turn] {
        self.active_id
            .as_deref()
            .and_then(|id| self.contexts.get(id))
            .map(|ctx| ctx.history.as_slice())
            .unwrap_or(&[])
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn thinking_enabled(&self) -> bool {
        self.enable_thinking
    }

    pub fn set_thinking(&mut self, enabled: bool) {
        self.enable_thinking = enabled;
    }

    pub fn count(&self) -> usize {
        self.contexts.len()
    }

    /// Summary list and context map agree, and the active id is known.
    pub fn is_consistent(&self) -> bool {
        let summaries_known = self.summaries.len() == self.contexts.len()
            && self
                .summaries
                .iter()
                .all(|s| self.contexts.contains_key(&s.key));
        let active_known = self
            .active_id
            .as_deref()
            .is_none_or(|id| self.contexts.contains_key(id));
        let single_loading = self
            .contexts
            .values()
            .all(|ctx| ctx.history.iter().filter(|t| t.loading).count() <= 1);
        summaries_known && active_known && single_loading
    }

    pub fn view(&self) -> SessionView {
        let mut streaming: Vec<String> = self.in_flight.keys().cloned().collect();
        streaming.sort();
        SessionView {
            conversations: self.summaries.clone(),
            conversation_contexts: self.contexts.clone(),
            active_id: self.active_id.clone(),
            enable_thinking: self.enable_thinking,
            streaming,
        }
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            conversations: self.summaries.clone(),
            conversation_contexts: self.contexts.clone(),
        }
    }

    /// Replace conversations with a persisted blob (last write wins).
    ///
    /// Repairs summary/context mismatches and finishes turns a previous
    /// process left mid-stream. Refused while any request is in flight.
    pub fn apply_persisted(&mut self, persisted: PersistedSession) -> Result<(), StateError> {
        if let Some(id) = self.in_flight.keys().min() {
            return Err(StateError::Busy(id.clone()));
        }
        let PersistedSession {
            conversations,
            mut conversation_contexts,
        } = persisted;

        for (id, ctx) in conversation_contexts.iter_mut() {
            for turn in ctx.history.iter_mut().filter(|t| t.loading) {
                debug!(conv_id = %id, turn = %turn.key, "Finishing turn left loading");
                turn.finish();
            }
        }

        let mut summaries: Vec<ConversationSummary> = Vec::with_capacity(conversations.len());
        for summary in conversations {
            if !conversation_contexts.contains_key(&summary.key) {
                warn!(conv_id = %summary.key, "Dropping summary without conversation");
                continue;
            }
            if summaries.iter().any(|s| s.key == summary.key) {
                continue;
            }
            summaries.push(summary);
        }
        let mut orphans: Vec<&String> = conversation_contexts
            .keys()
            .filter(|id| !summaries.iter().any(|s| &s.key == *id))
            .collect();
        orphans.sort();
        for id in orphans {
            let label = conversation_contexts[id]
                .history
                .iter()
                .find(|t| t.role == Role::User)
                .and_then(|t| t.user_text())
                .unwrap_or_default()
                .to_string();
            warn!(conv_id = %id, "Adding summary for conversation without one");
            summaries.push(ConversationSummary {
                key: id.clone(),
                label,
            });
        }

        self.contexts = conversation_contexts;
        self.summaries = summaries;
        if let Some(active) = self.active_id.as_deref()
            && !self.contexts.contains_key(active)
        {
            self.active_id = None;
        }
        self.statuses.retain(|id, _| self.contexts.contains_key(id));
        Ok(())
    }
}

impl Default for ConversationsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TurnStatus;

    fn store_with_history(turns: usize) -> (ConversationsStore, String) {
        let mut store = ConversationsStore::new();
        let id = store.create_conversation("first");
        for i in 0..turns {
            store.push_user_turn(&format!("msg {i}"), Vec::new()).unwrap();
        }
        (store, id)
    }

    #[test]
    fn test_create_and_delete_keep_invariant() {
        let mut store = ConversationsStore::new();
        let a = store.create_conversation("a");
        assert!(store.is_consistent());
        let b = store.create_conversation("b");
        assert!(store.is_consistent());
        assert_eq!(store.active_id(), Some(b.as_str()));
        assert_eq!(store.summaries().len(), 2);
        assert_eq!(store.summaries()[0].label, "a");

        assert!(!store.delete_conversation(&a).unwrap());
        assert!(store.is_consistent());
        assert_eq!(store.active_id(), Some(b.as_str()));

        assert!(store.delete_conversation(&b).unwrap());
        assert!(store.is_consistent());
        assert_eq!(store.active_id(), None);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_delete_unknown_conversation() {
        let mut store = ConversationsStore::new();
        assert_eq!(
            store.delete_conversation("nope"),
            Err(StateError::UnknownConversation("nope".to_string()))
        );
    }

    #[test]
    fn test_select_restores_thinking_flag() {
        let mut store = ConversationsStore::new();
        store.set_thinking(false);
        let a = store.create_conversation("a");
        store.set_thinking(true);
        let _b = store.create_conversation("b");

        assert!(store.select_conversation(&a));
        assert!(!store.thinking_enabled());
        assert!(!store.select_conversation(&a), "already active is a no-op");
        assert!(!store.select_conversation("unknown"));
        assert_eq!(store.active_id(), Some(a.as_str()));
    }

    #[test]
    fn test_new_chat_resets_thinking() {
        let mut store = ConversationsStore::new();
        assert!(!store.new_chat());
        store.create_conversation("a");
        store.set_thinking(false);
        assert!(store.new_chat());
        assert_eq!(store.active_id(), None);
        assert!(store.thinking_enabled());
    }

    #[test]
    fn test_clear_history_requires_active() {
        let mut store = ConversationsStore::new();
        assert_eq!(store.clear_history(), Ok(false));

        let (mut store, _) = store_with_history(3);
        assert_eq!(store.clear_history(), Ok(true));
        assert!(store.active_history().is_empty());
    }

    #[test]
    fn test_delete_turn_shifts_indices() {
        let (mut store, _) = store_with_history(3);
        let removed = store.delete_turn(1).unwrap();
        assert_eq!(removed.user_text(), Some("msg 1"));
        assert_eq!(store.active_history().len(), 2);
        assert_eq!(store.active_history()[1].user_text(), Some("msg 2"));

        assert_eq!(
            store.delete_turn(5).unwrap_err(),
            StateError::TurnOutOfRange { index: 5, len: 2 }
        );
    }

    #[test]
    fn test_edit_turn_marks_once() {
        let (mut store, _) = store_with_history(1);
        store
            .edit_turn(0, vec![Segment::files(vec![]), Segment::text("v2")], "Edited")
            .unwrap();
        store
            .edit_turn(0, vec![Segment::files(vec![]), Segment::text("v3")], "Edited")
            .unwrap();

        let turn = &store.active_history()[0];
        assert_eq!(turn.user_text(), Some("v3"));
        assert_eq!(turn.footer.as_deref(), Some("Edited"));
    }

    #[test]
    fn test_truncate_for_regenerate() {
        let (mut store, id) = store_with_history(4);
        store.set_thinking(false);
        let truncated = store.truncate_for_regenerate(2).unwrap();
        assert_eq!(truncated, id);
        assert_eq!(store.active_history().len(), 2);
        assert!(!store.get(&id).unwrap().enable_thinking);
    }

    #[test]
    fn test_truncate_for_regenerate_needs_user_turn() {
        let mut store = ConversationsStore::new();
        let id = store.create_conversation("q");
        store.push_user_turn("q", Vec::new()).unwrap();
        store.begin_request(&id, "bot").unwrap();
        store.end_request(&id, StreamStatus::Done);

        assert_eq!(
            store.truncate_for_regenerate(0),
            Err(StateError::NoPendingUserTurn(id.clone()))
        );
        assert_eq!(
            store.truncate_for_regenerate(2),
            Err(StateError::NoPendingUserTurn(id.clone()))
        );
        assert_eq!(store.active_history().len(), 2);

        assert_eq!(store.truncate_for_regenerate(1), Ok(id));
        assert_eq!(store.active_history().len(), 1);
    }

    #[test]
    fn test_begin_request_guards() {
        let mut store = ConversationsStore::new();
        let id = store.create_conversation("hello");
        assert_eq!(
            store.begin_request(&id, "bot").unwrap_err(),
            StateError::NoPendingUserTurn(id.clone())
        );

        store.push_user_turn("hello", Vec::new()).unwrap();
        let handle = store.begin_request(&id, "bot").unwrap();
        assert!(!handle.is_cancelled());
        assert!(store.is_streaming(&id));
        assert_eq!(
            store.begin_request(&id, "bot").unwrap_err(),
            StateError::Busy(id.clone())
        );
        assert_eq!(store.delete_turn(0).unwrap_err(), StateError::Busy(id.clone()));
        assert_eq!(
            store.delete_conversation(&id).unwrap_err(),
            StateError::Busy(id.clone())
        );

        let turn = store.streaming_turn_mut(&id).unwrap();
        assert!(turn.loading);
        assert_eq!(turn.status, Some(TurnStatus::Pending));
        assert!(store.is_consistent());

        assert_eq!(store.stream_status(&id), StreamStatus::Streaming);
        store.end_request(&id, StreamStatus::Cancelled);
        assert!(!store.is_streaming(&id));
        assert_eq!(store.stream_status(&id), StreamStatus::Cancelled);
        assert_eq!(store.stream_status("other"), StreamStatus::Idle);
    }

    #[test]
    fn test_apply_persisted_repairs_state() {
        let mut contexts = HashMap::new();
        let mut ctx = ConversationContext::new(false);
        ctx.history.push(Turn::user("orphan question", Vec::new()));
        let mut stuck = Turn::pending_assistant("bot");
        stuck.content.push(Segment::text("half"));
        ctx.history.push(stuck);
        contexts.insert("orphan".to_string(), ctx);
        contexts.insert("known".to_string(), ConversationContext::new(true));

        let persisted = PersistedSession {
            conversations: vec![
                ConversationSummary {
                    key: "known".to_string(),
                    label: "Known".to_string(),
                },
                ConversationSummary {
                    key: "ghost".to_string(),
                    label: "Ghost".to_string(),
                },
            ],
            conversation_contexts: contexts,
        };

        let mut store = ConversationsStore::new();
        store.create_conversation("in memory only");
        store.apply_persisted(persisted).unwrap();

        assert!(store.is_consistent());
        assert_eq!(store.active_id(), None);
        assert_eq!(store.summaries().len(), 2);
        assert_eq!(store.summaries()[1].label, "orphan question");
        let orphan = store.get("orphan").unwrap();
        assert!(!orphan.history[1].loading);
        assert_eq!(orphan.history[1].status, Some(TurnStatus::Done));
    }

    #[test]
    fn test_apply_persisted_refused_while_streaming() {
        let mut store = ConversationsStore::new();
        let id = store.push_user_turn("q2", Vec::new()).unwrap();
        store.begin_request(&id, "bot").unwrap();

        let mut ctx = ConversationContext::new(true);
        ctx.history.push(Turn::user("q1", Vec::new()));
        let mut answered = Turn::pending_assistant("bot");
        answered.content.push(Segment::text("a1"));
        answered.finish();
        ctx.history.push(answered);
        let mut persisted = PersistedSession::default();
        persisted.conversation_contexts.insert(id.clone(), ctx);

        assert_eq!(
            store.apply_persisted(persisted),
            Err(StateError::Busy(id.clone()))
        );
        let history = store.active_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user_text(), Some("q2"));
        assert!(store.streaming_turn_mut(&id).unwrap().loading);
    }

    #[tokio::test]
    async fn test_cancel_wakes_every_waiter() {
        let mut store = ConversationsStore::new();
        let id = store.push_user_turn("hello", Vec::new()).unwrap();
        let handle = store.begin_request(&id, "bot").unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let token = store.in_flight(&id).unwrap().clone();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();
        tokio::task::yield_now().await;

        handle.cancel();
        for waiter in waiters {
            tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
                .await
                .expect("waiter was not woken")
                .unwrap();
        }
    }
}
