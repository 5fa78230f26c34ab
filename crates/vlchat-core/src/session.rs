//! Orchestrates conversations, streaming completions and persistence.
//!
//! Every state change is published to subscribers as a full
//! [`SessionSnapshot`]. The store lock is never held across an `.await`,
//! so several conversations can stream at once while each conversation
//! accepts only one request at a time.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, ChatResult, StateError};
use crate::models::stream_manager::{fail_turn, pause_turn};
use crate::models::{ConversationsStore, Segment, SessionView, StreamStatus, Turn, TurnAssembler};
use crate::repositories::SessionRepository;
use crate::services::{CompletionClient, MediaResolver, transcript_builder};
use crate::settings::AppConfig;

/// What renderers receive after every state change
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation_id: Option<String>,
    /// History of the active conversation
    pub history: Vec<Turn>,
    pub state: SessionView,
}

/// How a submission ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    /// No completion client; the turn carries an inline error instead.
    Unconfigured,
}

struct SessionInner {
    config: AppConfig,
    client: Option<Arc<dyn CompletionClient>>,
    resolver: MediaResolver,
    repository: Option<Arc<dyn SessionRepository>>,
    store: Mutex<ConversationsStore>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionSnapshot>>>,
    /// Serializes saves so they land in snapshot order
    persist_lock: tokio::sync::Mutex<()>,
}

/// Cheaply cloneable handle to one chat session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn new(
        config: AppConfig,
        client: Option<Arc<dyn CompletionClient>>,
        resolver: MediaResolver,
        repository: Option<Arc<dyn SessionRepository>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                client,
                resolver,
                repository,
                store: Mutex::new(ConversationsStore::new()),
                subscribers: Mutex::new(Vec::new()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &MediaResolver {
        &self.inner.resolver
    }

    /// Register a renderer. The current state is delivered immediately.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.inner.store.lock();
        let _ = tx.send(Self::snapshot_of(&store));
        self.inner.subscribers.lock().push(tx);
        rx
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        Self::snapshot_of(&self.inner.store.lock())
    }

    pub fn view(&self) -> SessionView {
        self.inner.store.lock().view()
    }

    pub fn active_id(&self) -> Option<String> {
        self.inner.store.lock().active_id().map(str::to_string)
    }

    pub fn is_streaming(&self, conv_id: &str) -> bool {
        self.inner.store.lock().is_streaming(conv_id)
    }

    /// State of the latest request of a conversation.
    pub fn stream_status(&self, conv_id: &str) -> StreamStatus {
        self.inner.store.lock().stream_status(conv_id)
    }

    pub fn thinking_enabled(&self) -> bool {
        self.inner.store.lock().thinking_enabled()
    }

    fn snapshot_of(store: &ConversationsStore) -> SessionSnapshot {
        SessionSnapshot {
            conversation_id: store.active_id().map(str::to_string),
            history: store.active_history().to_vec(),
            state: store.view(),
        }
    }

    /// Send a copy of the state to every live subscriber.
    ///
    /// Called with the store lock held so snapshots go out in mutation order.
    fn publish_locked(&self, store: &ConversationsStore) {
        let mut subscribers = self.inner.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        let snapshot = Self::snapshot_of(store);
        subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    async fn persist(&self) {
        let Some(repository) = self.inner.repository.clone() else {
            return;
        };
        let _guard = self.inner.persist_lock.lock().await;
        let data = self.inner.store.lock().to_persisted();
        if let Err(e) = repository.save(data).await {
            warn!(error = ?e, "Failed to persist session");
        }
    }

    /// Apply a store operation, publish, and optionally persist.
    async fn mutate<T>(
        &self,
        persist: bool,
        op: impl FnOnce(&mut ConversationsStore) -> Result<T, StateError>,
    ) -> ChatResult<T> {
        let value = {
            let mut store = self.inner.store.lock();
            let value = op(&mut store)?;
            self.publish_locked(&store);
            value
        };
        if persist {
            self.persist().await;
        }
        Ok(value)
    }

    /// Load persisted conversations, replacing the in-memory set.
    ///
    /// Returns whether anything was loaded.
    pub async fn restore(&self) -> ChatResult<bool> {
        let Some(repository) = self.inner.repository.clone() else {
            return Ok(false);
        };
        let Some(persisted) = repository.load().await? else {
            debug!("No persisted session found");
            return Ok(false);
        };
        let mut store = self.inner.store.lock();
        store.apply_persisted(persisted)?;
        info!(conversations = store.count(), "Restored session");
        self.publish_locked(&store);
        Ok(true)
    }

    pub async fn new_chat(&self) -> ChatResult<bool> {
        self.mutate(false, |store| Ok(store.new_chat())).await
    }

    pub async fn select_conversation(&self, conv_id: &str) -> ChatResult<bool> {
        self.mutate(false, |store| Ok(store.select_conversation(conv_id)))
            .await
    }

    pub async fn set_thinking(&self, enabled: bool) -> ChatResult<()> {
        self.mutate(false, |store| {
            store.set_thinking(enabled);
            Ok(())
        })
        .await
    }

    /// Returns whether the deleted conversation was active.
    pub async fn delete_conversation(&self, conv_id: &str) -> ChatResult<bool> {
        self.mutate(true, |store| store.delete_conversation(conv_id))
            .await
    }

    pub async fn clear_history(&self) -> ChatResult<bool> {
        self.mutate(true, |store| store.clear_history()).await
    }

    pub async fn edit_turn(&self, index: usize, content: Vec<Segment>) -> ChatResult<()> {
        let marker = self.inner.config.locale.edited_marker();
        self.mutate(true, |store| store.edit_turn(index, content, &marker))
            .await
    }

    /// Replace only the text of a turn, keeping its files or thinking trace.
    pub async fn edit_turn_text(&self, index: usize, text: &str) -> ChatResult<()> {
        let marker = self.inner.config.locale.edited_marker();
        self.mutate(true, |store| {
            let len = store.active_history().len();
            let content = store
                .active_history()
                .get(index)
                .map(|turn| turn.content_with_text(text))
                .ok_or(StateError::TurnOutOfRange { index, len })?;
            store.edit_turn(index, content, &marker)
        })
        .await
    }

    pub async fn delete_turn(&self, index: usize) -> ChatResult<Turn> {
        self.mutate(true, |store| store.delete_turn(index)).await
    }

    /// Append a user turn (starting a conversation if none is active) and stream the answer.
    pub async fn send_message(&self, text: &str, files: Vec<String>) -> ChatResult<StreamOutcome> {
        let conv_id = self
            .mutate(true, |store| store.push_user_turn(text, files))
            .await?;
        self.submit(&conv_id).await
    }

    /// Drop the turn at `index` and everything after it, then answer again.
    pub async fn regenerate(&self, index: usize) -> ChatResult<StreamOutcome> {
        let conv_id = self
            .mutate(true, |store| store.truncate_for_regenerate(index))
            .await?;
        self.submit(&conv_id).await
    }

    /// Stop the in-flight request of a conversation.
    ///
    /// The turn is frozen as it is now; the streaming task notices at its
    /// next suspension point and consumes nothing more. Returns false when
    /// nothing was streaming.
    pub fn cancel(&self, conv_id: &str) -> ChatResult<bool> {
        let mut store = self.inner.store.lock();
        if store.get(conv_id).is_none() {
            return Err(StateError::UnknownConversation(conv_id.to_string()).into());
        }
        let Some(handle) = store.in_flight(conv_id).cloned() else {
            return Ok(false);
        };
        if handle.is_cancelled() {
            return Ok(false);
        }
        handle.cancel();
        if let Some(turn) = store.streaming_turn_mut(conv_id) {
            pause_turn(turn, self.inner.config.locale);
        }
        info!(conv_id = %conv_id, "Completion cancelled");
        self.publish_locked(&store);
        Ok(true)
    }

    /// Answer the trailing user turn of a conversation.
    ///
    /// Rejected with [`StateError::Busy`] while the conversation is already
    /// streaming.
    pub async fn submit(&self, conv_id: &str) -> ChatResult<StreamOutcome> {
        let (handle, history, model) = {
            let mut store = self.inner.store.lock();
            let ctx = store
                .get(conv_id)
                .ok_or_else(|| StateError::UnknownConversation(conv_id.to_string()))?;
            let history = ctx.history.clone();
            let model = self.inner.config.model_for(ctx.enable_thinking).to_string();
            let handle = store.begin_request(conv_id, &self.inner.config.assistant_header)?;
            self.publish_locked(&store);
            (handle, history, model)
        };
        self.persist().await;

        debug!(conv_id = %conv_id, model = %model, "Starting completion");
        let result = self.run_stream(conv_id, &handle, &history, &model).await;

        let status = match &result {
            Ok(StreamOutcome::Completed) => StreamStatus::Done,
            Ok(StreamOutcome::Cancelled) => StreamStatus::Cancelled,
            Ok(StreamOutcome::Unconfigured) => {
                StreamStatus::Error(ChatError::Configuration.to_string())
            }
            Err(e) => StreamStatus::Error(e.to_string()),
        };
        {
            let mut store = self.inner.store.lock();
            store.end_request(conv_id, status);
            self.publish_locked(&store);
        }
        self.persist().await;
        result
    }

    async fn run_stream(
        &self,
        conv_id: &str,
        handle: &CancellationToken,
        history: &[Turn],
        model: &str,
    ) -> ChatResult<StreamOutcome> {
        let locale = self.inner.config.locale;

        let Some(client) = self.inner.client.clone() else {
            let mut store = self.inner.store.lock();
            // Cancelled while the stream start was being saved
            if handle.is_cancelled() {
                return Ok(StreamOutcome::Cancelled);
            }
            let reason = ChatError::Configuration;
            warn!(conv_id = %conv_id, error = %reason, "Cannot submit");
            if let Some(turn) = store.streaming_turn_mut(conv_id) {
                turn.finish();
                turn.content = vec![Segment::error_text(locale.not_configured())];
            }
            self.publish_locked(&store);
            return Ok(StreamOutcome::Unconfigured);
        };

        let messages =
            transcript_builder::build(history, &self.inner.config.system_prompt, &self.inner.resolver)
                .await;
        if handle.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }

        let opened = tokio::select! {
            biased;
            _ = handle.cancelled() => return Ok(StreamOutcome::Cancelled),
            opened = client.stream_chat_completion(model, &messages) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail_stream(conv_id, handle, e),
        };
        // Timings exclude connection setup
        let mut assembler = TurnAssembler::new(locale);

        loop {
            let next = tokio::select! {
                biased;
                _ = handle.cancelled() => return Ok(StreamOutcome::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    let mut store = self.inner.store.lock();
                    if handle.is_cancelled() {
                        return Ok(StreamOutcome::Cancelled);
                    }
                    if let Some(turn) = store.streaming_turn_mut(conv_id) {
                        assembler.apply(&chunk, turn);
                    }
                    self.publish_locked(&store);
                }
                Some(Err(e)) => return self.fail_stream(conv_id, handle, e),
                None => break,
            }
        }

        let mut store = self.inner.store.lock();
        if handle.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }
        if let Some(turn) = store.streaming_turn_mut(conv_id) {
            assembler.complete(turn);
        }
        self.publish_locked(&store);
        debug!(conv_id = %conv_id, "Completion finished");
        Ok(StreamOutcome::Completed)
    }

    fn fail_stream(
        &self,
        conv_id: &str,
        handle: &CancellationToken,
        e: anyhow::Error,
    ) -> ChatResult<StreamOutcome> {
        let mut store = self.inner.store.lock();
        if handle.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }
        let message = format!("{e:#}");
        error!(conv_id = %conv_id, error = %message, "Completion stream failed");
        if let Some(turn) = store.streaming_turn_mut(conv_id) {
            fail_turn(turn, &message);
        }
        self.publish_locked(&store);
        Err(ChatError::Stream(message))
    }
}
