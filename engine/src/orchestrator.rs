//! The session state machine.
//!
//! A [`SessionOrchestrator`] displays at most one conversation and owns at
//! most one open generation. The generation may target a conversation that
//! is no longer displayed; its events then only refresh that conversation's
//! registry entry.
//!
//! Driving the stream is the caller's job: await [`next_stream_event`],
//! hand the event to [`handle_stream_event`], then call
//! [`process_stream_events`] to drain whatever else is ready. [`drive`] does
//! all three until the generation ends.
//!
//! [`next_stream_event`]: SessionOrchestrator::next_stream_event
//! [`handle_stream_event`]: SessionOrchestrator::handle_stream_event
//! [`process_stream_events`]: SessionOrchestrator::process_stream_events
//! [`drive`]: SessionOrchestrator::drive

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use docent_client::{
    ApiError, CancelOutcome, ConversationApi, EventStream, NewMessage, StreamClient,
    StreamRequest,
};
use docent_types::{
    ConversationConfig, ConversationConfigPatch, ConversationId, Message, MessageId, Role,
    StreamEvent,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::generation::{Effect, Generation, Outcome, Phase};
use crate::notices::{Notice, NoticeLog};
use crate::progress::{ProgressAggregator, ProgressSnapshot};
use crate::registry::{ActiveStreamEntry, SharedRegistry};
use crate::snapshot::{SessionEvent, SessionSnapshot};

const SESSION_EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
struct ActiveGeneration {
    generation: Generation,
    stream: EventStream,
}

pub struct SessionOrchestrator<A: ConversationApi> {
    api: A,
    streams: StreamClient,
    registry: SharedRegistry,
    conversation: Option<ConversationId>,
    config: ConversationConfig,
    pending_patch: ConversationConfigPatch,
    messages: Vec<Message>,
    /// Answers kept in memory after their save failed; unknown to the server.
    unsaved: HashSet<MessageId>,
    active: Option<ActiveGeneration>,
    /// Registry entry mirrored for a conversation generating elsewhere.
    resumed: Option<ActiveStreamEntry>,
    /// Phase of the displayed conversation when this session is not generating for it.
    phase: Phase,
    sending: bool,
    progress: ProgressAggregator,
    notices: NoticeLog,
    last_error: Option<String>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl<A: ConversationApi> SessionOrchestrator<A> {
    pub fn new(
        api: A,
        streams: StreamClient,
        registry: SharedRegistry,
        config: ConversationConfig,
    ) -> Self {
        let snapshot = SessionSnapshot {
            config: config.clone(),
            ..SessionSnapshot::default()
        };
        let (snapshot_tx, _) = watch::channel(snapshot);
        let (events_tx, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            api,
            streams,
            registry,
            conversation: None,
            config,
            pending_patch: ConversationConfigPatch::default(),
            messages: Vec::new(),
            unsaved: HashSet::new(),
            active: None,
            resumed: None,
            phase: Phase::Idle,
            sending: false,
            progress: ProgressAggregator::new(),
            notices: NoticeLog::default(),
            last_error: None,
            snapshot_tx,
            events_tx,
        }
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<Arc<ProgressSnapshot>> {
        self.progress.subscribe()
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let pending = self
            .displayed_generation()
            .map(|generation| generation.message().clone())
            .or_else(|| self.resumed.as_ref().map(|entry| entry.message.clone()));

        SessionSnapshot {
            conversation_id: self.conversation.clone(),
            config: self.config.clone(),
            messages: self.messages.clone(),
            pending,
            phase: self.phase(),
            is_sending: self.sending,
            is_streaming: self.displayed_generation().is_some()
                || self.resumed.as_ref().is_some_and(|entry| entry.streaming),
            resumed: self.resumed.is_some(),
            notices: self.notices.to_vec(),
            last_error: self.last_error.clone(),
        }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressSnapshot> {
        self.progress.snapshot()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn pending_message(&self) -> Option<&Message> {
        self.displayed_generation()
            .map(Generation::message)
            .or_else(|| self.resumed.as_ref().map(|entry| &entry.message))
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        if let Some(generation) = self.displayed_generation() {
            return generation.phase();
        }
        if let Some(entry) = self.resumed.as_ref().filter(|entry| entry.streaming) {
            return resumed_phase(&entry.message);
        }
        self.phase
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// True while this session owns an open generation, displayed or not.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Conversation the open generation belongs to.
    #[must_use]
    pub fn generating_for(&self) -> Option<&ConversationId> {
        self.active
            .as_ref()
            .map(|active| active.generation.conversation_id())
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        let notices = self.notices.drain();
        if !notices.is_empty() {
            self.publish();
        }
        notices
    }

    fn is_displayed(&self, target: &ConversationId) -> bool {
        self.conversation.as_ref() == Some(target)
    }

    fn displayed_generation(&self) -> Option<&Generation> {
        self.active
            .as_ref()
            .map(|active| &active.generation)
            .filter(|generation| self.is_displayed(generation.conversation_id()))
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    // ========================================================================
    // Conversation selection and configuration
    // ========================================================================

    /// Change retrieval settings. For an existing conversation the change is
    /// sent to the server before the next message.
    pub fn update_config(&mut self, patch: ConversationConfigPatch) -> Result<(), SessionError> {
        if patch.is_empty() {
            return Ok(());
        }
        let touches_scope = patch.knowledge_base_ids.is_some() || patch.document_ids.is_some();
        if self.config.locked && touches_scope {
            return Err(SessionError::ConfigLocked);
        }
        self.config.apply(&patch);
        if self.conversation.is_some() {
            self.pending_patch.merge(patch);
        }
        self.publish();
        Ok(())
    }

    /// Show an empty conversation. An open generation keeps running in the
    /// registry.
    pub fn new_conversation(&mut self) {
        self.relinquish_displayed();
        self.conversation = None;
        self.clear_view();
        self.publish();
    }

    /// Display `id`, loading its history.
    ///
    /// A generation for `id` owned by another session is mirrored from the
    /// registry when the history ends with the user's message.
    pub async fn open_conversation(&mut self, id: ConversationId) -> Result<(), SessionError> {
        if self.is_displayed(&id) {
            return Ok(());
        }
        self.relinquish_displayed();
        self.conversation = Some(id.clone());
        self.clear_view();
        self.publish();

        let history = match self.api.list_messages(&id).await {
            Ok(history) => history,
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.publish();
                return Err(e.into());
            }
        };
        self.messages = history;

        if self.generating_for() == Some(&id) {
            // Back on our own generation; render it directly again.
            self.registry.delete(&id);
        } else {
            self.resumed = self.resumable_entry(&id);
        }
        tracing::debug!(conversation_id = %id, messages = self.messages.len(), resumed = self.resumed.is_some(), "Opened conversation");
        self.publish();
        Ok(())
    }

    /// Refresh the mirrored registry entry. Once it is gone the generation
    /// finished elsewhere and the history is reloaded. Returns whether a
    /// generation is still mirrored.
    pub async fn sync_from_registry(&mut self) -> Result<bool, SessionError> {
        let (Some(id), Some(_)) = (self.conversation.clone(), self.resumed.as_ref()) else {
            return Ok(false);
        };
        if let Some(entry) = self.registry.get(&id) {
            self.resumed = Some(entry);
            self.publish();
            return Ok(true);
        }

        self.resumed = None;
        self.messages = self.api.list_messages(&id).await?;
        self.publish();
        Ok(false)
    }

    fn resumable_entry(&self, id: &ConversationId) -> Option<ActiveStreamEntry> {
        let awaiting_answer = self
            .messages
            .last()
            .is_some_and(|message| message.role == Role::User);
        if !awaiting_answer {
            return None;
        }
        self.registry.get(id)
    }

    /// Hand the displayed generation to the registry before the view moves on.
    fn relinquish_displayed(&mut self) {
        if let Some(generation) = self.displayed_generation() {
            tracing::debug!(conversation_id = %generation.conversation_id(), "Relinquishing generation to registry");
            self.registry.put(registry_entry(generation));
        }
    }

    fn clear_view(&mut self) {
        self.messages.clear();
        self.unsaved.clear();
        self.resumed = None;
        self.pending_patch = ConversationConfigPatch::default();
        self.phase = Phase::Idle;
        self.last_error = None;
        self.progress.reset();
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a user message and start generating the answer.
    ///
    /// Rejected while a send or generation is in flight; nothing is queued.
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.ensure_idle()?;

        self.sending = true;
        self.phase = Phase::Sending;
        self.last_error = None;
        self.progress.reset();
        self.publish();

        let result = self.send_inner(text).await;
        if let Err(e) = &result {
            self.abort_send(e);
        }
        result
    }

    async fn send_inner(&mut self, text: &str) -> Result<(), SessionError> {
        let id = match self.conversation.clone() {
            Some(id) => {
                self.flush_config(&id).await?;
                id
            }
            None => {
                let conversation = self.api.create_conversation(text, &self.config).await?;
                tracing::info!(conversation_id = %conversation.id, "Created conversation");
                self.config = conversation.config;
                self.conversation = Some(conversation.id.clone());
                conversation.id
            }
        };

        let saved = self.api.append_message(&id, &NewMessage::user(text)).await?;
        if self.is_displayed(&id) {
            self.messages.push(saved);
        }
        self.publish();

        self.start_generation(id, text, false)
    }

    /// Discard the last answer and generate a new one for the same question.
    ///
    /// `bypass_cache` is forwarded to the server unchanged.
    pub async fn regenerate(&mut self, bypass_cache: bool) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let id = self.conversation.clone().ok_or(SessionError::NoConversation)?;

        let last_assistant = self
            .messages
            .last()
            .filter(|message| message.role == Role::Assistant)
            .map(|message| message.id.clone());
        let keep = self.messages.len() - usize::from(last_assistant.is_some());
        let question = self.messages[..keep]
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
            .ok_or(SessionError::NothingToRegenerate)?;

        self.sending = true;
        self.phase = Phase::Sending;
        self.last_error = None;
        self.progress.reset();
        self.publish();

        let result = self
            .regenerate_inner(&id, last_assistant.as_ref(), keep, &question, bypass_cache)
            .await;
        if let Err(e) = &result {
            self.abort_send(e);
        }
        result
    }

    async fn regenerate_inner(
        &mut self,
        id: &ConversationId,
        last_assistant: Option<&MessageId>,
        keep: usize,
        question: &str,
        bypass_cache: bool,
    ) -> Result<(), SessionError> {
        self.flush_config(id).await?;
        if let Some(message_id) = last_assistant
            && !self.unsaved.remove(message_id)
        {
            self.api.delete_message(id, message_id).await?;
        }
        self.messages.truncate(keep);
        self.publish();
        self.start_generation(id.clone(), question, bypass_cache)
    }

    fn ensure_idle(&mut self) -> Result<(), SessionError> {
        if self.sending || self.active.is_some() {
            tracing::debug!("Send rejected: generation in flight");
            self.notices.push(Notice::SendRejected);
            self.publish();
            return Err(SessionError::Busy);
        }
        if let Some(id) = &self.conversation {
            let elsewhere = self.resumed.as_ref().is_some_and(|entry| entry.streaming)
                || self
                    .registry
                    .get(id)
                    .is_some_and(|entry| entry.streaming);
            if elsewhere {
                let id = id.clone();
                self.notices.push(Notice::SendRejected);
                self.publish();
                return Err(SessionError::GeneratingElsewhere(id));
            }
        }
        Ok(())
    }

    fn abort_send(&mut self, error: &SessionError) {
        tracing::warn!("Send failed: {error}");
        self.sending = false;
        self.phase = Phase::Errored;
        self.last_error = Some(error.to_string());
        self.publish();
    }

    async fn flush_config(&mut self, id: &ConversationId) -> Result<(), ApiError> {
        if self.pending_patch.is_empty() {
            return Ok(());
        }
        self.api
            .update_conversation_config(id, &self.pending_patch)
            .await?;
        tracing::debug!(conversation_id = %id, "Flushed conversation config");
        self.pending_patch = ConversationConfigPatch::default();
        Ok(())
    }

    fn start_generation(
        &mut self,
        id: ConversationId,
        text: &str,
        bypass_cache: bool,
    ) -> Result<(), SessionError> {
        let request = StreamRequest {
            conversation_id: id.clone(),
            message: text.to_string(),
            knowledge_base_ids: self.config.knowledge_base_ids.clone(),
            document_ids: self.config.document_ids.clone(),
            web_search: self.config.web_search,
            source: self.config.source.clone(),
            bypass_cache,
        };
        let stream = self.streams.open(request)?;
        let pending = Message::pending_assistant(MessageId::new(format!(
            "pending-{}",
            uuid::Uuid::new_v4()
        )));
        tracing::info!(conversation_id = %id, bypass_cache, "Generation started");
        self.active = Some(ActiveGeneration {
            generation: Generation::new(id, pending),
            stream,
        });
        self.publish();
        Ok(())
    }

    /// Stop the open generation. Its terminal event then resolves the
    /// generation as cancelled, keeping the partial answer.
    pub async fn stop(&mut self) -> CancelOutcome {
        let Some(active) = self.active.as_mut() else {
            return CancelOutcome::NotStreaming;
        };
        active.generation.request_cancel();
        let id = active.generation.conversation_id().clone();

        let outcome = self.streams.cancel().await;
        if outcome
            == (CancelOutcome::Aborted {
                server_acknowledged: false,
            })
        {
            self.notices
                .push(Notice::CancelNotAcknowledged { conversation_id: id });
        }
        self.publish();
        outcome
    }

    // ========================================================================
    // Event processing
    // ========================================================================

    /// Wait for the next event of the open generation. `None` when nothing
    /// is open. Cancel-safe.
    pub async fn next_stream_event(&mut self) -> Option<StreamEvent> {
        let active = self.active.as_mut()?;
        Some(active.stream.recv().await.unwrap_or_else(|| {
            StreamEvent::Error("Stream closed without a terminal event".to_string())
        }))
    }

    /// Apply one event and publish. Coalesced progress waits for
    /// [`process_stream_events`](Self::process_stream_events).
    pub async fn handle_stream_event(&mut self, event: StreamEvent) {
        self.apply_event(event).await;
        self.publish();
    }

    /// Apply every event that is already waiting, then flush coalesced
    /// progress and publish once.
    pub async fn process_stream_events(&mut self) {
        while let Some(event) = self
            .active
            .as_mut()
            .and_then(|active| active.stream.try_recv())
        {
            self.apply_event(event).await;
        }
        self.progress.flush();
        self.publish();
    }

    /// Wait for, apply and drain one batch. Returns false when nothing is open.
    pub async fn step(&mut self) -> bool {
        let Some(event) = self.next_stream_event().await else {
            return false;
        };
        self.handle_stream_event(event).await;
        self.process_stream_events().await;
        true
    }

    /// Run the open generation to its end.
    pub async fn drive(&mut self) {
        while self.step().await {}
    }

    async fn apply_event(&mut self, event: StreamEvent) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let effects = active.generation.apply(event);
        let target = active.generation.conversation_id().clone();
        let displayed = self.is_displayed(&target);

        let mut finished = None;
        for effect in effects {
            match effect {
                Effect::ClearSendingLatch => self.sending = false,
                Effect::FirstContentToken => self.emit(SessionEvent::FirstContentToken {
                    conversation_id: target.clone(),
                }),
                Effect::Progress(update) => {
                    if displayed {
                        self.progress.apply(update);
                    }
                }
                Effect::Finish(outcome) => finished = Some(outcome),
            }
        }

        if let Some(outcome) = finished {
            self.active = None;
            self.finish(target, displayed, outcome).await;
        } else if !displayed && let Some(active) = &self.active {
            self.registry.put(registry_entry(&active.generation));
        }
    }

    async fn finish(&mut self, target: ConversationId, displayed: bool, outcome: Outcome) {
        self.sending = false;
        match outcome {
            Outcome::Completed(message) => {
                self.finish_answer(target, displayed, message, false).await;
            }
            Outcome::Cancelled(message) => {
                self.finish_answer(target, displayed, message, true).await;
            }
            Outcome::Errored(error) => {
                tracing::warn!(conversation_id = %target, "Generation failed: {error}");
                self.registry.delete(&target);
                if displayed {
                    self.progress.mark_errors();
                    self.phase = Phase::Errored;
                    self.last_error = Some(error.clone());
                }
                self.emit(SessionEvent::Errored {
                    conversation_id: target,
                    error,
                });
            }
        }
    }

    /// Persist a completed or cancelled answer. A failed save keeps the
    /// message in memory and records a notice.
    async fn finish_answer(
        &mut self,
        target: ConversationId,
        displayed: bool,
        mut message: Message,
        cancelled: bool,
    ) {
        let saved = match persist_assistant(&self.api, &target, &mut message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conversation_id = %target, "Failed to persist assistant message: {e}");
                self.notices.push(Notice::PersistFailed {
                    conversation_id: target.clone(),
                    reason: e.to_string(),
                });
                false
            }
        };
        self.registry.delete(&target);
        tracing::info!(conversation_id = %target, cancelled, "Generation finished");

        if displayed {
            if !saved {
                self.unsaved.insert(message.id.clone());
            }
            self.messages.push(message.clone());
            self.phase = if cancelled {
                Phase::Cancelled
            } else {
                Phase::Completed
            };
        }
        let conversation_id = target;
        self.emit(if cancelled {
            SessionEvent::Cancelled {
                conversation_id,
                message,
            }
        } else {
            SessionEvent::Completed {
                conversation_id,
                message,
            }
        });
    }
}

impl<A: ConversationApi + 'static> SessionOrchestrator<A> {
    /// Tear down the session while letting its generation finish.
    ///
    /// The generation moves to the registry and is driven by a background
    /// task that persists the final message and clears the entry. `None`
    /// when nothing was generating.
    pub fn detach(self) -> Option<JoinHandle<Outcome>> {
        let Self {
            api,
            registry,
            active,
            ..
        } = self;
        let active = active?;
        registry.put(registry_entry(&active.generation));
        Some(tokio::spawn(run_detached(api, registry, active)))
    }
}

async fn run_detached<A: ConversationApi>(
    api: A,
    registry: SharedRegistry,
    mut active: ActiveGeneration,
) -> Outcome {
    let target = active.generation.conversation_id().clone();
    loop {
        let event = active.stream.recv().await.unwrap_or_else(|| {
            StreamEvent::Error("Stream closed without a terminal event".to_string())
        });
        let finished = active
            .generation
            .apply(event)
            .into_iter()
            .find_map(|effect| match effect {
                Effect::Finish(outcome) => Some(outcome),
                _ => None,
            });

        let Some(mut outcome) = finished else {
            registry.put(registry_entry(&active.generation));
            continue;
        };

        if let Outcome::Completed(message) | Outcome::Cancelled(message) = &mut outcome
            && let Err(e) = persist_assistant(&api, &target, message).await
        {
            tracing::warn!(conversation_id = %target, "Failed to persist detached assistant message: {e}");
        }
        registry.delete(&target);
        tracing::info!(conversation_id = %target, "Detached generation finished");
        return outcome;
    }
}

/// Save a finished assistant message, adopting the server's id.
async fn persist_assistant<A: ConversationApi>(
    api: &A,
    id: &ConversationId,
    message: &mut Message,
) -> Result<(), ApiError> {
    let saved = api
        .append_message(id, &NewMessage::assistant_from(message))
        .await?;
    message.id = saved.id;
    Ok(())
}

fn registry_entry(generation: &Generation) -> ActiveStreamEntry {
    ActiveStreamEntry {
        conversation_id: generation.conversation_id().clone(),
        message: generation.message().clone(),
        streaming: generation.phase().is_active(),
        first_content_signaled: generation.first_content_signaled(),
        updated_at: Instant::now(),
    }
}

fn resumed_phase(message: &Message) -> Phase {
    if !message.content.is_empty() {
        Phase::StreamingContent
    } else if !message.thinking().is_empty() {
        Phase::StreamingThinking
    } else {
        Phase::Sending
    }
}
