//! Chat session controller.
//!
//! Owns one conversation's [`ChatState`] and runs the send pipeline
//! against an [`InferenceService`]: validate, check the guest quota,
//! append the user's turn, clear the composer, then branch on image
//! attachments, guest mode, or the streaming exchange. State changes
//! go through the reducer under a single lock; collaborators observe
//! them on a broadcast event channel instead of polling.
//!
//! Storage is written optimistically: a failed append is logged and
//! the session keeps going, so a flaky disk never loses the user's
//! words from the screen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use solace_core::config::ChatConfig;
use solace_core::events::SessionEvent;
use solace_core::types::{Attachment, ConversationSummary, Message, Role, SourceRef};
use solace_store::ConversationStore;
use solace_voice::SpeechHandoff;

use crate::error::SessionError;
use crate::protocol::{InferenceRequest, InferenceService, StreamEvent};
use crate::state::{reduce, Action, ChatState, MessagePatch};
use crate::suggestions::SuggestionEngine;

/// Longest message accepted by [`ChatSessionController::send`].
pub const MAX_MESSAGE_CHARS: usize = 4000;

const GUEST_LIMIT_NOTICE: &str =
    "You've reached the free conversation limit. Sign in to keep talking — \
     everything here will be waiting for you.";

const TROUBLE_NOTICE: &str =
    "I'm having trouble responding right now. Please try again in a moment.";

const IMAGE_FAILURE_NOTICE: &str =
    "I couldn't look at that image. Could you describe what it shows?";

/// Controller for one chat session.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. A
/// second `send` while one is in flight is rejected with
/// [`SessionError::SendInProgress`] rather than queued.
pub struct ChatSessionController {
    state: Mutex<ChatState>,
    store: Arc<ConversationStore>,
    inference: Arc<dyn InferenceService>,
    suggestions: SuggestionEngine,
    config: ChatConfig,
    /// Authenticated user id; `None` runs the session as a guest.
    user_id: Option<String>,
    sending: AtomicBool,
    /// Voice loop response channel, attached after both controllers
    /// exist.
    speech: Mutex<Option<SpeechHandoff>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSessionController {
    pub fn new(
        store: Arc<ConversationStore>,
        inference: Arc<dyn InferenceService>,
        config: ChatConfig,
        user_id: Option<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(ChatState::default()),
            store,
            inference,
            suggestions: SuggestionEngine::new(),
            config,
            user_id,
            sending: AtomicBool::new(false),
            speech: Mutex::new(None),
            events,
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Clone of the current session state.
    pub fn snapshot(&self) -> Result<ChatState, SessionError> {
        Ok(self.state_mut()?.clone())
    }

    /// Whether a send is currently in flight.
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    // -- Composer --

    pub fn set_input(&self, input: impl Into<String>) -> Result<(), SessionError> {
        let mut state = self.state_mut()?;
        reduce(&mut state, Action::SetInput(input.into()));
        Ok(())
    }

    pub fn set_attachments(&self, attachments: Vec<Attachment>) -> Result<(), SessionError> {
        let mut state = self.state_mut()?;
        reduce(&mut state, Action::SetAttachments(attachments));
        Ok(())
    }

    pub fn add_attachments(&self, attachments: Vec<Attachment>) -> Result<(), SessionError> {
        let mut state = self.state_mut()?;
        reduce(&mut state, Action::AddAttachments(attachments));
        Ok(())
    }

    /// Quotes `id` on the next send.
    pub fn set_reply_to(&self, id: Uuid) -> Result<(), SessionError> {
        let mut state = self.state_mut()?;
        if state.message(id).is_none() {
            return Err(SessionError::MessageNotFound(id));
        }
        reduce(&mut state, Action::SetReplyTo(Some(id)));
        Ok(())
    }

    pub fn clear_reply_to(&self) -> Result<(), SessionError> {
        let mut state = self.state_mut()?;
        reduce(&mut state, Action::SetReplyTo(None));
        Ok(())
    }

    // -- Send pipeline --

    /// Sends the composer's current input.
    pub async fn send_current(&self) -> Result<(), SessionError> {
        let input = self.state_mut()?.input.clone();
        self.send(input).await
    }

    /// Runs one full exchange for `text`.
    ///
    /// The user's turn is appended (and persisted) before any network
    /// round trip; whatever happens afterwards, the loading flag is
    /// down again by the time this returns. An over-quota guest send
    /// appends only the limit notice.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        let trimmed = text.trim().to_string();
        let attachments = self.state_mut()?.attachments.clone();

        if trimmed.is_empty() && attachments.is_empty() {
            debug!("Ignoring blank send");
            return Ok(());
        }
        if trimmed.chars().count() > MAX_MESSAGE_CHARS {
            return Err(SessionError::MessageTooLong(MAX_MESSAGE_CHARS));
        }
        if self.sending.swap(true, Ordering::SeqCst) {
            return Err(SessionError::SendInProgress);
        }
        let _guard = SendGuard { controller: self };

        // An exhausted quota short-circuits before the composer is
        // touched: the notice is the only thing appended, and the
        // draft stays where it was.
        let is_guest = self.user_id.is_none();
        let guest_count = self.state_mut()?.guest_count;
        if is_guest && guest_count >= self.config.guest_limit {
            info!("Guest limit reached after {} exchanges", guest_count);
            self.append_message(Message::notice(GUEST_LIMIT_NOTICE))?;
            self.emit(SessionEvent::GuestLimitReached {
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        // The reply context is read out before the composer reset
        // wipes the target id.
        let reply_context = {
            let state = self.state_mut()?;
            state
                .reply_to
                .and_then(|id| state.message(id))
                .map(|m| m.content.clone())
        };

        self.append_message(Message::user(trimmed.clone(), attachments.clone()))?;

        // With the user's turn on screen, clear the composer and raise
        // the loading flag in one reduction.
        {
            let mut state = self.state_mut()?;
            reduce(&mut state, Action::ResetSendState);
        }
        self.emit(SessionEvent::LoadingChanged {
            loading: true,
            timestamp: Utc::now(),
        });

        if let Some(image) = attachments.iter().find(|a| a.is_image()) {
            self.run_image_exchange(image, &trimmed).await
        } else if is_guest {
            self.run_guest_exchange(&trimmed).await
        } else {
            self.run_streaming_exchange(&trimmed, reply_context).await
        }
    }

    /// Replays the last user turn.
    ///
    /// Replies that followed it are removed from the log and the
    /// store, then the exchange runs again. The composer is left
    /// untouched, so a half-typed draft survives a retry. A guest
    /// whose quota is exhausted gets the limit notice instead, with
    /// nothing removed.
    pub async fn retry(&self) -> Result<(), SessionError> {
        let (last_user, superseded) = {
            let state = self.state_mut()?;
            let Some(index) = state.messages.iter().rposition(|m| m.role == Role::User) else {
                debug!("Retry with no user turn to replay");
                return Ok(());
            };
            let superseded: Vec<Uuid> =
                state.messages[index + 1..].iter().map(|m| m.id).collect();
            (state.messages[index].clone(), superseded)
        };
        if self.sending.swap(true, Ordering::SeqCst) {
            return Err(SessionError::SendInProgress);
        }
        let _guard = SendGuard { controller: self };

        // Same gate as `send`: an over-quota retry appends the notice
        // and leaves the existing replies alone.
        let is_guest = self.user_id.is_none();
        let guest_count = self.state_mut()?.guest_count;
        if is_guest && guest_count >= self.config.guest_limit {
            self.append_message(Message::notice(GUEST_LIMIT_NOTICE))?;
            self.emit(SessionEvent::GuestLimitReached {
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        {
            let mut state = self.state_mut()?;
            let kept: Vec<Message> = state
                .messages
                .iter()
                .filter(|m| !superseded.contains(&m.id))
                .cloned()
                .collect();
            reduce(&mut state, Action::SetMessages(kept));
            reduce(&mut state, Action::SetLoading(true));
        }
        for id in &superseded {
            self.emit(SessionEvent::MessageRemoved {
                id: *id,
                timestamp: Utc::now(),
            });
            if let Err(e) = self.store.delete_message(*id, &self.config.conversation_id) {
                warn!("Failed to delete superseded reply {}: {}", id, e);
            }
        }
        self.emit(SessionEvent::LoadingChanged {
            loading: true,
            timestamp: Utc::now(),
        });
        info!("Retrying last exchange ({} replies removed)", superseded.len());

        if let Some(image) = last_user.first_image().cloned() {
            self.run_image_exchange(&image, &last_user.content).await
        } else if is_guest {
            self.run_guest_exchange(&last_user.content).await
        } else {
            self.run_streaming_exchange(&last_user.content, None).await
        }
    }

    // -- Message operations --

    /// Toggles `emoji` on a message's reactions and persists the result.
    pub fn react(&self, id: Uuid, emoji: &str) -> Result<(), SessionError> {
        let updated = {
            let mut state = self.state_mut()?;
            let Some(found) = state.message(id) else {
                return Err(SessionError::MessageNotFound(id));
            };
            let mut updated = found.clone();
            updated.toggle_reaction(emoji);
            reduce(
                &mut state,
                Action::UpdateMessage {
                    id,
                    patch: MessagePatch {
                        reactions: Some(updated.reactions.clone()),
                        ..MessagePatch::default()
                    },
                },
            );
            updated
        };
        self.emit(SessionEvent::MessageUpdated {
            id,
            timestamp: Utc::now(),
        });
        self.persist(&updated);
        Ok(())
    }

    /// Removes a message from the log and the store.
    ///
    /// The store delete runs even though the in-memory removal already
    /// happened; otherwise the next rehydrate would resurrect it. A
    /// storage failure is logged, not returned.
    pub fn delete_message(&self, id: Uuid) -> Result<(), SessionError> {
        {
            let mut state = self.state_mut()?;
            if state.message(id).is_none() {
                return Err(SessionError::MessageNotFound(id));
            }
            let kept: Vec<Message> = state
                .messages
                .iter()
                .filter(|m| m.id != id)
                .cloned()
                .collect();
            reduce(&mut state, Action::SetMessages(kept));
            if state.reply_to == Some(id) {
                reduce(&mut state, Action::SetReplyTo(None));
            }
            if state.currently_speaking == Some(id) {
                reduce(&mut state, Action::SetCurrentlySpeaking(None));
            }
        }
        self.emit(SessionEvent::MessageRemoved {
            id,
            timestamp: Utc::now(),
        });
        if let Err(e) = self.store.delete_message(id, &self.config.conversation_id) {
            error!("Failed to delete message {} from store: {}", id, e);
        }
        Ok(())
    }

    /// Returns a message's text for the platform clipboard.
    pub fn copy_message(&self, id: Uuid) -> Result<String, SessionError> {
        let state = self.state_mut()?;
        state
            .message(id)
            .map(|m| m.content.clone())
            .ok_or(SessionError::MessageNotFound(id))
    }

    /// Marks which message is being read aloud; `None` clears it.
    pub fn set_speaking(&self, id: Option<Uuid>) -> Result<(), SessionError> {
        {
            let mut state = self.state_mut()?;
            reduce(&mut state, Action::SetCurrentlySpeaking(id));
        }
        self.emit(SessionEvent::SpeakingChanged {
            message_id: id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    // -- Conversation lifecycle --

    /// Loads the persisted tail of the conversation into memory and
    /// clears its unread count. Returns how many messages came back.
    pub fn rehydrate(&self) -> Result<usize, SessionError> {
        let messages =
            self.store
                .load(&self.config.conversation_id, self.config.history_limit, 0)?;
        let count = messages.len();
        {
            let mut state = self.state_mut()?;
            reduce(&mut state, Action::SetMessages(messages));
        }
        if let Err(e) = self.store.mark_read(&self.config.conversation_id) {
            warn!("Failed to mark conversation read: {}", e);
        }
        info!(
            "Rehydrated {} messages from '{}'",
            count, self.config.conversation_id
        );
        Ok(count)
    }

    /// Deletes every message in the conversation, then empties the log.
    pub fn clear_conversation(&self) -> Result<(), SessionError> {
        self.store.clear(&self.config.conversation_id)?;
        let mut state = self.state_mut()?;
        reduce(&mut state, Action::SetMessages(Vec::new()));
        reduce(&mut state, Action::SetSuggestions(Vec::new()));
        Ok(())
    }

    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>, SessionError> {
        Ok(self.store.list_conversations()?)
    }

    // -- Voice wiring --

    /// Attaches the voice loop's response channel. Finalized replies
    /// are handed to it while its session is active.
    pub fn set_speech_handoff(&self, handoff: SpeechHandoff) -> Result<(), SessionError> {
        *self.speech_mut()? = Some(handoff);
        Ok(())
    }

    pub fn clear_speech_handoff(&self) -> Result<(), SessionError> {
        *self.speech_mut()? = None;
        Ok(())
    }

    // -- Send branches --

    async fn run_image_exchange(
        &self,
        image: &Attachment,
        prompt: &str,
    ) -> Result<(), SessionError> {
        info!("Analyzing image attachment {}", image.id);
        match self.inference.analyze_image(&image.uri, prompt).await {
            Ok(reply) => {
                let mut message = Message::assistant(reply);
                message.agent_used = Some("vision".to_string());
                let content = message.content.clone();
                self.append_message(message)?;
                self.refresh_suggestions(&content)?;
            }
            Err(e) => {
                warn!("Image analysis failed: {}", e);
                self.append_message(Message::notice(IMAGE_FAILURE_NOTICE))?;
            }
        }
        Ok(())
    }

    async fn run_guest_exchange(&self, prompt: &str) -> Result<(), SessionError> {
        match self.inference.send_guest(prompt, &self.config.language).await {
            Ok(reply) => {
                let message = Message::assistant(reply);
                let content = message.content.clone();
                self.append_message(message)?;
                {
                    let mut state = self.state_mut()?;
                    reduce(&mut state, Action::IncrementGuestCount);
                }
                self.refresh_suggestions(&content)?;
            }
            Err(e) => {
                warn!("Guest exchange failed: {}", e);
                self.append_message(Message::notice(TROUBLE_NOTICE))?;
            }
        }
        Ok(())
    }

    async fn run_streaming_exchange(
        &self,
        prompt: &str,
        reply_context: Option<String>,
    ) -> Result<(), SessionError> {
        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id;
        {
            let mut state = self.state_mut()?;
            reduce(&mut state, Action::AddMessage(placeholder));
            reduce(&mut state, Action::SetStreaming(true));
        }
        self.emit(SessionEvent::MessageAppended {
            id: placeholder_id,
            role: Role::Assistant,
            timestamp: Utc::now(),
        });
        self.emit(SessionEvent::StreamingChanged {
            streaming: true,
            timestamp: Utc::now(),
        });

        let request = InferenceRequest {
            prompt: prompt.to_string(),
            user_id: self.user_id.clone(),
            mode: self.config.mode,
            style: self.config.style,
            language: self.config.language.clone(),
            reply_context,
        };
        let mut rx = match self.inference.send_stream(request).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Failed to open response stream: {}", e);
                return self.fail_stream(placeholder_id);
            }
        };

        let mut metadata_seen = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Chunk { text } => {
                    {
                        let mut state = self.state_mut()?;
                        // The first chunk turns the placeholder from a
                        // spinner into visible text.
                        reduce(
                            &mut state,
                            Action::UpdateMessage {
                                id: placeholder_id,
                                patch: MessagePatch {
                                    append_content: Some(text.clone()),
                                    is_loading: Some(false),
                                    ..MessagePatch::default()
                                },
                            },
                        );
                    }
                    self.emit(SessionEvent::AssistantChunk {
                        id: placeholder_id,
                        text,
                        timestamp: Utc::now(),
                    });
                }
                StreamEvent::Metadata { agent, intent } => {
                    if metadata_seen {
                        debug!("Ignoring duplicate metadata event");
                        continue;
                    }
                    metadata_seen = true;
                    let mut state = self.state_mut()?;
                    reduce(
                        &mut state,
                        Action::UpdateMessage {
                            id: placeholder_id,
                            patch: MessagePatch {
                                agent_used: agent,
                                intent,
                                ..MessagePatch::default()
                            },
                        },
                    );
                }
                StreamEvent::Complete { thinking, sources } => {
                    return self.finish_stream(placeholder_id, thinking, sources);
                }
                StreamEvent::Error { message } => {
                    warn!("Response stream failed: {}", message);
                    return self.fail_stream(placeholder_id);
                }
            }
        }

        // The backend hung up without a terminal event.
        warn!("Response stream closed without a terminal event");
        self.fail_stream(placeholder_id)
    }

    /// Finalizes the streamed message: loading flag down, completion
    /// artifacts attached, row persisted, reply handed to the voice
    /// loop, suggestions refreshed from the reply's content.
    fn finish_stream(
        &self,
        id: Uuid,
        thinking: Option<String>,
        sources: Vec<SourceRef>,
    ) -> Result<(), SessionError> {
        let finalized = {
            let mut state = self.state_mut()?;
            reduce(
                &mut state,
                Action::UpdateMessage {
                    id,
                    patch: MessagePatch {
                        is_loading: Some(false),
                        thinking,
                        sources: if sources.is_empty() { None } else { Some(sources) },
                        ..MessagePatch::default()
                    },
                },
            );
            reduce(&mut state, Action::SetStreaming(false));
            state.message(id).cloned()
        };
        self.emit(SessionEvent::StreamingChanged {
            streaming: false,
            timestamp: Utc::now(),
        });

        let Some(message) = finalized else {
            // Deleted mid-stream; nothing left to persist.
            debug!("Streamed message {} vanished before finalize", id);
            return Ok(());
        };
        self.persist(&message);
        self.emit(SessionEvent::MessageFinalized {
            id,
            timestamp: Utc::now(),
        });

        if let Some(handoff) = self.speech_mut()?.as_ref() {
            if handoff.deliver(message.content.clone()) {
                debug!("Reply handed to voice loop");
            }
        }

        self.refresh_suggestions(&message.content)
    }

    /// Closes a failed stream. Chunks that already landed stay on the
    /// message; an empty placeholder is dropped outright. Either way a
    /// trouble notice follows.
    fn fail_stream(&self, id: Uuid) -> Result<(), SessionError> {
        let partial = {
            let mut state = self.state_mut()?;
            reduce(
                &mut state,
                Action::UpdateMessage {
                    id,
                    patch: MessagePatch {
                        is_loading: Some(false),
                        ..MessagePatch::default()
                    },
                },
            );
            reduce(&mut state, Action::SetStreaming(false));
            state.message(id).cloned()
        };
        self.emit(SessionEvent::StreamingChanged {
            streaming: false,
            timestamp: Utc::now(),
        });

        match partial {
            Some(message) if message.content.is_empty() => {
                {
                    let mut state = self.state_mut()?;
                    let kept: Vec<Message> = state
                        .messages
                        .iter()
                        .filter(|m| m.id != id)
                        .cloned()
                        .collect();
                    reduce(&mut state, Action::SetMessages(kept));
                }
                self.emit(SessionEvent::MessageRemoved {
                    id,
                    timestamp: Utc::now(),
                });
            }
            Some(message) => self.persist(&message),
            None => {}
        }
        self.append_message(Message::notice(TROUBLE_NOTICE))
    }

    // -- Internals --

    fn state_mut(&self) -> Result<MutexGuard<'_, ChatState>, SessionError> {
        self.state
            .lock()
            .map_err(|e| SessionError::Storage(format!("session lock poisoned: {}", e)))
    }

    fn speech_mut(&self) -> Result<MutexGuard<'_, Option<SpeechHandoff>>, SessionError> {
        self.speech
            .lock()
            .map_err(|e| SessionError::Storage(format!("speech lock poisoned: {}", e)))
    }

    fn emit(&self, event: SessionEvent) {
        // Send only fails with no subscribers, which is fine.
        let _ = self.events.send(event);
    }

    /// Appends to the in-memory log first, then writes the store.
    fn append_message(&self, message: Message) -> Result<(), SessionError> {
        let id = message.id;
        let role = message.role;
        {
            let mut state = self.state_mut()?;
            reduce(&mut state, Action::AddMessage(message.clone()));
        }
        self.emit(SessionEvent::MessageAppended {
            id,
            role,
            timestamp: Utc::now(),
        });
        self.persist(&message);
        Ok(())
    }

    /// Best-effort store write. Notices are synthesized client-side
    /// and never stored.
    fn persist(&self, message: &Message) {
        if message.is_notice() {
            return;
        }
        if let Err(e) = self.store.append(message, &self.config.conversation_id) {
            error!("Failed to persist message {}: {}", message.id, e);
        }
    }

    fn refresh_suggestions(&self, reply: &str) -> Result<(), SessionError> {
        let suggestions = self.suggestions.suggest(reply);
        {
            let mut state = self.state_mut()?;
            reduce(&mut state, Action::SetSuggestions(suggestions.clone()));
        }
        self.emit(SessionEvent::SuggestionsUpdated {
            suggestions,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Drops the send gate and the loading flag no matter how the send
/// branch exits.
struct SendGuard<'a> {
    controller: &'a ChatSessionController,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.controller.state.lock() {
            reduce(&mut state, Action::SetLoading(false));
            reduce(&mut state, Action::SetStreaming(false));
        }
        self.controller.sending.store(false, Ordering::SeqCst);
        self.controller.emit(SessionEvent::LoadingChanged {
            loading: false,
            timestamp: Utc::now(),
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
