//! Conversation-session coordinator
//!
//! [`ConversationStore`] owns the in-memory conversation list and the active
//! conversation, and orchestrates the rate limiter, the persistence gateway,
//! the sync channel and the remote agent around each send.
//!
//! Concurrency model: the store is a single-owner `&mut` API driven from one
//! cooperative event loop. There is no internal locking; the only suspension
//! points are persistence, the remote call and the broadcast post. Callers
//! that overlap `send_message` calls on the same conversation are rejected
//! via an explicit per-conversation in-flight guard.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::agent::{AgentApi, AgentRequest};
use crate::config::Config;
use crate::conversation::persona::{self, MYSTERY_PERSONA_ID};
use crate::conversation::{Conversation, Message, MessageStatus, Persona};
use crate::error::AppError;
use crate::ratelimit::RateLimiter;
use crate::storage::Storage;
use crate::sync::{SyncChannel, CHATS_UPDATED_EVENT};

const LOAD_FAILED_MESSAGE: &str = "Failed to load chats. Please try refreshing the page.";
const SEND_FAILED_MESSAGE: &str = "Failed to send message. Please try again.";

pub struct ConversationStore {
    config: Config,
    chat_list: Vec<Conversation>,
    active_chat: Option<Uuid>,
    /// Single channel for any user-visible failure message.
    error_state: Option<String>,
    /// Content of the most recent failed send, kept for one retry.
    last_failed_message: Option<String>,
    initialized: bool,
    in_flight: HashSet<Uuid>,
    rate_limiter: RateLimiter,
    storage: Arc<dyn Storage>,
    agent: Arc<dyn AgentApi>,
    sync: SyncChannel,
}

impl ConversationStore {
    /// Build a store around its injected collaborators.
    ///
    /// Must be called within a tokio runtime (the rate limiter starts its
    /// cleanup timer here).
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        agent: Arc<dyn AgentApi>,
        sync: SyncChannel,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        Self {
            config,
            chat_list: Vec::new(),
            active_chat: None,
            error_state: None,
            last_failed_message: None,
            initialized: false,
            in_flight: HashSet::new(),
            rate_limiter,
            storage,
            agent,
            sync,
        }
    }

    /// Hydrate the conversation list from storage.
    ///
    /// Never fails the caller: a load failure surfaces through `error_state`
    /// and the app starts with an empty list. Hydration is retried on the
    /// next call since the store only marks itself initialized on success.
    pub async fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        match self.storage.load_chats().await {
            Ok(chats) => {
                self.chat_list = chats;
                self.initialized = true;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to hydrate chats from storage");
                self.error_state = Some(LOAD_FAILED_MESSAGE.to_string());
            }
        }
    }

    /// Ensure hydration, then activate `chat_id` if it exists, otherwise the
    /// most-recently-updated conversation. Returns `false` when there is
    /// nothing to activate (caller should navigate to conversation creation).
    pub async fn initialize_with_chat(&mut self, chat_id: Option<Uuid>) -> bool {
        if !self.initialized {
            self.initialize().await;
        }

        if let Some(id) = chat_id {
            if self.chat_list.iter().any(|c| c.id == id) {
                self.active_chat = Some(id);
                self.error_state = None;
                return true;
            }
        }

        if let Some(recent) = self.most_recent_chat().map(|c| c.id) {
            self.set_active_chat(recent);
            return true;
        }

        false
    }

    /// Create a conversation for `persona`, evicting the least-recently-
    /// updated one when the list is at capacity, and make it active.
    pub async fn create_chat(&mut self, persona: &Persona) -> Conversation {
        self.evict_to_capacity();

        let mut chat = Conversation::new(persona.id.clone());
        chat.push_message(Message::agent(persona::welcome_content(&persona.id)));

        self.active_chat = Some(chat.id);
        self.chat_list.push(chat.clone());
        self.persist().await;
        chat
    }

    /// Drop least-recently-updated conversations until one slot is free.
    /// Ties resolve to the earliest-inserted conversation.
    fn evict_to_capacity(&mut self) {
        let max_chats = self.config.chat.max_chats;
        while !self.chat_list.is_empty() && self.chat_list.len() >= max_chats {
            let oldest = self
                .chat_list
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.updated_at)
                .map(|(i, _)| i);
            let Some(oldest) = oldest else { break };
            let evicted = self.chat_list.remove(oldest);
            tracing::debug!(chat_id = %evicted.id, "evicted least-recently-updated conversation");
        }
    }

    /// Send a user turn in the active conversation.
    ///
    /// No-op without an active conversation. Rate-limit rejections stop
    /// before any message is appended: quota exhaustion surfaces its reason
    /// through `error_state`, a cooldown rejection stays silent (the UI
    /// cooldown indicator is driven separately). On remote failure the user
    /// message is marked `error`, the content is remembered for retry, and
    /// the failure is re-raised so callers can react.
    pub async fn send_message(&mut self, content: &str) -> Result<(), AppError> {
        let Some(active_id) = self.active_chat else {
            return Ok(());
        };
        if !self.chat_list.iter().any(|c| c.id == active_id) {
            return Ok(());
        }
        if self.in_flight.contains(&active_id) {
            return Err(AppError::SendInFlight(active_id));
        }

        self.error_state = None;
        self.last_failed_message = None;

        let verdict = self.rate_limiter.check_rate_limit(&active_id.to_string())?;
        if !verdict.allowed {
            if let Some(reason) = verdict.reason {
                self.error_state = Some(reason);
            }
            return Ok(());
        }

        let user_message = Message::user(content);
        let user_message_id = user_message.id;
        let (persona_id, celebrity_id) = match self.chat_mut(active_id) {
            Some(chat) => {
                chat.push_message(user_message);
                (chat.persona_id.clone(), chat.celebrity_id.clone())
            }
            None => return Ok(()),
        };
        // Persist before the remote call so a crash cannot lose the attempt.
        self.persist().await;

        self.in_flight.insert(active_id);
        let result = self
            .agent
            .send_message(AgentRequest {
                message: content.to_string(),
                persona_id: persona_id.clone(),
                celebrity_id,
            })
            .await;
        self.in_flight.remove(&active_id);

        match result {
            Ok(reply) => {
                if let Some(chat) = self.chat_mut(active_id) {
                    if persona_id == MYSTERY_PERSONA_ID && chat.celebrity_id.is_none() {
                        if let Some(celebrity) = &reply.celebrity {
                            chat.set_celebrity(celebrity.clone());
                        }
                    }
                    if let Some(msg) = chat.messages.iter_mut().find(|m| m.id == user_message_id) {
                        msg.set_status(MessageStatus::Sent);
                    }
                    chat.push_message(Message::agent(reply.content));
                }
                self.persist().await;
                if let Err(err) = self.sync.broadcast(CHATS_UPDATED_EVENT, &self.chat_list) {
                    tracing::warn!(error = %err, "failed to broadcast chat update");
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to send message");
                if let Some(chat) = self.chat_mut(active_id) {
                    if let Some(msg) = chat.messages.iter_mut().find(|m| m.id == user_message_id) {
                        msg.set_status(MessageStatus::Error);
                    }
                }
                self.error_state = Some(SEND_FAILED_MESSAGE.to_string());
                self.last_failed_message = Some(content.to_string());
                self.persist().await;
                Err(err)
            }
        }
    }

    /// Re-send the content of the last failed send, consuming it. No-op when
    /// there is no remembered failure.
    pub async fn retry_last_failed_message(&mut self) -> Result<(), AppError> {
        match self.last_failed_message.take() {
            Some(content) => self.send_message(&content).await,
            None => Ok(()),
        }
    }

    /// Switch the active conversation if it exists. Clears `error_state` but
    /// deliberately leaves `last_failed_message` intact.
    pub fn set_active_chat(&mut self, chat_id: Uuid) {
        if self.chat_list.iter().any(|c| c.id == chat_id) {
            self.active_chat = Some(chat_id);
            self.error_state = None;
        }
    }

    /// Remove a conversation, re-activating the most-recently-updated
    /// remaining one when the removed conversation was active.
    pub async fn remove_chat(&mut self, chat_id: Uuid) -> Result<(), AppError> {
        self.chat_list.retain(|c| c.id != chat_id);
        if self.active_chat == Some(chat_id) {
            self.active_chat = self.most_recent_chat().map(|c| c.id);
        }
        self.rate_limiter.clear_limits(&chat_id.to_string())?;
        self.persist().await;
        Ok(())
    }

    /// Apply a conversation-list snapshot received from another instance.
    ///
    /// Last-writer-wins at whole-list granularity: the incoming snapshot
    /// replaces the local list and is re-persisted so both instances
    /// converge. A per-conversation merge by `updated_at` would be safer for
    /// concurrent local edits but is deliberately not attempted here. If the
    /// active conversation is absent from the snapshot, the active reference
    /// resolves to `None`.
    pub async fn apply_remote_snapshot(&mut self, chats: Vec<Conversation>) {
        self.chat_list = chats;
        self.persist().await;
    }

    /// Tear down timers and the sync connection.
    pub fn shutdown(&mut self) {
        self.rate_limiter.shutdown();
        self.sync.disconnect();
    }

    pub fn chat_list(&self) -> &[Conversation] {
        &self.chat_list
    }

    pub fn active_chat(&self) -> Option<&Conversation> {
        let id = self.active_chat?;
        self.chat_list.iter().find(|c| c.id == id)
    }

    pub fn error_state(&self) -> Option<&str> {
        self.error_state.as_deref()
    }

    pub fn last_failed_message(&self) -> Option<&str> {
        self.last_failed_message.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Conversations ordered most-recently-updated first.
    pub fn sorted_chat_list(&self) -> Vec<&Conversation> {
        let mut chats: Vec<&Conversation> = self.chat_list.iter().collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        chats
    }

    pub fn most_recent_chat(&self) -> Option<&Conversation> {
        self.chat_list.iter().max_by_key(|c| c.updated_at)
    }

    fn chat_mut(&mut self, chat_id: Uuid) -> Option<&mut Conversation> {
        self.chat_list.iter_mut().find(|c| c.id == chat_id)
    }

    /// Save failures never interrupt the primary flow; they are logged and
    /// the in-memory state stays authoritative.
    async fn persist(&self) {
        if let Err(err) = self.storage.save_chats(&self.chat_list).await {
            tracing::warn!(error = %err, "failed to persist chats");
        }
    }
}
