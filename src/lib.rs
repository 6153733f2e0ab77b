//! persona-chat - client-side conversation-session coordinator
//!
//! Users pick a persona (therapist, tutor, chef, trainer, or a mystery
//! celebrity) and converse with a backend-hosted agent. This crate is the
//! part with real invariants: per-conversation rate limiting, optimistic
//! local mutation with retry on failure, a fixed-capacity
//! least-recently-updated eviction policy over the conversation list, and
//! cross-instance snapshot sync.
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use persona_chat::{
//!     config::Config, conversation::persona, storage, store::ConversationStore,
//!     agent::RemoteAgentClient, sync::{SyncChannel, SyncHub},
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let storage = storage::open(&config.storage).await;
//! let agent = Arc::new(RemoteAgentClient::new(config.api.clone())?);
//! let hub = SyncHub::new();
//! let sync = SyncChannel::connect(hub, config.sync.clone());
//!
//! let mut store = ConversationStore::new(config, storage, agent, sync);
//! store.initialize().await;
//! let persona = persona::find("therapist").unwrap();
//! store.create_chat(&persona).await;
//! store.send_message("Hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod ratelimit;
pub mod storage;
pub mod store;
pub mod sync;

pub use agent::{AgentApi, AgentReply, AgentRequest, RemoteAgentClient};
pub use config::Config;
pub use conversation::{Conversation, Message, MessageKind, MessageStatus, Persona};
pub use error::AppError;
pub use ratelimit::{RateLimitVerdict, RateLimiter};
pub use storage::{MemoryStorage, SqliteStorage, Storage};
pub use store::ConversationStore;
pub use sync::{SyncChannel, SyncHub, CHATS_UPDATED_EVENT};
