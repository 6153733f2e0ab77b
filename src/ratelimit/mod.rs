//! Per-conversation send gating
//!
//! Each conversation gets a cooldown between consecutive sends and a lifetime
//! message ceiling. The check consumes a slot when it allows a send, so callers
//! must not call it for inspection only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::AppError;

/// Human-readable reason surfaced when a conversation's quota is exhausted.
const QUOTA_EXHAUSTED_REASON: &str = "You've reached the message limit for this chat. Please start a new chat to continue the conversation.";

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitVerdict {
    pub allowed: bool,
    /// User-facing explanation; only set when the quota is exhausted.
    pub reason: Option<String>,
    /// Remaining wait; only set when the cooldown window has not elapsed.
    pub cooldown: Option<Duration>,
}

impl RateLimitVerdict {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            cooldown: None,
        }
    }

    fn cooling_down(remaining: Duration) -> Self {
        Self {
            allowed: false,
            reason: None,
            cooldown: Some(remaining),
        }
    }

    fn exhausted() -> Self {
        Self {
            allowed: false,
            reason: Some(QUOTA_EXHAUSTED_REASON.to_string()),
            cooldown: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ChatLimit {
    /// `None` until the first allowed send.
    last_request: Option<Instant>,
    total_messages: u32,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    limits: Arc<Mutex<HashMap<String, ChatLimit>>>,
    cleanup: Option<JoinHandle<()>>,
}

impl RateLimiter {
    /// Create a limiter and start its background cleanup task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: RateLimitConfig) -> Self {
        let limits: Arc<Mutex<HashMap<String, ChatLimit>>> = Arc::default();
        let cleanup = Self::spawn_cleanup(Arc::clone(&limits), config.cleanup_interval);
        Self {
            config,
            limits,
            cleanup: Some(cleanup),
        }
    }

    /// Periodically purge entries whose last request is older than the
    /// cleanup interval, bounding memory growth.
    fn spawn_cleanup(
        limits: Arc<Mutex<HashMap<String, ChatLimit>>>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let now = Instant::now();
                let mut limits = limits.lock().expect("rate limiter lock poisoned");
                let before = limits.len();
                limits.retain(|_, limit| match limit.last_request {
                    Some(at) => now.duration_since(at) <= interval,
                    None => false,
                });
                let purged = before - limits.len();
                if purged > 0 {
                    tracing::debug!(purged, "purged idle rate-limit entries");
                }
            }
        })
    }

    /// Check whether `chat_id` may send now, consuming a slot if allowed.
    ///
    /// Check-and-consume happens atomically within this call: an allowed
    /// verdict has already updated `last_request` and the message counter.
    /// Disallowed verdicts consume nothing.
    pub fn check_rate_limit(&self, chat_id: &str) -> Result<RateLimitVerdict, AppError> {
        if chat_id.is_empty() {
            return Err(AppError::validation("Chat ID is required"));
        }

        let mut limits = self.limits.lock().expect("rate limiter lock poisoned");
        let limit = limits.entry(chat_id.to_string()).or_insert(ChatLimit {
            last_request: None,
            total_messages: 0,
        });

        let now = Instant::now();
        if let Some(last) = limit.last_request {
            let elapsed = now.duration_since(last);
            if elapsed < self.config.cooldown {
                return Ok(RateLimitVerdict::cooling_down(self.config.cooldown - elapsed));
            }
        }

        if limit.total_messages >= self.config.max_messages_per_chat {
            return Ok(RateLimitVerdict::exhausted());
        }

        limit.last_request = Some(now);
        limit.total_messages += 1;
        Ok(RateLimitVerdict::allowed())
    }

    /// Reset tracking for a conversation, e.g. when it is deleted.
    pub fn clear_limits(&self, chat_id: &str) -> Result<(), AppError> {
        if chat_id.is_empty() {
            return Err(AppError::validation("Chat ID is required"));
        }
        self.limits
            .lock()
            .expect("rate limiter lock poisoned")
            .remove(chat_id);
        Ok(())
    }

    /// Cancel the cleanup task and drop all tracking.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
        self.limits
            .lock()
            .expect("rate limiter lock poisoned")
            .clear();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
    }
}
