//! Cross-instance conversation sync
//!
//! [`SyncHub`] hosts named broadcast topics; every coordinator instance that
//! connects a [`SyncChannel`] to the same hub and topic sees the others'
//! conversation-list snapshots. This is the in-process analogue of the
//! browser's same-origin BroadcastChannel: messages are never delivered back
//! to the instance that posted them.
//!
//! Broadcasting is best-effort. Failures are logged, never propagated into
//! the primary send flow, and a disconnected channel schedules its own
//! reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::conversation::Conversation;
use crate::error::AppError;

/// Event name carried by conversation-list updates.
pub const CHATS_UPDATED_EVENT: &str = "chats-updated";

/// Buffered updates per topic before slow receivers start lagging.
const TOPIC_BUFFER_SIZE: usize = 64;

/// Wire envelope posted on a topic. `data` is the serialized conversation
/// list with timestamps as ISO-8601 strings; `sender` is transport metadata
/// used to suppress self-delivery.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
    sender: Uuid,
}

/// Registry of named broadcast topics shared by coordinator instances.
///
/// Explicitly constructed and injected so tests can run isolated hubs
/// instead of sharing process-wide state.
pub struct SyncHub {
    topics: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    closed: AtomicBool,
}

impl SyncHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn topic(&self, name: &str) -> Result<broadcast::Sender<Envelope>, AppError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::SyncDisconnected);
        }
        let mut topics = self.topics.lock().expect("sync hub lock poisoned");
        let sender = topics
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER_SIZE).0);
        Ok(sender.clone())
    }

    /// Stop handing out topics. Channels that try to use the hub afterwards
    /// go into their reconnect cycle.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

type UpdateCallback = Arc<dyn Fn(Vec<Conversation>) + Send + Sync>;

#[derive(Default)]
struct ChannelInner {
    tx: Option<broadcast::Sender<Envelope>>,
    callback: Option<UpdateCallback>,
    listener: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

/// One instance's connection to a named sync topic.
pub struct SyncChannel {
    hub: Arc<SyncHub>,
    config: SyncConfig,
    instance: Uuid,
    inner: Arc<Mutex<ChannelInner>>,
}

impl SyncChannel {
    /// Connect to the configured topic on `hub`.
    ///
    /// If the topic cannot be opened the channel still comes back usable:
    /// it starts disconnected and schedules a reconnect instead of failing
    /// the caller.
    pub fn connect(hub: Arc<SyncHub>, config: SyncConfig) -> Self {
        let channel = Self {
            hub,
            config,
            instance: Uuid::new_v4(),
            inner: Arc::new(Mutex::new(ChannelInner::default())),
        };
        match channel.hub.topic(&channel.config.channel_name) {
            Ok(tx) => {
                channel.inner.lock().expect("sync channel lock poisoned").tx = Some(tx);
            }
            Err(err) => {
                tracing::warn!(
                    channel = %channel.config.channel_name,
                    error = %err,
                    "sync channel failed to connect, scheduling reconnect"
                );
                channel.schedule_reconnect();
            }
        }
        channel
    }

    /// Post the conversation list on the topic, tagged with `event`.
    ///
    /// Serialization and the actual post are deferred to the next scheduling
    /// tick; failures there are swallowed and logged. Returns
    /// [`AppError::SyncDisconnected`] when the channel is not connected (and
    /// schedules a reconnect); callers must treat that as non-fatal.
    pub fn broadcast(&self, event: &str, chats: &[Conversation]) -> Result<(), AppError> {
        let tx = {
            let inner = self.inner.lock().expect("sync channel lock poisoned");
            inner.tx.clone()
        };
        let Some(tx) = tx else {
            self.schedule_reconnect();
            return Err(AppError::SyncDisconnected);
        };

        let event = event.to_string();
        let chats = chats.to_vec();
        let sender = self.instance;
        tokio::spawn(async move {
            let data = match serde_json::to_value(&chats) {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(error = %err, "sync broadcast failed to serialize");
                    return;
                }
            };
            if let Err(err) = tx.send(Envelope { event, data, sender }) {
                tracing::warn!(error = %err, "sync broadcast had no receivers");
            }
        });
        Ok(())
    }

    /// Register the update callback, replacing any previous one.
    ///
    /// The callback fires for `chats-updated` envelopes from other instances;
    /// malformed payloads are dropped with a logged warning.
    pub fn on_update(&self, callback: impl Fn(Vec<Conversation>) + Send + Sync + 'static) {
        let mut inner = self.inner.lock().expect("sync channel lock poisoned");
        let callback: UpdateCallback = Arc::new(callback);
        inner.callback = Some(Arc::clone(&callback));
        if let Some(listener) = inner.listener.take() {
            listener.abort();
        }
        if let Some(tx) = &inner.tx {
            inner.listener = Some(Self::spawn_listener(tx.subscribe(), callback, self.instance));
        }
    }

    fn spawn_listener(
        mut rx: broadcast::Receiver<Envelope>,
        callback: UpdateCallback,
        instance: Uuid,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.sender == instance || envelope.event != CHATS_UPDATED_EVENT {
                            continue;
                        }
                        match serde_json::from_value::<Vec<Conversation>>(envelope.data) {
                            Ok(chats) => callback(chats),
                            Err(err) => {
                                tracing::warn!(error = %err, "dropping malformed sync payload");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "sync listener lagged, snapshots skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Retry the topic after the configured delay until it opens again.
    fn schedule_reconnect(&self) {
        let mut inner = self.inner.lock().expect("sync channel lock poisoned");
        if inner.reconnect.is_some() {
            return;
        }
        let hub = Arc::clone(&self.hub);
        let shared = Arc::clone(&self.inner);
        let name = self.config.channel_name.clone();
        let delay = self.config.reconnect_delay;
        let instance = self.instance;
        inner.reconnect = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                match hub.topic(&name) {
                    Ok(tx) => {
                        let mut inner = shared.lock().expect("sync channel lock poisoned");
                        if let Some(callback) = inner.callback.clone() {
                            if let Some(listener) = inner.listener.take() {
                                listener.abort();
                            }
                            inner.listener =
                                Some(Self::spawn_listener(tx.subscribe(), callback, instance));
                        }
                        inner.tx = Some(tx);
                        inner.reconnect = None;
                        tracing::debug!(channel = %name, "sync channel reconnected");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(channel = %name, "sync reconnect attempt failed");
                    }
                }
            }
        }));
    }

    /// Cancel any pending reconnect and close the channel. Idempotent.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock().expect("sync channel lock poisoned");
        if let Some(reconnect) = inner.reconnect.take() {
            reconnect.abort();
        }
        if let Some(listener) = inner.listener.take() {
            listener.abort();
        }
        inner.tx = None;
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Conversation, Message};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_config() -> SyncConfig {
        SyncConfig {
            channel_name: "test-sync".into(),
            reconnect_delay: Duration::from_millis(10),
        }
    }

    fn sample_chats() -> Vec<Conversation> {
        let mut chat = Conversation::new("therapist");
        chat.push_message(Message::agent("hello"));
        vec![chat]
    }

    #[tokio::test]
    async fn test_broadcast_reaches_other_instance_once() {
        let hub = SyncHub::new();
        let a = SyncChannel::connect(Arc::clone(&hub), test_config());
        let b = SyncChannel::connect(Arc::clone(&hub), test_config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_update(move |chats| {
            tx.send(chats).unwrap();
        });

        let chats = sample_chats();
        a.broadcast(CHATS_UPDATED_EVENT, &chats).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("update not delivered")
            .unwrap();
        // Timestamps round-trip through ISO-8601 strings back into real values.
        assert_eq!(received, chats);
        assert_eq!(
            received[0].messages[0].created_at,
            chats[0].messages[0].created_at
        );

        // Exactly once.
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_own_broadcasts_are_not_delivered_back() {
        let hub = SyncHub::new();
        let a = SyncChannel::connect(Arc::clone(&hub), test_config());
        // Keep a second subscriber alive so the topic has receivers.
        let b = SyncChannel::connect(Arc::clone(&hub), test_config());
        b.on_update(|_| {});

        let (tx, mut rx) = mpsc::unbounded_channel();
        a.on_update(move |chats| {
            tx.send(chats).unwrap();
        });

        a.broadcast(CHATS_UPDATED_EVENT, &sample_chats()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_other_events_are_filtered_out() {
        let hub = SyncHub::new();
        let a = SyncChannel::connect(Arc::clone(&hub), test_config());
        let b = SyncChannel::connect(Arc::clone(&hub), test_config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_update(move |chats| {
            tx.send(chats).unwrap();
        });

        a.broadcast("some-other-event", &sample_chats()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let hub = SyncHub::new();
        let b = SyncChannel::connect(Arc::clone(&hub), test_config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_update(move |chats| {
            tx.send(chats).unwrap();
        });

        // Post garbage straight on the topic, from a foreign sender.
        let topic = hub.topic("test-sync").unwrap();
        topic
            .send(Envelope {
                event: CHATS_UPDATED_EVENT.to_string(),
                data: serde_json::json!({ "not": "a chat list" }),
                sender: Uuid::new_v4(),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnected_broadcast_signals_transport_error() {
        let hub = SyncHub::new();
        hub.close();
        let a = SyncChannel::connect(Arc::clone(&hub), test_config());

        let err = a.broadcast(CHATS_UPDATED_EVENT, &sample_chats()).unwrap_err();
        assert!(matches!(err, AppError::SyncDisconnected));
    }

    #[tokio::test]
    async fn test_reconnect_after_hub_comes_back() {
        let hub = SyncHub::new();
        hub.close();
        let a = SyncChannel::connect(Arc::clone(&hub), test_config());
        let b = SyncChannel::connect(Arc::clone(&hub), test_config());

        hub.reopen();
        // Both channels retry on their own timers.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_update(move |chats| {
            tx.send(chats).unwrap();
        });

        a.broadcast(CHATS_UPDATED_EVENT, &sample_chats()).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("update not delivered after reconnect");
        assert!(received.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let hub = SyncHub::new();
        let a = SyncChannel::connect(Arc::clone(&hub), test_config());
        a.disconnect();
        a.disconnect();
        assert!(matches!(
            a.broadcast(CHATS_UPDATED_EVENT, &sample_chats()),
            Err(AppError::SyncDisconnected)
        ));
    }
}
