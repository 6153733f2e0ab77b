//! persona-chat demo - interactive terminal session
//!
//! Picks a persona from the first CLI argument (default "therapist"),
//! creates a conversation and relays stdin lines to the remote agent.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use persona_chat::agent::RemoteAgentClient;
use persona_chat::config::Config;
use persona_chat::conversation::persona;
use persona_chat::storage;
use persona_chat::store::ConversationStore;
use persona_chat::sync::{SyncChannel, SyncHub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "persona_chat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let persona_id = std::env::args().nth(1).unwrap_or_else(|| "therapist".into());
    let persona = persona::find(&persona_id)
        .ok_or_else(|| anyhow::anyhow!("unknown persona '{}'", persona_id))?;

    let config = Config::from_env()?;
    let storage = storage::open(&config.storage).await;
    let agent = Arc::new(RemoteAgentClient::new(config.api.clone())?);
    let hub = SyncHub::new();
    let sync = SyncChannel::connect(hub, config.sync.clone());

    let mut store = ConversationStore::new(config, storage, agent, sync);
    store.initialize().await;
    if let Some(error) = store.error_state() {
        tracing::warn!("{}", error);
    }

    let chat = store.create_chat(&persona).await;
    tracing::info!("💬 Started a {} conversation ({})", persona.name, chat.id);
    if let Some(welcome) = chat.last_message() {
        println!("{} {}", persona.icon, welcome.display_content());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        if content == "/quit" {
            break;
        }

        let outcome = if content == "/retry" {
            store.retry_last_failed_message().await
        } else {
            store.send_message(content).await
        };

        match outcome {
            Ok(()) => {
                if let Some(error) = store.error_state() {
                    println!("! {}", error);
                } else if let Some(reply) = store.active_chat().and_then(|c| c.last_message()) {
                    println!("{} {}", persona.icon, reply.display_content());
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "send failed");
                if let Some(error) = store.error_state() {
                    println!("! {} (type /retry to try again)", error);
                }
            }
        }
    }

    store.shutdown();
    Ok(())
}
