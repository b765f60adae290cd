//! Bot process: reminder scheduler, HTTP gateway and keepalive.
//!
//! Configuration comes from `config.toml` (see `NIKKI_CONFIG`) with
//! secrets taken from the environment.

use nikki::channels::{DiscordMessenger, GatewayState, Messenger, run_gateway, spawn_keepalive};
use nikki::chat::{ChatService, ConversationMemory, GeminiClient, RoutingPolicy};
use nikki::commands::CommandService;
use nikki::config::{BotConfig, ConfigIssueSeverity};
use nikki::scheduler::{JsonFileSnapshots, ReminderScheduler, ReminderStore, SystemClock};
use nikki::scheduler::store::shared;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::load()?;
    let _log_guard = nikki::logging::init(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "nikki starting");

    let mut blocking = false;
    for issue in config.validate() {
        match issue.severity {
            ConfigIssueSeverity::Error => {
                blocking = true;
                tracing::error!(id = %issue.id, "{}", issue.summary);
            }
            ConfigIssueSeverity::Warning => tracing::warn!(id = %issue.id, "{}", issue.summary),
        }
    }
    if blocking {
        anyhow::bail!("configuration has blocking issues");
    }

    let store = ReminderStore::open(JsonFileSnapshots::new(&config.reminders.state_path))
        .map_err(|e| anyhow::anyhow!("cannot load reminders: {e}"))?;
    let store = shared(store);

    let memory = ConversationMemory::open(
        Some(config.chat.memory_path.clone()),
        config.chat.max_turns_per_user,
    )?;
    let memory = Arc::new(Mutex::new(memory));

    let messenger: Arc<dyn Messenger> = Arc::new(DiscordMessenger::new(&config.discord)?);
    match messenger.health_check().await {
        Ok(true) => tracing::info!("discord credentials accepted"),
        Ok(false) => tracing::warn!("discord rejected the bot token"),
        Err(e) => tracing::warn!(error = %e, "discord health check failed"),
    }

    let model = Arc::new(GeminiClient::new(&config.llm)?);
    let chat = ChatService::new(
        Arc::clone(&memory),
        model,
        RoutingPolicy::from_config(&config.discord, &config.chat),
        &config.chat,
    )
    .with_system_prompt(config.llm.system_prompt.clone());

    let scheduler = ReminderScheduler::new(Arc::clone(&store), messenger)
        .with_config(&config.reminders);
    let cancel = scheduler.cancellation_token();
    let scheduler_task = scheduler.run();

    let keepalive = config.gateway.ping_url.clone().map(|url| {
        spawn_keepalive(
            url,
            Duration::from_secs(config.gateway.ping_interval_secs.max(1)),
            cancel.clone(),
        )
    });

    let gateway = if config.gateway.enabled {
        let state = GatewayState {
            commands: CommandService::new(Arc::clone(&store), Arc::clone(&memory)),
            chat: Arc::new(chat),
            store: Arc::clone(&store),
            clock: Arc::new(SystemClock),
            bearer_token: config.gateway.bearer_token.clone(),
        };
        let gateway_config = config.gateway.clone();
        let gateway_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_gateway(&gateway_config, state, gateway_cancel).await {
                tracing::error!(error = %e, "gateway stopped");
            }
        }))
    } else {
        None
    };

    shutdown_signal(&cancel).await;
    tracing::info!("shutting down");

    if let Err(e) = scheduler_task.await {
        tracing::warn!(error = %e, "scheduler task ended abnormally");
    }
    for handle in [keepalive, gateway].into_iter().flatten() {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }

    if let Ok(memory) = memory.lock() {
        if let Err(e) = memory.save() {
            tracing::error!(error = %e, "conversation memory not saved on exit");
        }
    }
    tracing::info!("nikki shut down cleanly");
    Ok(())
}

async fn shutdown_signal(cancel: &CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => cancel.cancel(),
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for ctrl-c; running until cancelled");
            cancel.cancelled().await;
        }
    }
}
