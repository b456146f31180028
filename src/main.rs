mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, QueueCommands};
use relaycore_api::{ApiConfig, ApiContext, LogRingBuffer};
use relaycore_config::ConfigProvider;
use relaycore_conversation::ConversationManager;
use relaycore_dispatcher::{Dispatcher, DispatcherContext, EchoInvoker};
use relaycore_events::EventBus;
use relaycore_queue::{QueueStore, SqliteQueueStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (logs, log_layer) = LogRingBuffer::new();
    init_logging(cli.verbose, log_layer);

    let config_path = cli.config.clone().unwrap_or_else(relaycore_config::default_config_path);

    match &cli.command {
        Some(Commands::ShowConfig) => {
            let config = relaycore_config::load(&config_path);
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::Queue { command }) => run_queue_command(&config_path, command).await,
        Some(Commands::Serve { host, port, no_auth, mock }) => {
            run_serve(config_path, host.clone(), *port, !*no_auth, *mock, logs).await
        }
        None => run_serve(config_path, "127.0.0.1".to_string(), 3777, true, false, logs).await,
    }
}

async fn run_serve(
    config_path: std::path::PathBuf,
    host: String,
    port: u16,
    auth_enabled: bool,
    mock: bool,
    logs: LogRingBuffer,
) -> anyhow::Result<()> {
    let config = Arc::new(ConfigProvider::new(config_path.clone()));
    let workspace = config.snapshot().workspace.clone();

    let db_path = workspace.join(".relaycore").join("queue.db");
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("creating relaycore state directory")?;
    }
    let queue: Arc<dyn QueueStore> =
        Arc::new(SqliteQueueStore::open(&db_path).context("opening queue store")?);

    let events = EventBus::new();
    let conversations = Arc::new(ConversationManager::new(Arc::clone(&queue), events.clone()));
    let output_dir = workspace.join(".relaycore").join("outputs");

    // Real provider integration plugs in behind `Invoker`; this core ships
    // only the deterministic echo back-end, so `--mock` just documents intent.
    if mock {
        tracing::info!("serving with the echo invoker (--mock)");
    } else {
        tracing::warn!("no provider invoker configured, falling back to the echo invoker");
    }
    let invoker: Arc<dyn relaycore_dispatcher::Invoker> = Arc::new(EchoInvoker);

    let dispatcher_ctx = Arc::new(DispatcherContext {
        config: Arc::clone(&config),
        queue: Arc::clone(&queue),
        events: events.clone(),
        conversations: Arc::clone(&conversations),
        invoker,
        output_dir: output_dir.clone(),
    });
    Dispatcher::new(dispatcher_ctx).spawn().await;

    let api_ctx = Arc::new(ApiContext {
        config,
        queue,
        events,
        conversations,
        output_dir,
        logs,
    });

    let mut api_config = ApiConfig::new(
        std::env::var("RELAYCORE_TOKEN_FILE")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(ApiConfig::default_token_path),
    );
    api_config.bind_host = host;
    api_config.port = port;
    api_config.auth_enabled = auth_enabled
        && std::env::var("RELAYCORE_API_AUTH").as_deref() != Ok("off");

    relaycore_api::serve(api_config, api_ctx).await
}

async fn run_queue_command(config_path: &std::path::Path, command: &QueueCommands) -> anyhow::Result<()> {
    let config = ConfigProvider::new(config_path.to_path_buf());
    let workspace = config.snapshot().workspace.clone();
    let db_path = workspace.join(".relaycore").join("queue.db");
    let queue = SqliteQueueStore::open(&db_path).context("opening queue store")?;

    match command {
        QueueCommands::Dead { limit } => {
            let dead = queue.dead_messages(*limit).await?;
            for msg in dead {
                println!(
                    "#{}  agent={:?}  retries={}  error={:?}  body={}",
                    msg.id, msg.agent, msg.retry_count, msg.last_error, msg.body
                );
            }
        }
        QueueCommands::Retry { id } => {
            queue.retry_dead_message(*id).await?;
            println!("message {id} reset to pending");
        }
        QueueCommands::Delete { id } => {
            queue.delete_message(*id).await?;
            println!("message {id} deleted");
        }
    }
    Ok(())
}

/// Layer the log-capture ring buffer (feeding `GET /api/logs`) alongside a
/// stderr formatter gated by `RUST_LOG`/`--verbose`.
fn init_logging(verbosity: u8, log_layer: relaycore_api::LogCaptureLayer) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(log_layer)
        .with(filter)
        .try_init();
}
