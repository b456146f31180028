use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "relaycore", version, about = "Multi-agent message-routing and orchestration core")]
pub struct Cli {
    /// Path to the config document (default: ~/.config/relaycore/config.yaml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Logging verbosity: -v debug, -vv trace. RUST_LOG always takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the dispatcher and the Control API. This is the default when no
    /// subcommand is given.
    Serve {
        /// Bind host for the Control API.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Bind port for the Control API.
        #[arg(long, default_value_t = 3777)]
        port: u16,
        /// Disable bearer-token auth on the Control API (loopback-only use).
        #[arg(long)]
        no_auth: bool,
        /// Use the deterministic echo invoker instead of a real agent
        /// back-end; for local smoke-testing the queue/routing/conversation
        /// machinery without a provider configured.
        #[arg(long)]
        mock: bool,
    },
    /// Print the effective configuration as YAML and exit.
    ShowConfig,
    /// Inspect and manage dead-lettered / queued messages.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List dead-lettered messages.
    Dead {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Reset a dead-lettered message back to pending.
    Retry { id: i64 },
    /// Permanently remove a dead-lettered message.
    Delete { id: i64 },
}
