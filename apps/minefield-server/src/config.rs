use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use crate::dispatch::DispatchConfig;
use crate::registry::RegistryConfig;
use crate::render::RenderConfig;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "minefield",
    author,
    version,
    about = "Multiplayer Minesweeper for group chats"
)]
pub struct Cli {
    /// Address the HTTP ingress listens on.
    #[arg(long, env = "MINEFIELD_LISTEN_ADDR", default_value = "127.0.0.1:8090")]
    pub listen_addr: String,

    /// Tracing filter directive.
    #[arg(long, env = "MINEFIELD_LOG", default_value = "info")]
    pub log_filter: String,

    /// Bot API base URL, including the token path segment. Without it every
    /// outbound call is only logged.
    #[arg(long, env = "MINEFIELD_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "MINEFIELD_API_TIMEOUT_SECS", default_value_t = 10)]
    pub api_timeout_secs: u64,

    /// Session snapshot file.
    #[arg(long, env = "MINEFIELD_SNAPSHOT", default_value = "minefield-sessions.json")]
    pub snapshot_path: PathBuf,

    /// Player profile file.
    #[arg(long, env = "MINEFIELD_PLAYERS", default_value = "minefield-players.json")]
    pub players_path: PathBuf,

    #[arg(long, env = "MINEFIELD_WORKERS", default_value_t = 8)]
    pub workers: usize,

    #[arg(long, env = "MINEFIELD_QUEUE_DEPTH", default_value_t = 1024)]
    pub queue_depth: usize,

    /// Minimum gap between two keyboard edits of one game.
    #[arg(long, env = "MINEFIELD_RENDER_INTERVAL_MS", default_value_t = 500)]
    pub render_interval_ms: u64,

    /// Wait before a deferred keyboard edit.
    #[arg(long, env = "MINEFIELD_RENDER_DELAY_MS", default_value_t = 500)]
    pub render_delay_ms: u64,

    /// Games older than this are garbage collected.
    #[arg(long, env = "MINEFIELD_RETENTION_DAYS", default_value_t = 10)]
    pub retention_days: u64,

    #[arg(long, env = "MINEFIELD_GC_INTERVAL_SECS", default_value_t = 86_400)]
    pub gc_interval_secs: u64,

    #[arg(long, env = "MINEFIELD_MAX_GAMES_PER_USER", default_value_t = 10)]
    pub max_games_per_user: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub log_filter: String,
    pub api_base: Option<String>,
    pub api_timeout: Duration,
    pub players_path: PathBuf,
    pub registry: RegistryConfig,
    pub render: RenderConfig,
    pub dispatch: DispatchConfig,
    pub max_games_per_user: usize,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.workers == 0 {
            bail!("at least one worker is required");
        }
        if cli.gc_interval_secs == 0 {
            bail!("garbage collection interval must be positive");
        }
        Ok(ServerConfig {
            listen_addr,
            log_filter: cli.log_filter,
            api_base: cli.api_base.filter(|base| !base.trim().is_empty()),
            api_timeout: Duration::from_secs(cli.api_timeout_secs),
            players_path: cli.players_path,
            registry: RegistryConfig {
                snapshot_path: Some(cli.snapshot_path),
                retention: Duration::from_secs(cli.retention_days * 24 * 60 * 60),
                gc_interval: Duration::from_secs(cli.gc_interval_secs),
                ..RegistryConfig::default()
            },
            render: RenderConfig {
                min_interval: Duration::from_millis(cli.render_interval_ms),
                delay: Duration::from_millis(cli.render_delay_ms),
            },
            dispatch: DispatchConfig {
                workers: cli.workers,
                queue_depth: cli.queue_depth,
            },
            max_games_per_user: cli.max_games_per_user,
        })
    }
}
