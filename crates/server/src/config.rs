//! Server configuration and shared state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::agent::{AgentClient, AgentConfig};
use crate::chat::gate::ConnectionGate;

/// Configuration for the Lectern server, read from the environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Directory of markdown documents and image assets
    pub docs_dir: PathBuf,
    /// slug → token-list access rules file
    pub access_file: PathBuf,
    /// Deny all gated lookups when the rules file cannot be loaded,
    /// instead of the historical fail-open behavior
    pub access_fail_closed: bool,
    /// Shared secret for the chat handshake; chat is unavailable without it
    pub chat_secret: Option<String>,
    /// Origin allow-list for WebSocket upgrades; empty disables the check
    pub allowed_origins: Vec<String>,
    /// Concurrent live-session cap
    pub max_connections: usize,
    /// Upstream agent launch settings
    pub agent: AgentConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3001)),
            docs_dir: PathBuf::from("docs"),
            access_file: PathBuf::from("access.json"),
            access_fail_closed: false,
            chat_secret: None,
            allowed_origins: Vec::new(),
            max_connections: 1,
            agent: AgentConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from `LECTERN_*` environment variables, falling back to
    /// defaults for anything unset or unparseable (with a warning).
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind = match std::env::var("LECTERN_BIND") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("[Config] Invalid LECTERN_BIND {:?}; using default", raw);
                defaults.bind
            }),
            Err(_) => defaults.bind,
        };

        let max_connections = match std::env::var("LECTERN_MAX_CONNECTIONS") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    "[Config] Invalid LECTERN_MAX_CONNECTIONS {:?}; using default",
                    raw
                );
                defaults.max_connections
            }),
            Err(_) => defaults.max_connections,
        };

        let mut agent = AgentConfig::default();
        if let Ok(cmd) = std::env::var("LECTERN_AGENT_CMD") {
            agent.command = cmd;
        }
        if let Ok(tools) = std::env::var("LECTERN_AGENT_TOOLS") {
            agent.allowed_tools = split_list(&tools);
        }
        if let Ok(mode) = std::env::var("LECTERN_AGENT_PERMISSION_MODE") {
            agent.permission_mode = mode;
        }
        if let Ok(raw) = std::env::var("LECTERN_AGENT_MAX_BUDGET_USD") {
            match raw.parse() {
                Ok(budget) => agent.max_budget_usd = budget,
                Err(_) => warn!(
                    "[Config] Invalid LECTERN_AGENT_MAX_BUDGET_USD {:?}; using default",
                    raw
                ),
            }
        }

        Self {
            bind,
            docs_dir: std::env::var("LECTERN_DOCS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.docs_dir),
            access_file: std::env::var("LECTERN_ACCESS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.access_file),
            access_fail_closed: env_flag("LECTERN_ACCESS_FAIL_CLOSED"),
            chat_secret: std::env::var("LECTERN_CHAT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            allowed_origins: std::env::var("LECTERN_ALLOWED_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            max_connections,
            agent,
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// App state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub gate: Arc<ConnectionGate>,
    pub agent: Arc<dyn AgentClient>,
}
