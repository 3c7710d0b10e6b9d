//! Upstream reasoning-agent client.
//!
//! The agent is an opaque collaborator: we hand it a prompt (plus an
//! optional resume handle, capability allow-list, permission mode, and cost
//! budget) and consume a stream of typed JSON events. `AgentClient` is the
//! seam; `CliAgent` is the production implementation driving the agent CLI
//! as a subprocess emitting one JSON event per stdout line.

use std::pin::Pin;
use std::process::Stdio;

use async_stream::try_stream;
use futures::Stream;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// One conversational turn handed to the upstream agent.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub prompt: String,
    /// Session handle from the previous turn's terminal event, if any.
    pub resume: Option<String>,
}

/// The upstream event union, discriminated by `type`.
///
/// Tags we do not understand deserialize to `Other` and are ignored, so a
/// newer agent cannot break the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental streaming payload; may carry a text delta.
    StreamEvent { event: StreamPayload },
    /// A structured assistant message; its content blocks may include tool
    /// invocations.
    Assistant { message: AssistantMessage },
    /// Terminal event for the turn.
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamPayload {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub delta: Option<StreamDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDelta {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl StreamPayload {
    /// The incremental text fragment, when this payload carries one.
    pub fn text_delta(&self) -> Option<&str> {
        self.delta
            .as_ref()
            .filter(|d| d.kind == "text_delta")
            .and_then(|d| d.text.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to launch agent process: {0}")]
    Spawn(std::io::Error),
    #[error("agent process has no stdout")]
    NoStdout,
    #[error("agent stream failed: {0}")]
    Stream(std::io::Error),
    #[error("agent exited with {0}")]
    Exited(std::process::ExitStatus),
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// Seam between the relay and the upstream agent. Tests script it with a
/// fake; production uses [`CliAgent`].
pub trait AgentClient: Send + Sync {
    fn run_turn(&self, request: TurnRequest) -> EventStream;
}

/// How the agent subprocess is launched.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,
    /// Capability allow-list handed to the agent.
    pub allowed_tools: Vec<String>,
    /// Agent-side permission mode.
    pub permission_mode: String,
    /// Operator-level budget cap; bounds runaway cost, not wall-clock.
    pub max_budget_usd: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            allowed_tools: vec![
                "Read".to_string(),
                "Glob".to_string(),
                "Grep".to_string(),
                "WebSearch".to_string(),
            ],
            permission_mode: "default".to_string(),
            max_budget_usd: 1.0,
        }
    }
}

/// Production agent client: spawns the agent CLI per turn and reads its
/// stream-json stdout. Dropping the stream kills the child, so an abandoned
/// turn releases the upstream promptly.
pub struct CliAgent {
    config: AgentConfig,
}

impl CliAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

impl AgentClient for CliAgent {
    fn run_turn(&self, request: TurnRequest) -> EventStream {
        let config = self.config.clone();
        Box::pin(try_stream! {
            let mut cmd = Command::new(&config.command);
            cmd.arg("-p")
                .arg(&request.prompt)
                .arg("--output-format")
                .arg("stream-json")
                .arg("--verbose")
                .arg("--include-partial-messages")
                .arg("--permission-mode")
                .arg(&config.permission_mode)
                .arg("--max-budget-usd")
                .arg(config.max_budget_usd.to_string());
            if !config.allowed_tools.is_empty() {
                cmd.arg("--allowed-tools").arg(config.allowed_tools.join(","));
            }
            if let Some(resume) = &request.resume {
                cmd.arg("--resume").arg(resume);
            }
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);

            let mut child = cmd.spawn().map_err(AgentError::Spawn)?;
            let stdout = child.stdout.take().ok_or(AgentError::NoStdout)?;
            let mut lines = BufReader::new(stdout).lines();

            while let Some(line) = lines.next_line().await.map_err(AgentError::Stream)? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<AgentEvent>(line) {
                    Ok(event) => yield event,
                    Err(e) => debug!("[Agent] Skipping unparseable line: {}", e),
                }
            }

            let status = child.wait().await.map_err(AgentError::Stream)?;
            if !status.success() {
                Err(AgentError::Exited(status))?;
            }
        })
    }
}
