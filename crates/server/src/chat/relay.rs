//! Turn relay: one prompt in, a translated event stream out.
//!
//! Each upstream event maps to zero or one public `ChatEvent` and is
//! forwarded the moment it is produced; nothing is buffered. Exactly one of
//! `done`/`error` terminates a turn. A successful turn yields the session
//! handle carried into the next turn; a failed turn leaves the prior handle
//! untouched so the caller may retry with the same context.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{info, warn};

use crate::agent::{AgentClient, AgentEvent, ContentBlock, TurnRequest};
use crate::protocol::ChatEvent;

/// The client vanished mid-turn; stop forwarding quietly.
#[derive(Debug)]
pub struct SinkClosed;

/// Where translated events go. The WebSocket path implements this; tests
/// use a vector.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: ChatEvent) -> Result<(), SinkClosed>;
}

#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// New session handle, set only when the turn ended in `done`.
    pub session_id: Option<String>,
}

/// Drive one conversational turn against the upstream agent.
///
/// If the upstream stream fails or ends before a terminal event, a final
/// `error` is synthesized; the connection itself stays usable.
pub async fn run_turn(
    agent: &dyn AgentClient,
    prompt: &str,
    resume: Option<&str>,
    sink: &mut dyn EventSink,
) -> TurnOutcome {
    let mut events = agent.run_turn(TurnRequest {
        prompt: prompt.to_string(),
        resume: resume.map(str::to_string),
    });

    let mut outcome = TurnOutcome::default();

    loop {
        match events.next().await {
            Some(Ok(AgentEvent::StreamEvent { event })) => {
                if let Some(text) = event.text_delta() {
                    let delta = ChatEvent::TextDelta {
                        delta: text.to_string(),
                    };
                    if sink.emit(delta).await.is_err() {
                        return outcome;
                    }
                }
            }
            Some(Ok(AgentEvent::Assistant { message })) => {
                for block in message.content {
                    if let ContentBlock::ToolUse { name, input } = block {
                        info!("[Chat] Agent invoked tool: {}", name);
                        if sink.emit(ChatEvent::ToolUse { name, input }).await.is_err() {
                            return outcome;
                        }
                    }
                }
            }
            Some(Ok(AgentEvent::Result {
                is_error,
                total_cost_usd,
                num_turns,
                session_id,
                result,
            })) => {
                if is_error {
                    let message =
                        result.unwrap_or_else(|| "upstream agent reported failure".to_string());
                    let _ = sink
                        .emit(ChatEvent::Error {
                            message,
                            recoverable: false,
                        })
                        .await;
                } else {
                    let session_id = session_id.unwrap_or_default();
                    outcome.session_id = Some(session_id.clone());
                    let _ = sink
                        .emit(ChatEvent::Done {
                            cost: total_cost_usd.unwrap_or(0.0),
                            turns: num_turns.unwrap_or(0),
                            session_id,
                        })
                        .await;
                }
                return outcome;
            }
            Some(Ok(AgentEvent::Other)) => {}
            Some(Err(e)) => {
                warn!("[Chat] Upstream stream failed: {}", e);
                let _ = sink
                    .emit(ChatEvent::Error {
                        message: "upstream agent stream failed".to_string(),
                        recoverable: false,
                    })
                    .await;
                return outcome;
            }
            None => {
                warn!("[Chat] Upstream ended without a terminal event");
                let _ = sink
                    .emit(ChatEvent::Error {
                        message: "upstream agent ended without a result".to_string(),
                        recoverable: false,
                    })
                    .await;
                return outcome;
            }
        }
    }
}
