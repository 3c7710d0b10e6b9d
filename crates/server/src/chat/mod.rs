//! Live chat over WebSocket.
//!
//! Upgrade requests pass the admission gate (shared secret configured,
//! origin allow-list, connection cap), then the connection must complete the
//! auth handshake before any prompt is relayed. One relay turn runs per
//! inbound prompt; the session handle from a completed turn carries the
//! conversation across turns.

pub mod gate;
pub mod relay;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppState, ServerConfig};
use crate::protocol::{ChatEvent, ClientRequest, AUTH_FAILURE_CLOSE_CODE};
use gate::ConnectionGate;
use relay::{EventSink, SinkClosed};

#[derive(Debug, Error)]
pub enum AdmissionRefusal {
    #[error("chat is not configured")]
    NoSecret,
    #[error("origin not allowed")]
    OriginMismatch,
    #[error("too many connections")]
    Busy,
}

impl AdmissionRefusal {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionRefusal::NoSecret => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionRefusal::OriginMismatch => StatusCode::FORBIDDEN,
            AdmissionRefusal::Busy => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// Admission decision, taken before any per-connection state exists.
///
/// Order matters: configuration absence, then origin (defends against
/// cross-site WebSocket hijacking), then the connection cap. The cap check
/// here is an early refusal; the authoritative slot claim happens at
/// socket-open time in [`handle_socket`].
pub fn admission_check(
    config: &ServerConfig,
    origin: Option<&str>,
    gate: &ConnectionGate,
) -> Result<(), AdmissionRefusal> {
    if config.chat_secret.is_none() {
        return Err(AdmissionRefusal::NoSecret);
    }
    if !config.allowed_origins.is_empty() {
        if let Some(origin) = origin {
            if !config.allowed_origins.iter().any(|o| o == origin) {
                return Err(AdmissionRefusal::OriginMismatch);
            }
        }
    }
    if gate.is_full() {
        return Err(AdmissionRefusal::Busy);
    }
    Ok(())
}

/// GET /ws — upgrade gated by [`admission_check`].
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if let Err(refusal) = admission_check(&state.config, origin, &state.gate) {
        warn!("[Chat] Upgrade refused: {}", refusal);
        return (refusal.status(), refusal.to_string()).into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// First-frame auth check: a well-formed auth request whose token matches
/// the shared secret under constant-time comparison. Anything else fails.
fn verify_auth_frame(frame: &str, secret: &str) -> bool {
    match serde_json::from_str::<ClientRequest>(frame) {
        Ok(ClientRequest::Auth { token }) => token.as_bytes().ct_eq(secret.as_bytes()).into(),
        Err(_) => false,
    }
}

/// Short stable fingerprint for logging a credential without leaking it.
fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

/// Frame-level surface of the connection used by the handshake. A scripted
/// implementation stands in for a live WebSocket in tests.
#[async_trait::async_trait]
trait SocketIo: Send {
    async fn recv_frame(&mut self) -> Option<Result<Message, axum::Error>>;
    async fn send_frame(&mut self, message: Message) -> Result<(), axum::Error>;
}

#[async_trait::async_trait]
impl SocketIo for WebSocket {
    async fn recv_frame(&mut self) -> Option<Result<Message, axum::Error>> {
        self.recv().await
    }

    async fn send_frame(&mut self, message: Message) -> Result<(), axum::Error> {
        self.send(message).await
    }
}

struct WsSink<'a> {
    socket: &'a mut WebSocket,
}

#[async_trait::async_trait]
impl EventSink for WsSink<'_> {
    async fn emit(&mut self, event: ChatEvent) -> Result<(), SinkClosed> {
        let payload = serde_json::to_string(&event).map_err(|_| SinkClosed)?;
        self.socket
            .send(Message::Text(payload.into()))
            .await
            .map_err(|_| SinkClosed)
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // Authoritative slot claim; the upgrade precheck can race.
    let Some(_permit) = state.gate.try_acquire() else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::AGAIN,
                reason: "too many connections".into(),
            })))
            .await;
        return;
    };

    // admission_check refused upgrades without a configured secret.
    let Some(secret) = state.config.chat_secret.clone() else {
        return;
    };

    if !handshake(&mut socket, &secret).await {
        return;
    }

    let mut session_id: Option<String> = None;

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(_) => break,
        };
        match msg {
            Message::Text(prompt) => {
                let mut sink = WsSink {
                    socket: &mut socket,
                };
                let outcome = relay::run_turn(
                    state.agent.as_ref(),
                    prompt.as_str(),
                    session_id.as_deref(),
                    &mut sink,
                )
                .await;
                if let Some(sid) = outcome.session_id {
                    session_id = Some(sid);
                }
            }
            Message::Close(_) => break,
            // Ping/pong are answered by the transport; binary is ignored.
            _ => {}
        }
    }

    info!("[Chat] Connection closed");
}

/// Run the auth handshake. Returns true once the connection is
/// authenticated; on any failure the connection is closed with the reserved
/// code and false is returned. There is no second chance.
async fn handshake(socket: &mut impl SocketIo, secret: &str) -> bool {
    loop {
        let frame = match socket.recv_frame().await {
            Some(Ok(frame)) => frame,
            _ => return false,
        };
        match frame {
            Message::Text(text) if verify_auth_frame(text.as_str(), secret) => {
                break;
            }
            // Keepalive frames do not count as the first message.
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return false,
            _ => {
                warn!("[Chat] Handshake failed; closing");
                let _ = socket
                    .send_frame(Message::Close(Some(CloseFrame {
                        code: AUTH_FAILURE_CLOSE_CODE,
                        reason: "authentication failed".into(),
                    })))
                    .await;
                return false;
            }
        }
    }

    let Ok(payload) = serde_json::to_string(&ChatEvent::AuthOk) else {
        return false;
    };
    if socket.send_frame(Message::Text(payload.into())).await.is_err() {
        return false;
    }
    info!(
        "[Chat] Client authenticated (token {})",
        token_fingerprint(secret)
    );
    true
}
