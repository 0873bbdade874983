//! Connected-client sessions.
//!
//! One task per WebSocket connection. Each task decodes inbound frames
//! into the command mailbox, answers requests, and forwards every
//! broadcast event to its client. A session that stops reading, fails a
//! send, or goes silent past the liveness timeout is closed without
//! touching the control loop or any other session.

use crate::config::ServerConfig;
use crate::mailbox::CommandSlot;
use crate::protocol::{
    self, ClientMessage, ControlCommand, ErrorCode, RequestKind, ServerMessage, StatusReport,
};
use futures_util::{Sink, SinkExt, StreamExt};
use remora_controller::actuator::ExclusiveActuator;
use remora_controller::arm_driver::JOINT_COUNT;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Connecting,
    Welcomed,
    Active,
    Closed,
}

pub struct SessionManager {
    slot: Arc<CommandSlot>,
    actuator: Arc<ExclusiveActuator>,
    events: broadcast::Sender<ServerMessage>,
    config: Arc<ServerConfig>,
    registry: Mutex<HashMap<Uuid, SessionStage>>,
}

impl SessionManager {
    pub fn new(
        slot: Arc<CommandSlot>,
        actuator: Arc<ExclusiveActuator>,
        events: broadcast::Sender<ServerMessage>,
        config: Arc<ServerConfig>,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager {
            slot,
            actuator,
            events,
            config,
            registry: Mutex::new(HashMap::new()),
        })
    }

    pub fn session_count(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    fn set_stage(&self, id: Uuid, stage: SessionStage) {
        self.registry.lock().unwrap().insert(id, stage);
    }

    fn remove(&self, id: Uuid) {
        self.registry.lock().unwrap().remove(&id);
    }

    /// Drive one client connection to completion.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let id = Uuid::new_v4();
        self.set_stage(id, SessionStage::Connecting);
        tracing::info!("Session {} connecting from {}", id, peer);

        let ws_stream = match accept_async(stream).await {
            Ok(ws_stream) => ws_stream,
            Err(error) => {
                tracing::warn!("WebSocket handshake with {} failed: {}", peer, error);
                self.remove(id);
                return;
            }
        };
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // subscribe before the welcome so no broadcast is missed
        let mut events = self.events.subscribe();

        let welcome = self.welcome_message();
        if send_message(&mut ws_tx, &welcome).await.is_err() {
            self.remove(id);
            return;
        }
        self.set_stage(id, SessionStage::Welcomed);
        // active immediately: observers receive status without sending
        self.set_stage(id, SessionStage::Active);

        let timeout = self.config.session_timeout();
        let idle = tokio::time::sleep(timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(message) => {
                            if send_message(&mut ws_tx, &message).await.is_err() {
                                tracing::info!("Session {} failed to receive, closing", id);
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(count)) => {
                            tracing::warn!("Session {} lagged by {} events", id, count);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            idle.as_mut().reset(tokio::time::Instant::now() + timeout);
                            let replies = self.handle_frame(text.as_str()).await;
                            let mut failed = false;
                            for reply in &replies {
                                if send_message(&mut ws_tx, reply).await.is_err() {
                                    failed = true;
                                    break;
                                }
                            }
                            if failed {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            idle.as_mut().reset(tokio::time::Instant::now() + timeout);
                            if ws_tx.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Session {} disconnected", id);
                            break;
                        }
                        Some(Err(error)) => {
                            tracing::info!("Session {} transport error: {}", id, error);
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
                _ = &mut idle => {
                    tracing::info!("Session {} timed out after {:?} of silence", id, timeout);
                    break;
                }
            }
        }

        self.set_stage(id, SessionStage::Closed);
        self.remove(id);
    }

    fn welcome_message(&self) -> ServerMessage {
        ServerMessage::Welcome {
            server_version: env!("CARGO_PKG_VERSION").to_owned(),
            robot_type: self.config.robot_type.clone(),
            channel: self.config.channel.clone(),
            capabilities: self.config.capabilities.clone(),
        }
    }

    fn config_message(&self) -> ServerMessage {
        ServerMessage::Config {
            dof: JOINT_COUNT,
            tick_rate_hz: self.config.tick_rate_hz,
            safety_limits: true,
            host: self.config.host.clone(),
            port: self.config.port,
        }
    }

    /// Decode one inbound text frame and produce the direct replies.
    ///
    /// Decode failures answer with an error response referencing the
    /// offending command; the session stays open and the mailbox is
    /// never touched.
    pub async fn handle_frame(&self, text: &str) -> Vec<ServerMessage> {
        match protocol::decode(text) {
            Err(error) => {
                tracing::debug!("Rejecting inbound frame: {}", error);
                vec![ServerMessage::rejection(
                    error.offending_command(),
                    error.error_code(),
                )]
            }
            Ok(ClientMessage::Ping { timestamp }) => vec![ServerMessage::Pong { timestamp }],
            Ok(ClientMessage::Request { command, .. }) => match command {
                RequestKind::Status => {
                    let state = self.actuator.snapshot().await;
                    vec![ServerMessage::Status(StatusReport::from_state(&state))]
                }
                RequestKind::Config => vec![self.config_message()],
            },
            Ok(ClientMessage::Control(envelope)) => {
                vec![self.handle_command(envelope.command).await]
            }
        }
    }

    /// Admission control for one decoded command.
    ///
    /// Emergency stop always reaches the mailbox; resume is admitted
    /// while the latch is set; everything else is rejected with
    /// `SAFETY_VIOLATION` until a resume goes through.
    async fn handle_command(&self, command: ControlCommand) -> ServerMessage {
        let name = command.name();
        match command {
            ControlCommand::EmergencyStop | ControlCommand::Resume => {
                self.slot.submit(command);
                ServerMessage::success(name)
            }
            ordinary => {
                let state = self.actuator.snapshot().await;
                if state.emergency_stopped || self.slot.emergency_pending() {
                    tracing::debug!("Rejecting {} while estopped", name);
                    ServerMessage::rejection(name, ErrorCode::SafetyViolation)
                } else {
                    self.slot.submit(ordinary);
                    ServerMessage::success(name)
                }
            }
        }
    }
}

async fn send_message<S>(
    sink: &mut S,
    message: &ServerMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = match protocol::encode(message) {
        Ok(json) => json,
        Err(error) => {
            tracing::error!("Failed to encode outbound message: {}", error);
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}
