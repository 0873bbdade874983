//! Control endpoint: one TCP listener, one control loop task, one task
//! per accepted session.

use crate::config::ServerConfig;
use crate::control_loop::ControlLoop;
use crate::error::ServerError;
use crate::mailbox::CommandSlot;
use crate::protocol::ServerMessage;
use crate::session::SessionManager;
use remora_controller::actuator::ExclusiveActuator;
use remora_controller::arm_config::ArmConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

/// Buffered events per session before a slow client starts lagging.
const EVENT_CAPACITY: usize = 256;

pub struct RemoteServer {
    config: Arc<ServerConfig>,
    arm_config: ArmConfig,
    actuator: Arc<ExclusiveActuator>,
}

impl RemoteServer {
    pub fn new(
        config: ServerConfig,
        arm_config: ArmConfig,
        actuator: Arc<ExclusiveActuator>,
    ) -> RemoteServer {
        RemoteServer {
            config: Arc::new(config),
            arm_config,
            actuator,
        }
    }

    /// Bind the listener without serving yet.
    ///
    /// Split from [`BoundServer::serve`] so callers (and tests) can learn
    /// the actual address when port 0 was requested.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Control endpoint listening on ws://{}", local_addr);
        Ok(BoundServer {
            config: self.config,
            arm_config: self.arm_config,
            actuator: self.actuator,
            listener,
            local_addr,
        })
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        self.bind().await?.serve(shutdown).await
    }
}

pub struct BoundServer {
    config: Arc<ServerConfig>,
    arm_config: ArmConfig,
    actuator: Arc<ExclusiveActuator>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let (events, _) = broadcast::channel::<ServerMessage>(EVENT_CAPACITY);
        let slot = Arc::new(CommandSlot::new());

        let sessions = SessionManager::new(
            slot.clone(),
            self.actuator.clone(),
            events.clone(),
            self.config.clone(),
        );

        let control = ControlLoop::new(
            self.actuator.clone(),
            slot,
            events,
            self.arm_config.clone(),
            &self.config,
        );
        tokio::spawn(control.run(shutdown.clone()));

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(sessions.clone().handle_connection(stream, peer));
                        }
                        Err(error) => {
                            tracing::warn!("Failed to accept connection: {}", error);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Control endpoint shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}
