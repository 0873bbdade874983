use remora_controller::arm_driver::DriverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("network I/O error {0:?}")]
    IoError(#[from] std::io::Error),
    #[error("arm driver error {0:?}")]
    DriverError(#[from] DriverError),
    #[error("websocket error {0:?}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("message encoding error {0:?}")]
    EncodeError(#[from] serde_json::Error),
}
