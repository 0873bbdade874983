//! Stateless mapping between JSON text frames and internal values.
//!
//! Decode failures are split into malformed JSON, structurally valid
//! messages with an unknown `type`/`command`, and known commands with
//! missing or invalid fields, so sessions can answer with the right
//! error code. Encoding is total: every internal value has exactly one
//! wire shape.

use remora_controller::actuator::ArmState;
use remora_controller::arm_driver::{DriverError, JointPositions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperAction {
    Toggle,
    Open,
    Close,
}

/// Six pose fields of a `move_to_position` command.
///
/// There is no kinematics in this stack: the keys map positionally onto
/// the six joints in bus order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PosePosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl PosePosition {
    pub fn to_joints(self) -> JointPositions {
        JointPositions::new(self.x, self.y, self.z, self.roll, self.pitch, self.yaw)
    }

    pub fn from_joints(joints: JointPositions) -> PosePosition {
        let [x, y, z, roll, pitch, yaw] = joints.to_array();
        PosePosition {
            x,
            y,
            z,
            roll,
            pitch,
            yaw,
        }
    }
}

/// One decoded control command, the unit the mailbox and control loop
/// deal in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Move { direction: MoveDirection },
    MoveToPosition { position: PosePosition },
    Gripper { action: GripperAction },
    EmergencyStop,
    Resume,
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Move { .. } => "move",
            ControlCommand::MoveToPosition { .. } => "move_to_position",
            ControlCommand::Gripper { .. } => "gripper",
            ControlCommand::EmergencyStop => "emergency_stop",
            ControlCommand::Resume => "resume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    #[serde(flatten)]
    pub command: ControlCommand,
    /// Client-supplied, advisory only. Never used for ordering.
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Status,
    Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Control(ControlEnvelope),
    Request {
        command: RequestKind,
        #[serde(default)]
        timestamp: f64,
    },
    Ping {
        #[serde(default)]
        timestamp: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DecodeError,
    UnknownCommand,
    SafetyViolation,
    RobotDisconnected,
    ComPortError,
}

/// Wire error code for a hardware fault.
pub fn hardware_error_code(error: &DriverError) -> ErrorCode {
    match error {
        DriverError::SerialPortError(_) | DriverError::IoError(_) => ErrorCode::ComPortError,
        _ => ErrorCode::RobotDisconnected,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyStatus {
    Normal,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub current: JointPositions,
    pub target: JointPositions,
    pub gripper_open: bool,
    pub emergency_stop: bool,
    pub safety_status: SafetyStatus,
    pub robot_connected: bool,
    pub timestamp: f64,
}

impl StatusReport {
    pub fn from_state(state: &ArmState) -> StatusReport {
        let safety_status = if !state.connected {
            SafetyStatus::Error
        } else if state.emergency_stopped {
            SafetyStatus::Warning
        } else {
            SafetyStatus::Normal
        };
        StatusReport {
            current: state.current,
            target: state.target,
            gripper_open: state.gripper_open,
            emergency_stop: state.emergency_stopped,
            safety_status,
            robot_connected: state.connected,
            timestamp: wall_clock_seconds(state.last_update),
        }
    }
}

pub fn wall_clock_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        server_version: String,
        robot_type: String,
        channel: String,
        capabilities: Vec<String>,
    },
    Status(StatusReport),
    Response {
        command: String,
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorCode>,
    },
    Error {
        error_code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Pong {
        timestamp: f64,
    },
    Config {
        dof: usize,
        tick_rate_hz: u32,
        safety_limits: bool,
        host: String,
        port: u16,
    },
}

impl ServerMessage {
    pub fn success(command: &str) -> ServerMessage {
        ServerMessage::Response {
            command: command.to_owned(),
            status: ResponseStatus::Success,
            error: None,
        }
    }

    pub fn rejection(command: &str, error: ErrorCode) -> ServerMessage {
        ServerMessage::Response {
            command: command.to_owned(),
            status: ResponseStatus::Error,
            error: Some(error),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("message has no usable `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("unknown command `{command}` for message type `{kind}`")]
    UnknownCommand { kind: String, command: String },
    #[error("invalid `{command}` message")]
    InvalidFields { command: String },
}

impl DecodeError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeError::UnknownType(_) | DecodeError::UnknownCommand { .. } => {
                ErrorCode::UnknownCommand
            }
            _ => ErrorCode::DecodeError,
        }
    }

    /// Command string the error response should reference.
    pub fn offending_command(&self) -> &str {
        match self {
            DecodeError::UnknownCommand { command, .. } => command,
            DecodeError::InvalidFields { command } => command,
            DecodeError::UnknownType(kind) => kind,
            _ => "unknown",
        }
    }
}

pub fn decode(text: &str) -> Result<ClientMessage, DecodeError> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => Ok(message),
        Err(_) => Err(classify_failure(text)),
    }
}

pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

fn known_command(kind: &str, command: &str) -> bool {
    match kind {
        "control" => matches!(
            command,
            "move" | "move_to_position" | "gripper" | "emergency_stop" | "resume"
        ),
        "request" => matches!(command, "status" | "config"),
        _ => false,
    }
}

fn classify_failure(text: &str) -> DecodeError {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => return DecodeError::MalformedJson(error.to_string()),
    };
    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_owned(),
        None => return DecodeError::MissingType,
    };
    if !matches!(kind.as_str(), "control" | "request" | "ping") {
        return DecodeError::UnknownType(kind);
    }
    match value.get("command").and_then(Value::as_str) {
        Some(command) if known_command(&kind, command) => DecodeError::InvalidFields {
            command: command.to_owned(),
        },
        Some(command) => DecodeError::UnknownCommand {
            kind,
            command: command.to_owned(),
        },
        None => DecodeError::InvalidFields { command: kind },
    }
}
