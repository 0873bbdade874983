use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("error while accessing configuration")]
    IoError(#[from] std::io::Error),
    #[error("error while parsing json")]
    DeserializationError(#[from] serde_json::error::Error),
    #[error("failed when talking to the serial port")]
    SerialPortError(#[from] serialport::Error),
    #[error("motor bus returned a malformed frame: {0}")]
    ProtocolError(String),
    #[error("motor bus operation timed out")]
    Timeout,
    #[error("motor bus worker is no longer running")]
    BusClosed,
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Number of controllable joints on the arm.
pub const JOINT_COUNT: usize = 6;

/// The six joints of the arm, in motor bus order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    ShoulderPan,
    ShoulderLift,
    ElbowFlex,
    WristFlex,
    WristRoll,
    Gripper,
}

impl Joint {
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::ShoulderPan,
        Joint::ShoulderLift,
        Joint::ElbowFlex,
        Joint::WristFlex,
        Joint::WristRoll,
        Joint::Gripper,
    ];

    pub fn index(self) -> usize {
        match self {
            Joint::ShoulderPan => 0,
            Joint::ShoulderLift => 1,
            Joint::ElbowFlex => 2,
            Joint::WristFlex => 3,
            Joint::WristRoll => 4,
            Joint::Gripper => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Joint::ShoulderPan => "shoulder_pan",
            Joint::ShoulderLift => "shoulder_lift",
            Joint::ElbowFlex => "elbow_flex",
            Joint::WristFlex => "wrist_flex",
            Joint::WristRoll => "wrist_roll",
            Joint::Gripper => "gripper",
        }
    }
}

/// Positions of all six joints in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct JointPositions {
    pub shoulder_pan: f32,
    pub shoulder_lift: f32,
    pub elbow_flex: f32,
    pub wrist_flex: f32,
    pub wrist_roll: f32,
    pub gripper: f32,
}

impl JointPositions {
    pub fn new(
        shoulder_pan: f32,
        shoulder_lift: f32,
        elbow_flex: f32,
        wrist_flex: f32,
        wrist_roll: f32,
        gripper: f32,
    ) -> JointPositions {
        JointPositions {
            shoulder_pan,
            shoulder_lift,
            elbow_flex,
            wrist_flex,
            wrist_roll,
            gripper,
        }
    }

    pub fn to_array(self) -> [f32; JOINT_COUNT] {
        [
            self.shoulder_pan,
            self.shoulder_lift,
            self.elbow_flex,
            self.wrist_flex,
            self.wrist_roll,
            self.gripper,
        ]
    }

    pub fn from_array(values: [f32; JOINT_COUNT]) -> JointPositions {
        JointPositions::new(
            values[0], values[1], values[2], values[3], values[4], values[5],
        )
    }

    pub fn get(&self, joint: Joint) -> f32 {
        self.to_array()[joint.index()]
    }

    pub fn set(&mut self, joint: Joint, value: f32) {
        match joint {
            Joint::ShoulderPan => self.shoulder_pan = value,
            Joint::ShoulderLift => self.shoulder_lift = value,
            Joint::ElbowFlex => self.elbow_flex = value,
            Joint::WristFlex => self.wrist_flex = value,
            Joint::WristRoll => self.wrist_roll = value,
            Joint::Gripper => self.gripper = value,
        }
    }

    /// Copy of this position with one joint shifted by `delta` degrees.
    pub fn offset(&self, joint: Joint, delta: f32) -> JointPositions {
        let mut next = *self;
        next.set(joint, next.get(joint) + delta);
        next
    }
}

/// Boundary to the motor bus.
///
/// Both operations block until the bus round-trip completes and must
/// never be invoked concurrently. The [`ExclusiveActuator`] is the only
/// caller and serializes access behind its lock.
///
/// [`ExclusiveActuator`]: crate::actuator::ExclusiveActuator
#[async_trait]
pub trait ArmDriver: Send + Sync {
    async fn read_position(&mut self) -> Result<JointPositions>;
    async fn move_to(&mut self, position: &JointPositions) -> Result<()>;
}

/// Loopback driver for tests and hardware-free runs.
///
/// The last written goal becomes the reported position on the next read.
/// The failure switch makes every bus operation time out while set, which
/// is how the tests simulate a dead serial link.
pub struct MockArmDriver {
    position: JointPositions,
    fail: Arc<AtomicBool>,
}

impl MockArmDriver {
    pub fn new(initial: JointPositions) -> Box<Self> {
        Box::new(MockArmDriver {
            position: initial,
            fail: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle that toggles bus failures from outside the driver.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        self.fail.clone()
    }

    fn check_bus(&self) -> Result<()> {
        if self.fail.load(Ordering::Acquire) {
            Err(DriverError::Timeout)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ArmDriver for MockArmDriver {
    async fn read_position(&mut self) -> Result<JointPositions> {
        self.check_bus()?;
        Ok(self.position)
    }

    async fn move_to(&mut self, position: &JointPositions) -> Result<()> {
        self.check_bus()?;
        self.position = *position;
        Ok(())
    }
}
