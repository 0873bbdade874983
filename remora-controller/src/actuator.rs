//! Exclusive ownership boundary around the motor bus.
//!
//! [`ExclusiveActuator`] is the only component that can reach the
//! [`ArmDriver`]. It owns the live [`ArmState`] and hands out snapshots;
//! every bus operation is serialized behind one lock and bounded by the
//! configured timeout, so a second caller waits for its turn instead of
//! racing the serial channel.

use crate::arm_driver::{ArmDriver, DriverError, JointPositions, Result};
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

/// Snapshot of the arm as last observed over the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmState {
    pub current: JointPositions,
    pub target: JointPositions,
    pub gripper_open: bool,
    pub emergency_stopped: bool,
    pub connected: bool,
    pub last_update: SystemTime,
}

struct Inner {
    driver: Box<dyn ArmDriver>,
    state: ArmState,
}

pub struct ExclusiveActuator {
    inner: Mutex<Inner>,
    op_timeout: Duration,
}

impl ExclusiveActuator {
    /// Probe the bus and seed the arm state from the first position read.
    ///
    /// Failure here is the one fatal hardware error: without an initial
    /// position there is nothing safe to hold the arm at.
    pub async fn connect(mut driver: Box<dyn ArmDriver>, op_timeout: Duration) -> Result<Self> {
        let current = bounded(op_timeout, driver.read_position()).await?;
        let state = ArmState {
            current,
            target: current,
            gripper_open: false,
            emergency_stopped: false,
            connected: true,
            last_update: SystemTime::now(),
        };
        Ok(ExclusiveActuator {
            inner: Mutex::new(Inner { driver, state }),
            op_timeout,
        })
    }

    pub async fn snapshot(&self) -> ArmState {
        self.inner.lock().await.state.clone()
    }

    /// Read fresh joint positions from the bus.
    pub async fn read_current(&self) -> Result<JointPositions> {
        let mut inner = self.inner.lock().await;
        match bounded(self.op_timeout, inner.driver.read_position()).await {
            Ok(current) => {
                inner.state.current = current;
                inner.state.last_update = SystemTime::now();
                Ok(current)
            }
            Err(error) => {
                inner.state.connected = false;
                Err(error)
            }
        }
    }

    /// Write a new goal position and return the refreshed state.
    ///
    /// Reads current positions first, then writes the goal. Any bus
    /// failure flips `connected` to false and is returned as-is; retry
    /// policy belongs to the control loop.
    pub async fn apply_goal(&self, goal: JointPositions, gripper_open: bool) -> Result<ArmState> {
        let op_timeout = self.op_timeout;
        let mut inner = self.inner.lock().await;
        let result = async {
            let current = bounded(op_timeout, inner.driver.read_position()).await?;
            bounded(op_timeout, inner.driver.move_to(&goal)).await?;
            Ok::<JointPositions, DriverError>(current)
        }
        .await;
        match result {
            Ok(current) => {
                inner.state.current = current;
                inner.state.target = goal;
                inner.state.gripper_open = gripper_open;
                inner.state.last_update = SystemTime::now();
                Ok(inner.state.clone())
            }
            Err(error) => {
                inner.state.connected = false;
                Err(error)
            }
        }
    }

    /// Latch the emergency stop and freeze the target at the current
    /// position.
    ///
    /// The latch is set before the bus is touched, atomically with any
    /// in-flight goal under the same lock, so no further motion can be
    /// admitted even if the position read fails.
    pub async fn stop_in_place(&self) -> Result<ArmState> {
        let mut inner = self.inner.lock().await;
        inner.state.emergency_stopped = true;
        match bounded(self.op_timeout, inner.driver.read_position()).await {
            Ok(current) => {
                inner.state.current = current;
                inner.state.target = current;
                inner.state.last_update = SystemTime::now();
                Ok(inner.state.clone())
            }
            Err(error) => {
                inner.state.target = inner.state.current;
                inner.state.connected = false;
                Err(error)
            }
        }
    }

    /// Clear the emergency latch after a successful bus re-probe.
    ///
    /// Also the recovery path from a hardware fault: a good read proves
    /// the channel is alive again, so `connected` is restored.
    pub async fn resume(&self) -> Result<ArmState> {
        let mut inner = self.inner.lock().await;
        match bounded(self.op_timeout, inner.driver.read_position()).await {
            Ok(current) => {
                inner.state.current = current;
                inner.state.target = current;
                inner.state.emergency_stopped = false;
                inner.state.connected = true;
                inner.state.last_update = SystemTime::now();
                Ok(inner.state.clone())
            }
            Err(error) => {
                inner.state.connected = false;
                Err(error)
            }
        }
    }
}

async fn bounded<T>(
    op_timeout: Duration,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(op_timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout),
    }
}
