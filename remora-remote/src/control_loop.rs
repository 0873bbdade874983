//! Fixed-rate control loop.
//!
//! Each tick drains the command mailbox, turns the command into a new
//! goal from the previous target, clamps it, pushes it through the
//! exclusive actuator and broadcasts the resulting state. Hardware
//! faults never kill the loop: actuation is suspended while the arm is
//! marked disconnected, status keeps flowing, and a `resume` re-probes
//! the bus.

use crate::config::ServerConfig;
use crate::mailbox::CommandSlot;
use crate::protocol::{
    hardware_error_code, ControlCommand, GripperAction, MoveDirection, ServerMessage, StatusReport,
};
use remora_controller::actuator::{ArmState, ExclusiveActuator};
use remora_controller::arm_config::ArmConfig;
use remora_controller::arm_driver::{DriverError, Joint, JointPositions};
use remora_controller::safety::SafetyLimiter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

pub struct ControlLoop {
    actuator: Arc<ExclusiveActuator>,
    limiter: SafetyLimiter,
    slot: Arc<CommandSlot>,
    events: broadcast::Sender<ServerMessage>,
    arm_config: ArmConfig,
    tick_period: Duration,
    status_interval: Duration,
    last_status: Option<Instant>,
}

impl ControlLoop {
    pub fn new(
        actuator: Arc<ExclusiveActuator>,
        slot: Arc<CommandSlot>,
        events: broadcast::Sender<ServerMessage>,
        arm_config: ArmConfig,
        server_config: &ServerConfig,
    ) -> ControlLoop {
        ControlLoop {
            limiter: SafetyLimiter::new(&arm_config),
            actuator,
            slot,
            events,
            arm_config,
            tick_period: server_config.tick_period(),
            status_interval: server_config.status_interval(),
            last_status: None,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.step().await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("Control loop shutting down");
                    break;
                }
            }
        }
    }

    /// One control tick: drain the mailbox, actuate, publish.
    pub async fn step(&mut self) {
        if let Some(command) = self.slot.take() {
            self.apply_command(command).await;
        }
        self.publish_status().await;
    }

    async fn apply_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::EmergencyStop => {
                // bypasses the limiter: stop-in-place is always admissible
                match self.actuator.stop_in_place().await {
                    Ok(state) => {
                        tracing::warn!("Emergency stop engaged at {:?}", state.current);
                    }
                    Err(error) => self.report_hardware_fault("emergency stop", &error),
                }
            }
            ControlCommand::Resume => match self.actuator.resume().await {
                Ok(_) => tracing::info!("Resume accepted, emergency latch cleared"),
                Err(error) => self.report_hardware_fault("resume probe", &error),
            },
            ordinary => {
                let state = self.actuator.snapshot().await;
                if state.emergency_stopped {
                    // late arrival behind the latch; sessions already
                    // reject these, so just drop it
                    tracing::debug!("Dropping {} while estopped", ordinary.name());
                    return;
                }
                if !state.connected {
                    tracing::debug!("Dropping {} while arm is disconnected", ordinary.name());
                    return;
                }
                let (goal, gripper_open) = self.next_goal(&state, &ordinary);
                let goal = self.limiter.clamp(goal);
                match self.actuator.apply_goal(goal, gripper_open).await {
                    Ok(state) => {
                        tracing::trace!("Applied {} -> {:?}", ordinary.name(), state.target);
                    }
                    Err(error) => self.report_hardware_fault(ordinary.name(), &error),
                }
            }
        }
    }

    /// Compute the next goal from the previous target.
    fn next_goal(&self, state: &ArmState, command: &ControlCommand) -> (JointPositions, bool) {
        let step = self.arm_config.move_step;
        match command {
            ControlCommand::Move { direction } => {
                let (joint, delta) = match direction {
                    MoveDirection::Up => (Joint::ShoulderLift, step),
                    MoveDirection::Down => (Joint::ShoulderLift, -step),
                    MoveDirection::Left => (Joint::ShoulderPan, -step),
                    MoveDirection::Right => (Joint::ShoulderPan, step),
                    MoveDirection::Forward => (Joint::ElbowFlex, step),
                    MoveDirection::Backward => (Joint::ElbowFlex, -step),
                };
                (state.target.offset(joint, delta), state.gripper_open)
            }
            ControlCommand::MoveToPosition { position } => {
                (position.to_joints(), state.gripper_open)
            }
            ControlCommand::Gripper { action } => {
                let open = match action {
                    GripperAction::Open => true,
                    GripperAction::Close => false,
                    GripperAction::Toggle => !state.gripper_open,
                };
                let angle = if open {
                    self.arm_config.gripper_open_position
                } else {
                    self.arm_config.gripper_closed_position
                };
                let mut goal = state.target;
                goal.set(Joint::Gripper, angle);
                (goal, open)
            }
            // handled before next_goal is reached
            ControlCommand::EmergencyStop | ControlCommand::Resume => {
                (state.target, state.gripper_open)
            }
        }
    }

    fn report_hardware_fault(&self, context: &str, error: &DriverError) {
        tracing::error!("Hardware fault during {}: {}", context, error);
        let _ = self.events.send(ServerMessage::Error {
            error_code: hardware_error_code(error),
            message: error.to_string(),
            details: Some(context.to_owned()),
        });
    }

    /// Broadcast the current state, throttled to the configured floor.
    async fn publish_status(&mut self) {
        if let Some(last) = self.last_status {
            if last.elapsed() < self.status_interval {
                return;
            }
        }
        let state = self.actuator.snapshot().await;
        let report = StatusReport::from_state(&state);
        // send fails only when no session is listening
        let _ = self.events.send(ServerMessage::Status(report));
        self.last_status = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use remora_controller::arm_driver::MockArmDriver;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        control: ControlLoop,
        actuator: Arc<ExclusiveActuator>,
        slot: Arc<CommandSlot>,
        events: broadcast::Receiver<ServerMessage>,
        failure_switch: Arc<AtomicBool>,
    }

    async fn fixture() -> Fixture {
        let driver = MockArmDriver::new(JointPositions::default());
        let failure_switch = driver.failure_switch();
        let actuator = Arc::new(
            ExclusiveActuator::connect(driver, Duration::from_millis(100))
                .await
                .unwrap(),
        );
        let slot = Arc::new(CommandSlot::new());
        let (events, receiver) = broadcast::channel(64);
        let server_config = ServerConfig {
            status_interval_ms: 0,
            ..ServerConfig::default()
        };
        let control = ControlLoop::new(
            actuator.clone(),
            slot.clone(),
            events,
            ArmConfig::default(),
            &server_config,
        );
        Fixture {
            control,
            actuator,
            slot,
            events: receiver,
            failure_switch,
        }
    }

    fn latest_status(events: &mut broadcast::Receiver<ServerMessage>) -> Option<StatusReport> {
        let mut last = None;
        while let Ok(message) = events.try_recv() {
            if let ServerMessage::Status(report) = message {
                last = Some(report);
            }
        }
        last
    }

    #[tokio::test]
    async fn move_advances_target_by_one_step() {
        let mut fx = fixture().await;
        fx.slot.submit(ControlCommand::Move {
            direction: MoveDirection::Forward,
        });
        fx.control.step().await;
        let state = fx.actuator.snapshot().await;
        assert_relative_eq!(state.target.elbow_flex, 0.5);
        let report = latest_status(&mut fx.events).unwrap();
        assert_relative_eq!(report.target.elbow_flex, 0.5);
    }

    #[tokio::test]
    async fn repeated_moves_accumulate_from_previous_target() {
        let mut fx = fixture().await;
        for _ in 0..3 {
            fx.slot.submit(ControlCommand::Move {
                direction: MoveDirection::Up,
            });
            fx.control.step().await;
        }
        let state = fx.actuator.snapshot().await;
        assert_relative_eq!(state.target.shoulder_lift, 1.5);
    }

    #[tokio::test]
    async fn goal_is_clamped_to_joint_range() {
        let mut fx = fixture().await;
        fx.slot.submit(ControlCommand::MoveToPosition {
            position: crate::protocol::PosePosition {
                x: 999.0,
                y: 0.0,
                z: 0.0,
                roll: 0.0,
                pitch: 0.0,
                yaw: 50.0,
            },
        });
        fx.control.step().await;
        let state = fx.actuator.snapshot().await;
        assert_relative_eq!(state.target.shoulder_pan, 180.0);
        assert_relative_eq!(state.target.gripper, 50.0);
    }

    #[tokio::test]
    async fn estop_freezes_target_and_blocks_moves() {
        let mut fx = fixture().await;
        fx.slot.submit(ControlCommand::Move {
            direction: MoveDirection::Forward,
        });
        fx.control.step().await;

        fx.slot.submit(ControlCommand::EmergencyStop);
        fx.control.step().await;
        let stopped = fx.actuator.snapshot().await;
        assert!(stopped.emergency_stopped);
        assert_eq!(stopped.target, stopped.current);

        // a move behind the latch is dropped
        fx.slot.submit(ControlCommand::Move {
            direction: MoveDirection::Forward,
        });
        fx.control.step().await;
        assert_eq!(fx.actuator.snapshot().await.target, stopped.target);

        // resume re-enables motion
        fx.slot.submit(ControlCommand::Resume);
        fx.control.step().await;
        assert!(!fx.actuator.snapshot().await.emergency_stopped);
    }

    #[tokio::test]
    async fn gripper_toggle_flips_between_configured_angles() {
        let mut fx = fixture().await;
        fx.slot.submit(ControlCommand::Gripper {
            action: GripperAction::Toggle,
        });
        fx.control.step().await;
        let state = fx.actuator.snapshot().await;
        assert!(state.gripper_open);
        assert_relative_eq!(state.target.gripper, 45.0);

        fx.slot.submit(ControlCommand::Gripper {
            action: GripperAction::Toggle,
        });
        fx.control.step().await;
        let state = fx.actuator.snapshot().await;
        assert!(!state.gripper_open);
        assert_relative_eq!(state.target.gripper, 0.0);
    }

    #[tokio::test]
    async fn hardware_fault_suspends_actuation_until_resume() {
        let mut fx = fixture().await;
        fx.failure_switch.store(true, Ordering::Release);
        fx.slot.submit(ControlCommand::Move {
            direction: MoveDirection::Forward,
        });
        fx.control.step().await;
        let report = latest_status(&mut fx.events).unwrap();
        assert!(!report.robot_connected);
        assert_eq!(report.safety_status, crate::protocol::SafetyStatus::Error);

        // further moves are suppressed while disconnected
        fx.slot.submit(ControlCommand::Move {
            direction: MoveDirection::Forward,
        });
        fx.control.step().await;
        assert_relative_eq!(fx.actuator.snapshot().await.target.elbow_flex, 0.0);

        // resume re-probes the bus and restores the connection
        fx.failure_switch.store(false, Ordering::Release);
        fx.slot.submit(ControlCommand::Resume);
        fx.control.step().await;
        assert!(fx.actuator.snapshot().await.connected);
    }

    #[tokio::test]
    async fn fault_broadcasts_unsolicited_error() {
        let mut fx = fixture().await;
        fx.failure_switch.store(true, Ordering::Release);
        fx.slot.submit(ControlCommand::Move {
            direction: MoveDirection::Forward,
        });
        fx.control.step().await;
        let mut saw_error = false;
        while let Ok(message) = fx.events.try_recv() {
            if let ServerMessage::Error { error_code, .. } = message {
                assert_eq!(error_code, crate::protocol::ErrorCode::RobotDisconnected);
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
