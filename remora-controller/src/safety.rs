//! Pure position validation.
//!
//! Clamps proposed goals to the configured per-joint ranges. Each axis
//! saturates at its own bound independently; an out-of-range wrist never
//! rejects the shoulder. Stateless on purpose: the emergency-stop latch
//! is owned by the actuator and the admission decision happens upstream.

use crate::arm_config::ArmConfig;
use crate::arm_driver::{Joint, JointPositions, JOINT_COUNT};

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyLimiter {
    ranges: [(f32, f32); JOINT_COUNT],
}

impl SafetyLimiter {
    pub fn new(config: &ArmConfig) -> SafetyLimiter {
        let mut ranges = [(0.0, 0.0); JOINT_COUNT];
        for joint in Joint::ALL {
            let limit = config.joint(joint);
            ranges[joint.index()] = (limit.min, limit.max);
        }
        SafetyLimiter { ranges }
    }

    /// Saturate every joint of `goal` at its configured range.
    ///
    /// Idempotent: values already in range come back unchanged.
    pub fn clamp(&self, goal: JointPositions) -> JointPositions {
        let mut values = goal.to_array();
        for (value, (min, max)) in values.iter_mut().zip(self.ranges) {
            *value = value.clamp(min, max);
        }
        JointPositions::from_array(values)
    }

    pub fn in_range(&self, positions: &JointPositions) -> bool {
        positions
            .to_array()
            .iter()
            .zip(self.ranges)
            .all(|(value, (min, max))| *value >= min && *value <= max)
    }
}
