//! Hardware side of the Remora teleoperation stack.
//!
//! Everything that talks to the physical arm lives here: joint types and
//! configuration, the motor bus driver boundary, the exclusive actuator
//! that owns the arm state, and the safety limiter.

pub mod actuator;
pub mod arm_config;
pub mod arm_driver;
pub mod feetech;
pub mod safety;
