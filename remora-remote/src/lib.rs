//! WebSocket teleoperation endpoint for the Remora arm.
//!
//! One control loop task ticks at a fixed rate against the exclusive
//! actuator; one task per connected session decodes commands into a
//! single-slot mailbox and forwards status broadcasts back out.

pub mod config;
pub mod control_loop;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod protocol;
pub mod server;
pub mod session;
