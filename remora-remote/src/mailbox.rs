//! Single-slot mailbox between the sessions and the control loop.
//!
//! Holds at most one un-applied command; a fast client's intermediate
//! commands are deliberately superseded (last write wins) so actuation
//! never lags behind the network. Emergency stop does not participate in
//! the overwrite race: it sets a separate priority flag that the consumer
//! checks after the ordinary swap, so a same-tick estop is observed no
//! matter which write landed first.

use crate::protocol::ControlCommand;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct CommandSlot {
    pending: Mutex<Option<ControlCommand>>,
    emergency: AtomicBool,
}

impl CommandSlot {
    pub fn new() -> CommandSlot {
        CommandSlot::default()
    }

    /// Store a command for the next tick, replacing anything pending.
    ///
    /// An emergency stop also discards the pending command outright: a
    /// move submitted just before the stop must not survive it.
    pub fn submit(&self, command: ControlCommand) {
        if matches!(command, ControlCommand::EmergencyStop) {
            self.pending.lock().unwrap().take();
            self.emergency.store(true, Ordering::SeqCst);
        } else {
            *self.pending.lock().unwrap() = Some(command);
        }
    }

    /// Consume the slot. Called once per control loop tick.
    pub fn take(&self) -> Option<ControlCommand> {
        let pending = self.pending.lock().unwrap().take();
        // checked after the swap so a concurrently submitted estop wins
        // even if an ordinary command was written later
        if self.emergency.swap(false, Ordering::SeqCst) {
            return Some(ControlCommand::EmergencyStop);
        }
        pending
    }

    pub fn emergency_pending(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }
}
