//! Timed command scheduling.
//!
//! While a command time is set, every device command executes at that device
//! time instead of when it is issued. This aligns GPIO transitions and
//! retunes across motherboards to pulse boundaries.
//!
//! ```text
//!   Immediate ──set_command_time(t)──► Scheduled(t)
//!       ▲                                  │  set_command_time(t') (last write wins)
//!       └──────clear_command_time()────────┘
//! ```

use crate::error::UsrpResult;
use crate::hal::{GpsClock, UsrpDevice};
use darn_core::TimeSpec;
use tracing::trace;

/// Pending command time of a device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CommandContext {
    #[default]
    Immediate,
    Scheduled(TimeSpec),
}

impl CommandContext {
    pub fn time(&self) -> Option<TimeSpec> {
        match self {
            CommandContext::Immediate => None,
            CommandContext::Scheduled(t) => Some(*t),
        }
    }
}

/// Device time together with the GPS lock state it was read under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceTime {
    pub time: TimeSpec,
    /// Unlocked means `time` is best effort
    pub gps_locked: bool,
}

/// Sets and clears the command time of one device.
pub struct CommandScheduler<'a> {
    device: &'a mut dyn UsrpDevice,
    gps: Option<&'a dyn GpsClock>,
    context: &'a mut CommandContext,
}

impl<'a> CommandScheduler<'a> {
    pub fn new(
        device: &'a mut dyn UsrpDevice,
        gps: Option<&'a dyn GpsClock>,
        context: &'a mut CommandContext,
    ) -> Self {
        Self { device, gps, context }
    }

    /// Execute later commands at `time`, replacing any earlier time.
    pub fn set_command_time(&mut self, time: TimeSpec) -> UsrpResult<()> {
        self.device.set_command_time(time)?;
        *self.context = CommandContext::Scheduled(time);
        trace!(%time, "Command time set");
        Ok(())
    }

    /// Return to immediate execution.
    pub fn clear_command_time(&mut self) -> UsrpResult<()> {
        self.device.clear_command_time()?;
        *self.context = CommandContext::Immediate;
        trace!("Command time cleared");
        Ok(())
    }

    pub fn command_time(&self) -> Option<TimeSpec> {
        self.context.time()
    }

    pub fn context(&self) -> CommandContext {
        *self.context
    }

    /// Read the free-running device time of the first board.
    pub fn current_device_time(&self) -> UsrpResult<DeviceTime> {
        let time = self.device.time_now(0)?;
        let gps_locked = self
            .gps
            .map_or(false, |gps| gps.is_locked().unwrap_or(false));
        Ok(DeviceTime { time, gps_locked })
    }
}
