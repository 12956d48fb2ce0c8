//! Realtime commands
//!
//! Realtime commands are single bytes that Grbl picks out of the serial stream
//! immediately. They never enter the receive buffer and are never acknowledged, so they
//! bypass the in-flight accounting entirely.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Single-byte realtime command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RealtimeCommand {
    StatusRequest = b'?',
    CycleResume = b'~',
    FeedHold = b'!',
    SoftReset = 0x18,

    FeedOverrideReset = 0x90,
    FeedOverridePlus10 = 0x91,
    FeedOverrideMinus10 = 0x92,
    FeedOverridePlus1 = 0x93,
    FeedOverrideMinus1 = 0x94,

    PowerOverrideReset = 0x99,
    PowerOverridePlus10 = 0x9A,
    PowerOverrideMinus10 = 0x9B,
    PowerOverridePlus1 = 0x9C,
    PowerOverrideMinus1 = 0x9D,
}

impl RealtimeCommand {
    /// Wire byte
    #[inline]
    pub fn byte(self) -> u8 {
        self.into()
    }

    /// Feed override command for a step of ±1 or ±10 percent (0 resets)
    pub fn feed_step(step: i32) -> Option<Self> {
        match step {
            0 => Some(Self::FeedOverrideReset),
            10 => Some(Self::FeedOverridePlus10),
            -10 => Some(Self::FeedOverrideMinus10),
            1 => Some(Self::FeedOverridePlus1),
            -1 => Some(Self::FeedOverrideMinus1),
            _ => None,
        }
    }

    /// Spindle/laser power override command for a step of ±1 or ±10 percent (0 resets)
    pub fn power_step(step: i32) -> Option<Self> {
        match step {
            0 => Some(Self::PowerOverrideReset),
            10 => Some(Self::PowerOverridePlus10),
            -10 => Some(Self::PowerOverrideMinus10),
            1 => Some(Self::PowerOverridePlus1),
            -1 => Some(Self::PowerOverrideMinus1),
            _ => None,
        }
    }
}

/// Line commands used by the streamer outside the program itself
///
/// Unlike realtime commands these are ordinary blocks: they occupy receive-buffer space
/// and are answered with `ok`/`error:N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCommand {
    /// `$H` homing cycle
    Home,
    /// `$C` toggle check (simulation) mode
    ToggleCheckMode,
    /// `G90` absolute distance mode
    AbsoluteMode,
}

impl LineCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            LineCommand::Home => "$H",
            LineCommand::ToggleCheckMode => "$C",
            LineCommand::AbsoluteMode => "G90",
        }
    }
}
