//! Operator overrides
//!
//! Maps operator commands to realtime bytes and [`RunControl`] updates. Speed and laser
//! offsets are tracked on the host and kept within
//! [`OVERRIDE_MIN`](crate::state::OVERRIDE_MIN)..=[`OVERRIDE_MAX`](crate::state::OVERRIDE_MAX);
//! a step that would leave the range is refused and nothing is sent. If the byte cannot
//! be sent, the offset is put back.

use crate::error::DriverError;
use crate::link::LinkWriter;
use crate::state::{RunControl, RunState};
use grbl_protocol::RealtimeCommand;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An operator request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideCommand {
    /// Feed hold (`!`)
    Hold,
    /// Cycle resume (`~`)
    Resume,
    /// Soft reset (0x18)
    Reset,
    /// Feed override step: ±1, ±10, or 0 to reset
    Speed(i32),
    /// Laser power override step: ±1, ±10, or 0 to reset
    Laser(i32),
    /// Toggle "stop after this cycle"
    ToggleLastCycle,
    /// Toggle "stop after this piece"
    ToggleLastPiece,
}

impl FromStr for OverrideCommand {
    type Err = String;

    /// Console syntax: `hold`, `resume`, `reset`, `speed <step>`, `laser <step>`,
    /// `last-cycle`, `last-piece`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_string())?;
        let step = |arg: Option<&str>| -> Result<i32, String> {
            let arg = arg.ok_or_else(|| format!("{verb} needs a step (+10, -10, +1, -1, 0)"))?;
            arg.trim_start_matches('+')
                .parse::<i32>()
                .map_err(|_| format!("invalid step {arg:?}"))
        };

        let cmd = match verb.to_ascii_lowercase().as_str() {
            "hold" => OverrideCommand::Hold,
            "resume" => OverrideCommand::Resume,
            "reset" => OverrideCommand::Reset,
            "speed" => OverrideCommand::Speed(step(words.next())?),
            "laser" => OverrideCommand::Laser(step(words.next())?),
            "last-cycle" => OverrideCommand::ToggleLastCycle,
            "last-piece" => OverrideCommand::ToggleLastPiece,
            other => return Err(format!("unknown command {other:?}")),
        };
        if words.next().is_some() {
            return Err(format!("unexpected arguments after {verb}"));
        }
        Ok(cmd)
    }
}

impl fmt::Display for OverrideCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideCommand::Hold => write!(f, "hold"),
            OverrideCommand::Resume => write!(f, "resume"),
            OverrideCommand::Reset => write!(f, "reset"),
            OverrideCommand::Speed(step) => write!(f, "speed {step:+}"),
            OverrideCommand::Laser(step) => write!(f, "laser {step:+}"),
            OverrideCommand::ToggleLastCycle => write!(f, "last-cycle"),
            OverrideCommand::ToggleLastPiece => write!(f, "last-piece"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideOutcome {
    /// Command applied; run state afterwards
    Applied(RunState),
    /// Step not allowed or out of range; nothing sent
    Refused,
}

/// Something that accepts realtime bytes
///
/// Implemented by [`LinkWriter`]; tests substitute a recorder.
pub trait RealtimeSink {
    fn send(&self, cmd: RealtimeCommand) -> Result<(), DriverError>;
}

impl RealtimeSink for LinkWriter {
    fn send(&self, cmd: RealtimeCommand) -> Result<(), DriverError> {
        self.realtime(cmd)
    }
}

/// Applies [`OverrideCommand`]s to a running job
pub struct OverrideController<S: RealtimeSink = LinkWriter> {
    control: Arc<RunControl>,
    sink: S,
}

impl<S: RealtimeSink> OverrideController<S> {
    pub fn new(control: Arc<RunControl>, sink: S) -> Self {
        Self { control, sink }
    }

    pub fn state(&self) -> RunState {
        self.control.snapshot()
    }

    pub fn apply(&self, cmd: OverrideCommand) -> Result<OverrideOutcome, DriverError> {
        match cmd {
            OverrideCommand::Hold => self.sink.send(RealtimeCommand::FeedHold)?,
            OverrideCommand::Resume => self.sink.send(RealtimeCommand::CycleResume)?,
            OverrideCommand::Reset => self.sink.send(RealtimeCommand::SoftReset)?,
            OverrideCommand::Speed(step) => {
                let Some(byte) = RealtimeCommand::feed_step(step) else {
                    return Ok(OverrideOutcome::Refused);
                };
                let previous = if step == 0 {
                    self.control.reset_speed()
                } else if let Some(offset) = self.control.step_speed(step) {
                    offset - step
                } else {
                    debug!("Speed override step {step:+} refused at {}%", self.control.speed_offset());
                    return Ok(OverrideOutcome::Refused);
                };
                self.send_or_restore(byte, || self.control.restore_speed(previous))?;
            },
            OverrideCommand::Laser(step) => {
                let Some(byte) = RealtimeCommand::power_step(step) else {
                    return Ok(OverrideOutcome::Refused);
                };
                let previous = if step == 0 {
                    self.control.reset_laser()
                } else if let Some(offset) = self.control.step_laser(step) {
                    offset - step
                } else {
                    debug!("Laser override step {step:+} refused at {}%", self.control.laser_offset());
                    return Ok(OverrideOutcome::Refused);
                };
                self.send_or_restore(byte, || self.control.restore_laser(previous))?;
            },
            OverrideCommand::ToggleLastCycle => {
                self.control.set_stop_after_cycle(!self.control.stop_after_cycle());
            },
            OverrideCommand::ToggleLastPiece => {
                self.control.set_stop_after_piece(!self.control.stop_after_piece());
            },
        }

        let state = self.control.snapshot();
        info!(
            "Override {}: speed {:+}%, laser {:+}%, last cycle {}, last piece {}",
            cmd,
            state.speed_override_pct,
            state.laser_override_pct,
            state.stop_after_cycle,
            state.stop_after_piece
        );
        Ok(OverrideOutcome::Applied(state))
    }

    /// The offset only stays changed if the controller got the byte
    fn send_or_restore(
        &self,
        byte: RealtimeCommand,
        restore: impl FnOnce(),
    ) -> Result<(), DriverError> {
        self.sink.send(byte).inspect_err(|e| {
            warn!("Override {:?} not sent, offset kept: {}", byte, e);
            restore();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<RealtimeCommand>>,
    }

    impl RealtimeSink for &Recorder {
        fn send(&self, cmd: RealtimeCommand) -> Result<(), DriverError> {
            self.sent.lock().unwrap().push(cmd);
            Ok(())
        }
    }

    struct DeadLink;

    impl RealtimeSink for DeadLink {
        fn send(&self, _cmd: RealtimeCommand) -> Result<(), DriverError> {
            Err(DriverError::ChannelClosed)
        }
    }

    #[test]
    fn test_parse_console_commands() {
        assert_eq!("hold".parse(), Ok(OverrideCommand::Hold));
        assert_eq!("speed +10".parse(), Ok(OverrideCommand::Speed(10)));
        assert_eq!("laser -1".parse(), Ok(OverrideCommand::Laser(-1)));
        assert_eq!("LAST-PIECE".parse(), Ok(OverrideCommand::ToggleLastPiece));
        assert!("speed".parse::<OverrideCommand>().is_err());
        assert!("speed fast".parse::<OverrideCommand>().is_err());
        assert!("jump".parse::<OverrideCommand>().is_err());
        assert!("hold now".parse::<OverrideCommand>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let cmd = OverrideCommand::Speed(-10);
        assert_eq!(cmd.to_string(), "speed -10");
        assert_eq!(cmd.to_string().parse(), Ok(cmd));
    }

    #[test]
    fn test_speed_steps_within_range() {
        let recorder = Recorder::default();
        let control = Arc::new(RunControl::new(1));
        let overrides = OverrideController::new(control.clone(), &recorder);

        for _ in 0..10 {
            assert!(matches!(
                overrides.apply(OverrideCommand::Speed(10)).unwrap(),
                OverrideOutcome::Applied(_)
            ));
        }
        assert_eq!(
            overrides.apply(OverrideCommand::Speed(1)).unwrap(),
            OverrideOutcome::Refused
        );
        assert_eq!(control.speed_offset(), 100);
        assert_eq!(recorder.sent.lock().unwrap().len(), 10);

        overrides.apply(OverrideCommand::Speed(0)).unwrap();
        assert_eq!(control.speed_offset(), 0);
        assert_eq!(
            recorder.sent.lock().unwrap().last(),
            Some(&RealtimeCommand::FeedOverrideReset)
        );
    }

    #[test]
    fn test_laser_lower_bound() {
        let recorder = Recorder::default();
        let control = Arc::new(RunControl::new(1));
        let overrides = OverrideController::new(control.clone(), &recorder);

        for _ in 0..9 {
            overrides.apply(OverrideCommand::Laser(-10)).unwrap();
        }
        assert_eq!(control.laser_offset(), -90);
        assert_eq!(
            overrides.apply(OverrideCommand::Laser(-1)).unwrap(),
            OverrideOutcome::Refused
        );
        assert_eq!(
            recorder.sent.lock().unwrap().last(),
            Some(&RealtimeCommand::PowerOverrideMinus10)
        );
    }

    #[test]
    fn test_unsupported_step_is_refused() {
        let recorder = Recorder::default();
        let overrides = OverrideController::new(Arc::new(RunControl::new(1)), &recorder);
        assert_eq!(
            overrides.apply(OverrideCommand::Speed(5)).unwrap(),
            OverrideOutcome::Refused
        );
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hold_resume_reset_bytes() {
        let recorder = Recorder::default();
        let overrides = OverrideController::new(Arc::new(RunControl::new(1)), &recorder);
        overrides.apply(OverrideCommand::Hold).unwrap();
        overrides.apply(OverrideCommand::Resume).unwrap();
        overrides.apply(OverrideCommand::Reset).unwrap();
        assert_eq!(
            *recorder.sent.lock().unwrap(),
            vec![
                RealtimeCommand::FeedHold,
                RealtimeCommand::CycleResume,
                RealtimeCommand::SoftReset
            ]
        );
    }

    #[test]
    fn test_last_piece_toggle() {
        let recorder = Recorder::default();
        let control = Arc::new(RunControl::new(3));
        let overrides = OverrideController::new(control.clone(), &recorder);

        overrides.apply(OverrideCommand::ToggleLastPiece).unwrap();
        let state = overrides.state();
        assert!(state.stop_after_piece && state.stop_after_cycle);

        overrides.apply(OverrideCommand::ToggleLastPiece).unwrap();
        let state = overrides.state();
        assert!(!state.stop_after_piece && !state.stop_after_cycle);

        overrides.apply(OverrideCommand::ToggleLastCycle).unwrap();
        assert!(overrides.state().stop_after_cycle);
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_send_keeps_offsets() {
        let recorder = Recorder::default();
        let control = Arc::new(RunControl::new(1));
        OverrideController::new(control.clone(), &recorder)
            .apply(OverrideCommand::Laser(10))
            .unwrap();

        let overrides = OverrideController::new(control.clone(), DeadLink);
        assert!(matches!(
            overrides.apply(OverrideCommand::Speed(10)),
            Err(DriverError::ChannelClosed)
        ));
        assert_eq!(control.speed_offset(), 0);

        assert!(overrides.apply(OverrideCommand::Laser(-1)).is_err());
        assert_eq!(control.laser_offset(), 10);
        assert!(overrides.apply(OverrideCommand::Laser(0)).is_err());
        assert_eq!(control.laser_offset(), 10);

        // stop toggles never touch the link
        assert!(overrides.apply(OverrideCommand::Hold).is_err());
        assert!(overrides.apply(OverrideCommand::ToggleLastCycle).is_ok());
    }
}
