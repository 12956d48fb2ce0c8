//! Multi-cycle job runner
//!
//! Runs the program `repeats` times over one link:
//!
//! ```text
//! resume from ledger -> [$C] -> poller on -> [$H] -> cycle -> record -> home | return to start
//!                                                      ^                                  |
//!                                                      +------ until repeats / stop ------+
//! ```
//!
//! Exactly one ledger record is appended per completed cycle.

use crate::error::DriverError;
use crate::executor::{CycleExecutor, ExecutorConfig, PassContext};
use crate::link::GrblLink;
use crate::observer::{CycleObserver, CycleSummary, seconds_per_piece};
use crate::poller::{PollerConfig, StatusPoller};
use crate::state::RunControl;
use grbl_protocol::{LineCommand, MachineState, RealtimeCommand, is_xy_rapid, normalize};
use grbl_tools::{Ledger, ProductionRecord, ResumeState, resume, resume_window};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Ledger program name (no whitespace)
    pub program_name: String,
    pub operator: Option<String>,
    pub repeats: u32,
    /// Run under `$C` (no motion)
    pub check_mode: bool,
    /// Home before the first cycle
    pub home: bool,
    /// Home after every N-th cycle instead of returning to start; 0 disables
    pub home_every: u32,
    pub executor: ExecutorConfig,
    pub poller: PollerConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            program_name: "program".to_string(),
            operator: None,
            repeats: 1,
            check_mode: false,
            home: false,
            home_every: 0,
            executor: ExecutorConfig::default(),
            poller: PollerConfig::default(),
        }
    }
}

impl JobConfig {
    /// Reject settings that cannot run, before anything is sent
    pub fn validate(&self) -> Result<(), DriverError> {
        let invalid = |msg: String| Err(DriverError::Config(msg));

        if self.repeats == 0 {
            return invalid("repeat count must be at least 1".into());
        }
        if self.program_name.is_empty() || self.program_name.contains(char::is_whitespace) {
            return invalid(format!("invalid program name {:?}", self.program_name));
        }
        if let Some(op) = &self.operator
            && (op.is_empty() || op.contains(char::is_whitespace))
        {
            return invalid(format!("invalid operator id {op:?}"));
        }

        let exec = &self.executor;
        if exec.capacity < 2 {
            return invalid(format!("receive buffer capacity {} is too small", exec.capacity));
        }
        if exec.error_threshold == 0 {
            return invalid("error threshold must be at least 1".into());
        }
        if !exec.piece_distance.is_finite() || exec.piece_distance <= 0.0 {
            return invalid(format!("invalid inter-piece distance {}", exec.piece_distance));
        }
        if let Some(pct) = exec.substitution.laser_pct
            && !(1..=100).contains(&pct)
        {
            return invalid(format!("laser power {pct}% is outside 1..=100"));
        }
        if exec.substitution.speed == Some(0) {
            return invalid("speed override must be greater than 0".into());
        }

        self.poller.validate()
    }
}

/// Result of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    /// Counters taken over from the ledger
    pub resumed: ResumeState,
    pub repeats_done: u32,
    pub pieces_total: u64,
    /// Cycles run by this process
    pub cycles_run: u32,
    /// Ended on a stop-after-cycle or stop-after-piece request
    pub stopped_by_request: bool,
}

/// Normalized text of the program's start position: its last rapid move with X and Y
pub fn start_position(program: &[String]) -> Option<String> {
    program
        .iter()
        .rev()
        .find(|line| is_xy_rapid(line))
        .and_then(|line| normalize(line))
        .map(|block| block.text().to_string())
}

/// Ledger Y distance of a pass: the table travels the pass's Y distance back to the start
fn ledger_y_mm(pass_y_distance: f64) -> i64 {
    (2.0 * pass_y_distance).round() as i64
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct JobRunner {
    config: JobConfig,
    ledger: Option<Ledger>,
    control: Arc<RunControl>,
}

impl JobRunner {
    pub fn new(config: JobConfig, ledger: Option<Ledger>) -> Result<Self, DriverError> {
        config.validate()?;
        let control = Arc::new(RunControl::new(config.repeats));
        Ok(Self {
            config,
            ledger,
            control,
        })
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Shared run flags and overrides, for the operator console and signal handlers
    pub fn control(&self) -> Arc<RunControl> {
        self.control.clone()
    }

    /// Counters to continue from, as of `now` (unix seconds)
    pub fn resume_state(&self, now: i64) -> Result<ResumeState, DriverError> {
        let Some(ledger) = &self.ledger else {
            return Ok(ResumeState::fresh(now));
        };
        let records = ledger
            .read_all()
            .map_err(|e| DriverError::Ledger(format!("{e:#}")))?;
        Ok(resume(
            &records,
            self.config.operator.as_deref(),
            &self.config.program_name,
            now,
            resume_window(self.config.repeats),
        ))
    }

    /// Run all cycles
    ///
    /// On a fatal error after the poller started (see [`DriverError::is_fatal`]) the
    /// machine is stopped with a feed hold and a soft reset before the error is returned.
    pub fn run<O>(
        &self,
        link: &mut GrblLink,
        program: &[String],
        observer: &mut O,
    ) -> Result<JobReport, DriverError>
    where
        O: CycleObserver + ?Sized,
    {
        let resumed = self.resume_state(unix_now())?;
        if resumed.is_resumed() {
            info!(
                "Continuing {}: {} cycles and {} pieces already done",
                self.config.program_name, resumed.repeats_done, resumed.pieces_total
            );
        }
        self.control.set_progress(resumed.repeats_done, resumed.pieces_total);

        if self.config.check_mode {
            link.command(LineCommand::ToggleCheckMode)?;
            info!("Check mode enabled");
        }

        if self.config.poller.interval >= link.config().stall_timeout {
            warn!(
                "Status interval {:?} is not below the stall timeout {:?}; long moves may stall the link",
                self.config.poller.interval,
                link.config().stall_timeout
            );
        }

        self.control.set_run_active(true);
        let poller = match StatusPoller::spawn(link.writer(), self.control.clone(), self.config.poller) {
            Ok(poller) => poller,
            Err(e) => {
                self.control.set_run_active(false);
                return Err(e);
            },
        };

        let result = self.run_cycles(link, program, observer, resumed);

        self.control.set_run_active(false);
        poller.stop();

        if let Err(e) = &result {
            if e.is_fatal() {
                error!("Aborting run: {}", e);
                Self::stop_machine(link);
            } else {
                warn!("Run ended: {}", e);
            }
        }
        result
    }

    /// Feed hold then soft reset; a dead link only logs
    fn stop_machine(link: &GrblLink) {
        for cmd in [RealtimeCommand::FeedHold, RealtimeCommand::SoftReset] {
            if let Err(e) = link.realtime(cmd) {
                warn!("Failed to send {:?}: {}", cmd, e);
            }
        }
    }

    fn run_cycles<O>(
        &self,
        link: &mut GrblLink,
        program: &[String],
        observer: &mut O,
        resumed: ResumeState,
    ) -> Result<JobReport, DriverError>
    where
        O: CycleObserver + ?Sized,
    {
        let config = &self.config;
        let mut report = JobReport {
            resumed,
            repeats_done: resumed.repeats_done,
            pieces_total: resumed.pieces_total,
            cycles_run: 0,
            stopped_by_request: false,
        };

        if report.repeats_done >= config.repeats {
            info!("All {} cycles already recorded, nothing to run", config.repeats);
            return Ok(report);
        }

        if config.home && !config.check_mode {
            link.command(LineCommand::Home)?;
        }

        let start = start_position(program);
        if start.is_none() {
            warn!("Program has no rapid move with X and Y; cycles will not return to start");
        }

        let executor = CycleExecutor::new(&config.executor, &self.control);

        while report.repeats_done < config.repeats {
            let cycle_start = unix_now();
            let ctx = PassContext {
                cycle: report.repeats_done + 1,
                repeats: config.repeats,
                pieces_before: report.pieces_total,
            };
            let outcome = executor.run_pass(program, link, observer, ctx)?;
            let stats = outcome.stats;

            report.repeats_done += 1;
            report.cycles_run += 1;
            report.pieces_total += u64::from(stats.pieces);
            self.control.set_progress(report.repeats_done, report.pieces_total);

            let record = ProductionRecord {
                start: cycle_start,
                end: unix_now(),
                program: config.program_name.clone(),
                pieces: stats.pieces,
                x_mm: stats.x_distance.round() as i64,
                y_mm: ledger_y_mm(stats.y_distance),
                power_permille: stats.average_power().round() as u32,
                operator: config.operator.clone(),
            };
            if let Some(ledger) = &self.ledger {
                ledger
                    .append(&record)
                    .map_err(|e| DriverError::Ledger(format!("{e:#}")))?;
            }

            let summary = CycleSummary {
                repeats_done: report.repeats_done,
                repeats_target: config.repeats,
                pieces_cycle: stats.pieces,
                pieces_total: report.pieces_total,
                cycle_time: outcome.elapsed,
                program_time: Duration::from_secs((record.end - resumed.start).max(0) as u64),
                seconds_per_piece: seconds_per_piece(outcome.elapsed, stats.pieces),
                error_count: stats.error_count,
                halted: outcome.halted,
            };
            info!(
                "Cycle {}/{} done: {} pieces ({} total), {} errors",
                summary.repeats_done,
                summary.repeats_target,
                summary.pieces_cycle,
                summary.pieces_total,
                summary.error_count
            );
            observer.cycle_finished(&summary);

            let stop_requested = self.control.stop_after_cycle();
            let home_due = config.home_every > 0
                && !config.check_mode
                && !stop_requested
                && report.repeats_done % config.home_every == 0;
            if home_due {
                link.command(LineCommand::Home)?;
            } else if let Some(start) = &start {
                self.return_to_start(link, start)?;
            }

            if stop_requested {
                info!("Stopping after cycle {} on request", report.repeats_done);
                report.stopped_by_request = true;
                break;
            }
        }

        Ok(report)
    }

    /// `G90`, the start move, then wait until the machine is idle or back below the
    /// Y alert line
    fn return_to_start(&self, link: &GrblLink, start: &str) -> Result<(), DriverError> {
        debug!("Returning to start: {}", start);
        link.command(LineCommand::AbsoluteMode)?;
        link.execute(start)?;

        let y_alert = self.config.executor.y_alert;
        let report = link.wait_for_status(|report| {
            matches!(report.state, MachineState::Idle | MachineState::Check)
                || y_alert.is_some_and(|y| report.work_position.y < y)
        })?;
        debug!("Back at start: {} {:?}", report.state, report.work_position);
        Ok(())
    }
}
