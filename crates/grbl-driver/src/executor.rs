//! Cycle executor
//!
//! Streams one pass over the program. For each raw line:
//!
//! 1. a `beep` comment raises a marker alert
//! 2. blank and comment-only lines are skipped
//! 3. G0/G1 lines update the pass statistics; a travel move (`G1` with `S0` or no `S`)
//!    whose Y delta reaches the inter-piece distance completes a piece, and a pending
//!    stop-after-piece request halts the pass right there (the boundary line is not sent)
//! 4. power/feed substitution is applied
//! 5. responses are drained until the block fits, then the block is sent
//!
//! After the last line the remaining in-flight blocks are drained. Every `error:N` counts
//! against the abort threshold, whether it arrives mid-stream or during that final drain.

use crate::error::DriverError;
use crate::flow::{BufferTracker, GRBL_RX_BUFFER_SIZE, StreamMode};
use crate::observer::{AlertKind, CycleObserver, Progress, percent};
use crate::state::RunControl;
use grbl_protocol::block::comment;
use grbl_protocol::{ControllerResponse, Motion, StatusReport, StreamBlock, Substitution, normalize, parse};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Y delta (mm) of the travel move between two pieces
pub const DEFAULT_PIECE_DISTANCE: f64 = 600.0;

/// `error:N` responses tolerated before the run aborts (the threshold-th aborts)
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// What the executor needs from a link
pub trait StreamLink {
    /// Queue a block for writing
    fn submit(&mut self, block: StreamBlock) -> Result<(), DriverError>;

    /// Next classified line, blocking up to the stall timeout
    fn recv(&mut self) -> Result<ControllerResponse, DriverError>;

    /// Whether classified lines are already waiting
    fn has_pending(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorConfig {
    /// Controller receive buffer size (bytes)
    pub capacity: usize,
    pub mode: StreamMode,
    /// Minimum Y delta of a travel move between pieces (mm)
    pub piece_distance: f64,
    pub error_threshold: u32,
    /// Alert once per pass when the reported Y exceeds this (mm)
    pub y_alert: Option<f64>,
    pub substitution: Substitution,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            capacity: GRBL_RX_BUFFER_SIZE,
            mode: StreamMode::Buffered,
            piece_distance: DEFAULT_PIECE_DISTANCE,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            y_alert: None,
            substitution: Substitution::default(),
        }
    }
}

/// Counters accumulated over one pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleStats {
    pub pieces: u32,
    /// Sum of |dx| (mm)
    pub x_distance: f64,
    /// Sum of |dy| (mm)
    pub y_distance: f64,
    /// Sum of move lengths (mm)
    pub path_length: f64,
    /// Sum of power x move length over cutting moves
    pub power_integral: f64,
    pub error_count: u32,
}

impl CycleStats {
    fn add_motion(&mut self, motion: &Motion) {
        self.x_distance += motion.dx.abs();
        self.y_distance += motion.dy.abs();
        self.path_length += motion.distance();
        self.power_integral += motion.power_integral();
    }

    /// Distance-weighted mean power (per mille); 0 when nothing moved
    pub fn average_power(&self) -> f64 {
        if self.path_length > 0.0 {
            self.power_integral / self.path_length
        } else {
            0.0
        }
    }
}

/// Where a pass sits in the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassContext {
    /// 1-based cycle index
    pub cycle: u32,
    pub repeats: u32,
    /// Pieces completed before this pass (resumed and earlier cycles)
    pub pieces_before: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassOutcome {
    pub stats: CycleStats,
    /// Stopped early on a stop-after-piece request
    pub halted: bool,
    pub elapsed: Duration,
}

/// Whether a raw line carries a `beep` marker comment
pub fn is_marker(raw: &str) -> bool {
    comment(raw).is_some_and(|c| c.to_ascii_lowercase().contains("beep"))
}

pub struct CycleExecutor<'a> {
    config: &'a ExecutorConfig,
    control: &'a RunControl,
}

impl<'a> CycleExecutor<'a> {
    pub fn new(config: &'a ExecutorConfig, control: &'a RunControl) -> Self {
        Self { config, control }
    }

    fn is_piece_boundary(&self, motion: &Motion) -> bool {
        motion.is_cut() && motion.power == 0.0 && motion.dy >= self.config.piece_distance
    }

    /// Stream one pass over `program`
    ///
    /// # Errors
    /// Transport failures, a stalled link, a block that can never fit, or the error
    /// threshold being reached. All of them end the run.
    pub fn run_pass<L, O>(
        &self,
        program: &[String],
        link: &mut L,
        observer: &mut O,
        ctx: PassContext,
    ) -> Result<PassOutcome, DriverError>
    where
        L: StreamLink + ?Sized,
        O: CycleObserver + ?Sized,
    {
        let started = Instant::now();
        let mut pass = PassState {
            config: self.config,
            ctx,
            observer,
            tracker: BufferTracker::new(self.config.capacity, self.config.mode),
            stats: CycleStats::default(),
            line: 0,
            total_lines: program.len(),
            status: None,
            message: None,
            y_alerted: false,
        };
        let mut halted = false;
        let mut last_motion_was_boundary = false;

        debug!("Cycle {}/{}: streaming {} lines", ctx.cycle, ctx.repeats, program.len());

        for (index, raw) in program.iter().enumerate() {
            pass.line = index + 1;

            if is_marker(raw) {
                pass.observer.alert(AlertKind::Marker);
            }

            let Some(block) = normalize(raw) else {
                continue;
            };

            if let Some(motion) = parse(raw) {
                let boundary = self.is_piece_boundary(&motion);
                if boundary {
                    pass.stats.pieces += 1;
                    trace!("Piece {} done at line {}", pass.stats.pieces, pass.line);
                    if self.control.stop_after_piece() {
                        info!("Stop after piece requested, halting at line {}", pass.line);
                        halted = true;
                        break;
                    }
                }
                last_motion_was_boundary = boundary;
                pass.stats.add_motion(&motion);
            }

            let text = self.config.substitution.apply(block.text()).into_owned();
            let block = StreamBlock::new(text).sequenced(pass.line as u64);
            let len = block.wire_len();
            if !pass.tracker.fits(len) {
                pass.tracker.stop();
                return Err(DriverError::BlockTooLong {
                    len,
                    limit: pass.tracker.limit(),
                });
            }

            while pass.tracker.needs_drain(len, link.has_pending()) {
                let response = link.recv()?;
                pass.handle(response)?;
            }

            link.submit(block)?;
            pass.tracker.push(pass.line as u64, len);
        }

        while !pass.tracker.is_empty() {
            let response = link.recv()?;
            pass.handle(response)?;
        }
        pass.tracker.stop();

        // The last piece has no travel move after it
        if !halted && !last_motion_was_boundary {
            pass.stats.pieces += 1;
        }

        let outcome = PassOutcome {
            stats: pass.stats,
            halted,
            elapsed: started.elapsed(),
        };
        debug!("Cycle {} finished: {:?}", ctx.cycle, outcome);
        Ok(outcome)
    }
}

struct PassState<'a, O: CycleObserver + ?Sized> {
    config: &'a ExecutorConfig,
    ctx: PassContext,
    observer: &'a mut O,
    tracker: BufferTracker,
    stats: CycleStats,
    line: usize,
    total_lines: usize,
    status: Option<StatusReport>,
    message: Option<String>,
    y_alerted: bool,
}

impl<O: CycleObserver + ?Sized> PassState<'_, O> {
    fn handle(&mut self, response: ControllerResponse) -> Result<(), DriverError> {
        match response {
            ControllerResponse::Ack => {
                if self.tracker.pop().is_none() {
                    warn!("Acknowledgement with nothing in flight");
                }
            },
            ControllerResponse::Error(error) => {
                let line = self.tracker.pop().map(|block| block.seq as usize);
                self.stats.error_count += 1;
                warn!(
                    "Controller error on line {}: {}",
                    line.map_or_else(|| "?".to_string(), |l| l.to_string()),
                    error
                );
                self.observer.controller_error(line, &error);

                let threshold = self.config.error_threshold;
                if self.stats.error_count >= threshold {
                    self.tracker.stop();
                    return Err(DriverError::TooManyErrors {
                        count: self.stats.error_count,
                        threshold,
                    });
                }
            },
            ControllerResponse::Status(report) => {
                self.status = Some(report);
                if let Some(limit) = self.config.y_alert
                    && !self.y_alerted
                    && report.work_position.y > limit
                {
                    self.y_alerted = true;
                    self.observer.alert(AlertKind::YPosition);
                }
                self.publish();
            },
            ControllerResponse::Other(message) => {
                debug!("Device: {}", message);
                self.message = Some(message);
                self.publish();
            },
        }
        Ok(())
    }

    fn publish(&mut self) {
        let progress = Progress {
            cycle: self.ctx.cycle,
            repeats: self.ctx.repeats,
            line: self.line,
            total_lines: self.total_lines,
            percent: percent(self.line, self.total_lines),
            pieces_cycle: self.stats.pieces,
            pieces_total: self.ctx.pieces_before + u64::from(self.stats.pieces),
            state: self.status.map(|s| s.state),
            position: self.status.map(|s| s.work_position),
            message: self.message.clone(),
        };
        self.observer.progress(&progress);
    }
}
