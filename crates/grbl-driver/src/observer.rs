//! Run observation
//!
//! The executor and the job runner report what happens through [`CycleObserver`]; the
//! CLI implements it to draw the progress line, play alerts and print summaries. Every
//! method has a no-op default, and `()` observes nothing.

use grbl_protocol::{ControllerError, MachineState, WorkPosition};
use std::time::Duration;

/// Why an alert fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// A program line carrying a `beep` comment was reached
    Marker,
    /// The reported Y position crossed the configured threshold
    YPosition,
}

/// Live progress, published after every status report or device message
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// 1-based index of the running cycle
    pub cycle: u32,
    pub repeats: u32,
    /// 1-based index of the last program line handled
    pub line: usize,
    pub total_lines: usize,
    pub percent: u8,
    pub pieces_cycle: u32,
    pub pieces_total: u64,
    pub state: Option<MachineState>,
    pub position: Option<WorkPosition>,
    pub message: Option<String>,
}

/// Published by the job runner after each cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub repeats_done: u32,
    pub repeats_target: u32,
    pub pieces_cycle: u32,
    pub pieces_total: u64,
    pub cycle_time: Duration,
    /// Since the logical run start (includes resumed cycles)
    pub program_time: Duration,
    /// Cycle time per piece, rounded up
    pub seconds_per_piece: Option<u64>,
    pub error_count: u32,
    /// Cut stopped by a stop-after-piece request
    pub halted: bool,
}

pub trait CycleObserver {
    fn progress(&mut self, _progress: &Progress) {}

    /// A block was rejected; `line` is its 1-based program line
    fn controller_error(&mut self, _line: Option<usize>, _error: &ControllerError) {}

    fn alert(&mut self, _kind: AlertKind) {}

    fn cycle_finished(&mut self, _summary: &CycleSummary) {}
}

impl CycleObserver for () {}

/// Integer percentage of `line` over `total`, rounded; 100 for an empty program
pub fn percent(line: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((line as f64 * 100.0 / total as f64).round() as u64).min(100) as u8
}

/// Whole seconds of `elapsed` (rounded) per piece, rounded up
pub fn seconds_per_piece(elapsed: Duration, pieces: u32) -> Option<u64> {
    let secs = elapsed.as_secs_f64().round() as u64;
    (pieces > 0).then(|| secs.div_ceil(u64::from(pieces)))
}
