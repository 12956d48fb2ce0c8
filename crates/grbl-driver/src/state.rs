//! Shared state
//!
//! - [`LinkContext`]: latest machine status, published by the RX thread through
//!   `ArcSwap` (lock-free reads from any thread)
//! - [`RunControl`]: run/stop flags and override offsets, written by the operator console
//!   and read by the executor and poller; every field is an independent atomic
//! - [`RunState`]: plain snapshot of [`RunControl`]

use arc_swap::ArcSwap;
use grbl_protocol::StatusReport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Latest controller status
#[derive(Debug, Clone, Default)]
pub struct MachineStatus {
    pub report: Option<StatusReport>,
    /// Last asynchronous device message (banner, `[MSG:...]`, `ALARM:N`, ...)
    pub last_message: Option<String>,
    pub updated_at: Option<Instant>,
}

/// State shared between the IO threads and the link owner
#[derive(Debug, Default)]
pub struct LinkContext {
    status: ArcSwap<MachineStatus>,
}

impl LinkContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Arc<MachineStatus> {
        self.status.load_full()
    }

    /// Single writer: the RX thread
    pub(crate) fn publish_report(&self, report: StatusReport) {
        let mut next = MachineStatus::clone(&self.status.load());
        next.report = Some(report);
        next.updated_at = Some(Instant::now());
        self.status.store(Arc::new(next));
    }

    pub(crate) fn publish_message(&self, message: &str) {
        let mut next = MachineStatus::clone(&self.status.load());
        next.last_message = Some(message.to_string());
        next.updated_at = Some(Instant::now());
        self.status.store(Arc::new(next));
    }
}

/// Lowest override offset (percent of programmed value)
pub const OVERRIDE_MIN: i32 = -90;
/// Highest override offset (percent of programmed value)
pub const OVERRIDE_MAX: i32 = 100;

/// Run flags and override offsets
#[derive(Debug, Default)]
pub struct RunControl {
    run_active: AtomicBool,
    stop_after_cycle: AtomicBool,
    stop_after_piece: AtomicBool,
    speed_offset: AtomicI32,
    laser_offset: AtomicI32,
    repeats_target: AtomicU32,
    repeats_done: AtomicU32,
    pieces_total: AtomicU64,
}

impl RunControl {
    pub fn new(repeats_target: u32) -> Self {
        Self {
            repeats_target: AtomicU32::new(repeats_target),
            ..Self::default()
        }
    }

    pub fn set_run_active(&self, active: bool) {
        self.run_active.store(active, Ordering::Release);
    }

    pub fn is_run_active(&self) -> bool {
        self.run_active.load(Ordering::Acquire)
    }

    pub fn set_stop_after_cycle(&self, stop: bool) {
        self.stop_after_cycle.store(stop, Ordering::Release);
    }

    pub fn stop_after_cycle(&self) -> bool {
        self.stop_after_cycle.load(Ordering::Acquire)
    }

    /// Stopping after a piece implies stopping after the cycle; clearing it clears both
    pub fn set_stop_after_piece(&self, stop: bool) {
        self.stop_after_piece.store(stop, Ordering::Release);
        self.stop_after_cycle.store(stop, Ordering::Release);
    }

    pub fn stop_after_piece(&self) -> bool {
        self.stop_after_piece.load(Ordering::Acquire)
    }

    pub fn speed_offset(&self) -> i32 {
        self.speed_offset.load(Ordering::Acquire)
    }

    pub fn laser_offset(&self) -> i32 {
        self.laser_offset.load(Ordering::Acquire)
    }

    /// Add `step` to the speed offset; `None` (unchanged) if the result leaves the range
    pub fn step_speed(&self, step: i32) -> Option<i32> {
        step_offset(&self.speed_offset, step)
    }

    pub fn step_laser(&self, step: i32) -> Option<i32> {
        step_offset(&self.laser_offset, step)
    }

    /// Back to 0; returns the previous offset
    pub fn reset_speed(&self) -> i32 {
        self.speed_offset.swap(0, Ordering::AcqRel)
    }

    pub fn reset_laser(&self) -> i32 {
        self.laser_offset.swap(0, Ordering::AcqRel)
    }

    pub(crate) fn restore_speed(&self, offset: i32) {
        self.speed_offset.store(offset, Ordering::Release);
    }

    pub(crate) fn restore_laser(&self, offset: i32) {
        self.laser_offset.store(offset, Ordering::Release);
    }

    pub(crate) fn set_progress(&self, repeats_done: u32, pieces_total: u64) {
        self.repeats_done.store(repeats_done, Ordering::Release);
        self.pieces_total.store(pieces_total, Ordering::Release);
    }

    pub fn snapshot(&self) -> RunState {
        RunState {
            repeats_target: self.repeats_target.load(Ordering::Acquire),
            repeats_done: self.repeats_done.load(Ordering::Acquire),
            pieces_total: self.pieces_total.load(Ordering::Acquire),
            stop_after_cycle: self.stop_after_cycle(),
            stop_after_piece: self.stop_after_piece(),
            speed_override_pct: self.speed_offset(),
            laser_override_pct: self.laser_offset(),
        }
    }
}

fn step_offset(cell: &AtomicI32, step: i32) -> Option<i32> {
    cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        let next = current + step;
        (OVERRIDE_MIN..=OVERRIDE_MAX).contains(&next).then_some(next)
    })
    .ok()
    .map(|previous| previous + step)
}

/// Snapshot of a run's counters, flags and overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub repeats_target: u32,
    pub repeats_done: u32,
    pub pieces_total: u64,
    pub stop_after_cycle: bool,
    pub stop_after_piece: bool,
    pub speed_override_pct: i32,
    pub laser_override_pct: i32,
}
