//! Resume an interrupted multi-cycle job
//!
//! At run start the ledger is scanned newest-first. Records of other operators are
//! skipped (operators share one ledger). A record of the current operator continues the
//! run when it is for the same program and ended less than `window` before the run's
//! logical start; the logical start then moves back to that record's start, so a chain of
//! back-to-back cycles is picked up as a whole. The first record of the current operator
//! that does not continue the chain ends the scan.

use crate::record::ProductionRecord;
use std::time::Duration;
use tracing::debug;

/// Staleness window for multi-cycle runs
pub const RESUME_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Resume window for a run of `repeats` cycles; zero (resume disabled) for single runs
pub fn resume_window(repeats: u32) -> Duration {
    if repeats > 1 {
        RESUME_WINDOW
    } else {
        Duration::ZERO
    }
}

/// Counters carried over from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeState {
    pub repeats_done: u32,
    pub pieces_total: u64,
    /// Logical run start (unix seconds): `now` when nothing was resumed
    pub start: i64,
}

impl ResumeState {
    pub fn fresh(now: i64) -> Self {
        Self {
            repeats_done: 0,
            pieces_total: 0,
            start: now,
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.repeats_done > 0
    }
}

/// Scan `records` (file order, oldest first) for a run to continue
pub fn resume(
    records: &[ProductionRecord],
    operator: Option<&str>,
    program: &str,
    now: i64,
    window: Duration,
) -> ResumeState {
    let mut state = ResumeState::fresh(now);
    let window = window.as_secs() as i64;

    for record in records.iter().rev() {
        if !record.is_operator(operator) {
            continue;
        }
        if record.program != program || record.end <= state.start - window {
            break;
        }
        state.repeats_done += 1;
        state.pieces_total += u64::from(record.pieces);
        state.start = record.start;
    }

    if state.is_resumed() {
        debug!(
            "Resuming {}: {} cycles, {} pieces since {}",
            program, state.repeats_done, state.pieces_total, state.start
        );
    }
    state
}
