//! # Grbl Tools
//!
//! Persisted production data, independent of any hardware link.
//!
//! ## Modules
//!
//! - `record` - one completed cycle, ledger line format
//! - `ledger` - append-only ledger file
//! - `resume` - continue counters of an interrupted multi-cycle job
//! - `report` - global totals and per-day grouped report

pub mod ledger;
pub mod record;
pub mod report;
pub mod resume;

pub use ledger::Ledger;
pub use record::ProductionRecord;
pub use report::{DailyReport, GlobalTotals, MIN_SECONDS_PER_PIECE, ReportKey, daily_report};
pub use resume::{RESUME_WINDOW, ResumeState, resume, resume_window};
