//! Aggregate reports over the ledger
//!
//! - [`GlobalTotals`]: sums over every record
//! - [`daily_report`]: pieces per calendar day and per operator+program key, skipping
//!   records whose time per piece is too short to be real production (dry runs, check
//!   mode)

use crate::record::ProductionRecord;
use chrono::{NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Minimum meaningful time per piece (seconds)
pub const MIN_SECONDS_PER_PIECE: f64 = 30.0;

/// Totals over all records
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GlobalTotals {
    pub records: usize,
    pub seconds: i64,
    pub pieces: u64,
    pub x_mm: i64,
    pub y_mm: i64,
    /// Mean power weighted by cycle duration (per mille)
    pub power_permille: u32,
}

impl GlobalTotals {
    pub fn from_records(records: &[ProductionRecord]) -> Self {
        let mut totals = Self::default();
        let mut power_seconds: i128 = 0;

        for record in records {
            let secs = record.duration_secs();
            totals.records += 1;
            totals.seconds += secs;
            totals.pieces += u64::from(record.pieces);
            totals.x_mm += record.x_mm;
            totals.y_mm += record.y_mm;
            power_seconds += i128::from(record.power_permille) * i128::from(secs);
        }

        if totals.seconds > 0 {
            totals.power_permille = (power_seconds / i128::from(totals.seconds)) as u32;
        }
        totals
    }

    /// Whole hours of operation
    pub fn hours(&self) -> i64 {
        self.seconds / 3600
    }

    pub fn x_meters(&self) -> i64 {
        self.x_mm / 1000
    }

    pub fn y_meters(&self) -> i64 {
        self.y_mm / 1000
    }

    /// Mean power in percent
    pub fn power_percent(&self) -> u32 {
        self.power_permille / 10
    }
}

/// Grouping key of the daily report
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReportKey {
    pub operator: Option<String>,
    pub program: String,
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operator {
            Some(op) => write!(f, "{op} {}", self.program),
            None => write!(f, "--- {}", self.program),
        }
    }
}

/// Pieces produced on one calendar day
#[derive(Debug, Clone, PartialEq)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub pieces: BTreeMap<ReportKey, u64>,
}

/// Group records by calendar day (in `tz`) and operator+program key
///
/// Records with no pieces, or with `seconds_per_piece <= min_seconds_per_piece`, are
/// excluded. Days are returned in ascending order.
pub fn daily_report<Tz: TimeZone>(
    records: &[ProductionRecord],
    min_seconds_per_piece: f64,
    tz: &Tz,
) -> Vec<DailyReport> {
    let mut days: BTreeMap<NaiveDate, BTreeMap<ReportKey, u64>> = BTreeMap::new();

    for record in records {
        let Some(per_piece) = record.seconds_per_piece() else {
            continue;
        };
        if per_piece <= min_seconds_per_piece {
            continue;
        }
        let Some(start) = tz.timestamp_opt(record.start, 0).earliest() else {
            continue;
        };

        let key = ReportKey {
            operator: record.operator.clone(),
            program: record.program.clone(),
        };
        *days
            .entry(start.date_naive())
            .or_default()
            .entry(key)
            .or_default() += u64::from(record.pieces);
    }

    days.into_iter()
        .map(|(date, pieces)| DailyReport { date, pieces })
        .collect()
}
