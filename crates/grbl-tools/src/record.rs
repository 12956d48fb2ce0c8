//! Production record
//!
//! Ledger line format, whitespace separated:
//!
//! ```text
//! start_unix end_unix program pieces x_mm y_mm power_permille [operator]
//! ```
//!
//! The operator column is absent in older and check-mode records.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One completed cycle; immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionRecord {
    /// Cycle start (unix seconds)
    pub start: i64,
    /// Cycle end (unix seconds)
    pub end: i64,
    /// Program name, no whitespace
    pub program: String,
    pub pieces: u32,
    pub x_mm: i64,
    pub y_mm: i64,
    /// Average laser power over the travelled distance (per mille)
    pub power_permille: u32,
    pub operator: Option<String>,
}

impl ProductionRecord {
    /// Cycle duration in seconds (never negative)
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    /// Seconds per piece; `None` when the cycle produced nothing
    pub fn seconds_per_piece(&self) -> Option<f64> {
        (self.pieces > 0).then(|| self.duration_secs() as f64 / self.pieces as f64)
    }

    /// Whether this record belongs to `operator` (`None` = anonymous)
    pub fn is_operator(&self, operator: Option<&str>) -> bool {
        self.operator.as_deref() == operator
    }
}

impl fmt::Display for ProductionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.start,
            self.end,
            self.program,
            self.pieces,
            self.x_mm,
            self.y_mm,
            self.power_permille
        )?;
        if let Some(op) = &self.operator {
            write!(f, " {op}")?;
        }
        Ok(())
    }
}

impl FromStr for ProductionRecord {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            bail!("expected at least 7 fields, found {}", fields.len());
        }

        Ok(Self {
            start: fields[0].parse().context("start time")?,
            end: fields[1].parse().context("end time")?,
            program: fields[2].to_string(),
            pieces: fields[3].parse().context("pieces")?,
            x_mm: fields[4].parse().context("x distance")?,
            y_mm: fields[5].parse().context("y distance")?,
            power_permille: fields[6].parse().context("power")?,
            operator: fields.get(7).map(|s| s.to_string()),
        })
    }
}
