//! Ledger reports

use crate::commands::config::CliConfig;
use crate::display::print_totals;
use anyhow::{Result, bail};
use chrono::{Local, TimeZone, Utc};
use clap::Args;
use grbl_tools::{DailyReport, GlobalTotals, Ledger, MIN_SECONDS_PER_PIECE, daily_report};
use serde_json::json;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ReportCommand {
    /// Ledger file (default: config value, then ./stat.txt)
    ledger: Option<PathBuf>,

    /// Ignore cycles faster than this per piece (seconds)
    #[arg(long, default_value_t = MIN_SECONDS_PER_PIECE)]
    min_seconds: f64,

    /// Group days in UTC instead of local time
    #[arg(long)]
    utc: bool,

    /// Machine-readable output
    #[arg(long)]
    json: bool,
}

impl ReportCommand {
    pub fn execute(self) -> Result<()> {
        let path = match self.ledger {
            Some(path) => path,
            None => CliConfig::load()?.ledger_path(),
        };
        let ledger = Ledger::new(path);
        if !ledger.exists() {
            bail!("Ledger {} not found", ledger.path().display());
        }

        let records = ledger.read_all()?;
        let totals = GlobalTotals::from_records(&records);
        let days = if self.utc {
            daily_report(&records, self.min_seconds, &Utc)
        } else {
            daily_report(&records, self.min_seconds, &Local)
        };

        if self.json {
            println!("{}", to_json(&totals, &days)?);
        } else {
            print_totals(&totals);
            println!();
            println!("-------- Pieces per day --------");
            for day in &days {
                println!("{}", format_day(day));
            }
            println!();
            println!("Report generated {}", format_now(&Local));
        }
        Ok(())
    }
}

fn to_json(totals: &GlobalTotals, days: &[DailyReport]) -> Result<String> {
    let days: Vec<_> = days
        .iter()
        .map(|day| {
            let pieces: Vec<_> = day
                .pieces
                .iter()
                .map(|(key, count)| {
                    json!({
                        "operator": key.operator,
                        "program": key.program,
                        "pieces": count,
                    })
                })
                .collect();
            json!({ "date": day.date.to_string(), "pieces": pieces })
        })
        .collect();
    Ok(serde_json::to_string_pretty(
        &json!({ "totals": totals, "days": days }),
    )?)
}

fn format_day(day: &DailyReport) -> String {
    let groups: Vec<String> = day
        .pieces
        .iter()
        .map(|(key, count)| format!("{key}: {count}"))
        .collect();
    format!("{}  {}", day.date, groups.join(", "))
}

fn format_now<Tz: TimeZone>(tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    Utc::now()
        .with_timezone(tz)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
