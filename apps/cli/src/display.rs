//! Terminal output: totals, the live progress line, alerts and cycle summaries

use grbl_driver::{AlertKind, CycleObserver, CycleSummary, Progress};
use grbl_protocol::ControllerError;
use grbl_tools::GlobalTotals;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub fn print_totals(totals: &GlobalTotals) {
    println!("-------- Global statistics --------");
    println!("Hours of operation:   {} h", totals.hours());
    println!("Pieces produced:      {}", totals.pieces);
    println!("X travel:             {} m", totals.x_meters());
    println!("Y travel:             {} m", totals.y_meters());
    println!("Mean laser power:     {} %", totals.power_percent());
}

/// Audible signal: an external player when configured, the terminal bell otherwise
#[derive(Debug, Clone, Default)]
pub struct Alerter {
    player: Option<String>,
    sound: Option<PathBuf>,
}

impl Alerter {
    pub fn new(player: Option<String>, sound: Option<PathBuf>) -> Self {
        Self { player, sound }
    }

    /// Fire and forget; never blocks the stream
    pub fn play(&self) {
        if self.spawn_player().is_some() {
            return;
        }
        print!("\x07");
        let _ = io::stdout().flush();
    }

    /// Start the configured player and reap it from a background thread
    fn spawn_player(&self) -> Option<JoinHandle<()>> {
        let (player, sound) = (self.player.as_ref()?, self.sound.as_ref()?);
        let mut child = Command::new(player)
            .arg(sound)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .inspect_err(|e| warn!("Alert player {} failed: {}", player, e))
            .ok()?;

        let player = player.clone();
        thread::Builder::new()
            .name("alert".into())
            .spawn(move || match child.wait() {
                Ok(status) if !status.success() => {
                    debug!("Alert player {} exited with {}", player, status)
                },
                Ok(_) => {},
                Err(e) => warn!("Alert player {} could not be reaped: {}", player, e),
            })
            .inspect_err(|e| warn!("Failed to spawn alert thread: {}", e))
            .ok()
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

pub fn format_progress(p: &Progress) -> String {
    let mut line = format!(
        "Cycle {}/{} | line {}/{} {:>3}% | pieces {} (total {})",
        p.cycle, p.repeats, p.line, p.total_lines, p.percent, p.pieces_cycle, p.pieces_total
    );
    if let Some(state) = &p.state {
        line.push_str(&format!(" | {state}"));
    }
    if let Some(pos) = &p.position {
        line.push_str(&format!(" X{:.1} Y{:.1}", pos.x, pos.y));
    }
    if let Some(msg) = &p.message {
        line.push_str(&format!(" | {msg}"));
    }
    line
}

pub fn format_summary(s: &CycleSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Cycle {}/{} done: {} pieces ({} total) in {}",
        s.repeats_done,
        s.repeats_target,
        s.pieces_cycle,
        s.pieces_total,
        format_duration(s.cycle_time)
    )];
    if let Some(per_piece) = s.seconds_per_piece {
        lines.push(format!("  {per_piece} s per piece"));
    }
    lines.push(format!("  program time {}", format_duration(s.program_time)));
    if s.error_count > 0 {
        lines.push(format!("  {} controller errors", s.error_count));
    }
    if s.halted {
        lines.push("  stopped after piece on request".to_string());
    }
    lines
}

/// Draws a single self-overwriting progress line on stdout
pub struct TerminalObserver {
    alerter: Alerter,
    /// Width of the last progress line, to blank leftovers
    drawn: usize,
}

impl TerminalObserver {
    pub fn new(alerter: Alerter) -> Self {
        Self { alerter, drawn: 0 }
    }

    fn end_line(&mut self) {
        if self.drawn > 0 {
            println!();
            self.drawn = 0;
        }
    }
}

impl CycleObserver for TerminalObserver {
    fn progress(&mut self, progress: &Progress) {
        let line = format_progress(progress);
        let pad = self.drawn.saturating_sub(line.len());
        print!("\r{line}{:pad$}", "");
        let _ = io::stdout().flush();
        self.drawn = line.len();
    }

    fn controller_error(&mut self, line: Option<usize>, error: &ControllerError) {
        self.end_line();
        match line {
            Some(line) => println!("Line {line}: {error}"),
            None => println!("{error}"),
        }
    }

    fn alert(&mut self, _kind: AlertKind) {
        self.alerter.play();
    }

    fn cycle_finished(&mut self, summary: &CycleSummary) {
        self.end_line();
        for line in format_summary(summary) {
            println!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grbl_protocol::{MachineState, WorkPosition};

    #[cfg(unix)]
    #[test]
    fn test_alert_player_is_reaped() {
        let alerter = Alerter::new(Some("true".into()), Some(PathBuf::from("done.wav")));
        let reaper = alerter.spawn_player().unwrap();
        reaper.join().unwrap();
    }

    #[test]
    fn test_alert_falls_back_without_player() {
        assert!(Alerter::default().spawn_player().is_none());
        let missing = Alerter::new(
            Some("no-such-alert-player".into()),
            Some(PathBuf::from("done.wav")),
        );
        assert!(missing.spawn_player().is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:00:59");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_format_progress() {
        let progress = Progress {
            cycle: 2,
            repeats: 5,
            line: 30,
            total_lines: 120,
            percent: 25,
            pieces_cycle: 1,
            pieces_total: 9,
            state: Some(MachineState::Run),
            position: Some(WorkPosition { x: 12.3, y: 600.0 }),
            message: None,
        };
        assert_eq!(
            format_progress(&progress),
            "Cycle 2/5 | line 30/120  25% | pieces 1 (total 9) | Run X12.3 Y600.0"
        );
    }

    #[test]
    fn test_format_summary() {
        let summary = CycleSummary {
            repeats_done: 1,
            repeats_target: 3,
            pieces_cycle: 4,
            pieces_total: 4,
            cycle_time: Duration::from_secs(130),
            program_time: Duration::from_secs(130),
            seconds_per_piece: Some(33),
            error_count: 0,
            halted: false,
        };
        let lines = format_summary(&summary);
        assert_eq!(lines[0], "Cycle 1/3 done: 4 pieces (4 total) in 0:02:10");
        assert_eq!(lines[1], "  33 s per piece");
        assert_eq!(lines.len(), 3);
    }
}
