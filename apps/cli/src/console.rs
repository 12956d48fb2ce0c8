//! Operator console and Ctrl-C handling
//!
//! The console runs on a dedicated input thread that owns the `rustyline` editor for the
//! whole job. Each line is parsed into an [`OverrideCommand`] and applied directly; the
//! streaming thread never waits on the keyboard.

use anyhow::Result;
use grbl_driver::{
    LinkWriter, OverrideCommand, OverrideController, OverrideOutcome, RunControl, RunState,
};
use grbl_protocol::RealtimeCommand;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use tracing::{debug, error, warn};

/// Exit status after an emergency stop
pub const EXIT_ABORTED: i32 = 130;

const HELP: &str = "\
hold | resume | reset
speed +10|-10|+1|-1|0    feed override step (0 resets)
laser +10|-10|+1|-1|0    laser power override step (0 resets)
last-cycle               toggle stop after this cycle
last-piece               toggle stop after this piece
status                   show counters and overrides";

/// Two-stage interrupt: the first press stops after the current piece, the second stops
/// the machine and exits
#[derive(Clone)]
pub struct Interrupt {
    presses: Arc<AtomicU8>,
    control: Arc<RunControl>,
    writer: LinkWriter,
}

impl Interrupt {
    pub fn new(control: Arc<RunControl>, writer: LinkWriter) -> Self {
        Self {
            presses: Arc::new(AtomicU8::new(0)),
            control,
            writer,
        }
    }

    /// Install as the process Ctrl-C handler
    pub fn install(&self) -> Result<()> {
        let this = self.clone();
        ctrlc::set_handler(move || this.fire())?;
        Ok(())
    }

    pub fn fire(&self) {
        if self.presses.fetch_add(1, Ordering::AcqRel) == 0 {
            self.control.set_stop_after_piece(true);
            eprintln!("\nStopping after the current piece (Ctrl-C again to stop now)");
            return;
        }

        eprintln!("\nEmergency stop");
        for cmd in [RealtimeCommand::FeedHold, RealtimeCommand::SoftReset] {
            if let Err(e) = self.writer.realtime(cmd) {
                error!("Failed to send {:?}: {}", cmd, e);
            }
        }
        // let the writer thread flush both bytes
        thread::sleep(std::time::Duration::from_millis(100));
        process::exit(EXIT_ABORTED);
    }
}

pub fn format_state(state: &RunState) -> String {
    format!(
        "cycles {}/{} | pieces {} | speed {:+}% | laser {:+}% | last-cycle {} | last-piece {}",
        state.repeats_done,
        state.repeats_target,
        state.pieces_total,
        state.speed_override_pct,
        state.laser_override_pct,
        on_off(state.stop_after_cycle),
        on_off(state.stop_after_piece),
    )
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

/// Handle one console line; returns the text to show the operator
pub fn handle_line(controller: &OverrideController, line: &str) -> String {
    match line {
        "help" | "?" => return HELP.to_string(),
        "status" => return format_state(&controller.state()),
        _ => {},
    }

    let cmd = match line.parse::<OverrideCommand>() {
        Ok(cmd) => cmd,
        Err(e) => return format!("{e} (type 'help')"),
    };
    match controller.apply(cmd) {
        Ok(OverrideOutcome::Applied(state)) => format!("{cmd}: {}", format_state(&state)),
        Ok(OverrideOutcome::Refused) => format!("{cmd}: refused (outside -90..=+100%)"),
        Err(e) => format!("{cmd}: {e}"),
    }
}

/// Start the console thread; it ends at end of input or when the link goes away
pub fn spawn(controller: OverrideController, interrupt: Interrupt) -> Result<()> {
    thread::Builder::new()
        .name("grbl-console".into())
        .spawn(move || {
            let mut rl = match DefaultEditor::new() {
                Ok(rl) => rl,
                Err(e) => {
                    warn!("Operator console unavailable: {}", e);
                    return;
                },
            };

            loop {
                match rl.readline("> ") {
                    Ok(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let _ = rl.add_history_entry(line);
                        println!("{}", handle_line(&controller, line));
                    },
                    // raw mode swallows SIGINT
                    Err(ReadlineError::Interrupted) => interrupt.fire(),
                    Err(ReadlineError::Eof) => break,
                    Err(e) => {
                        warn!("Console input failed: {}", e);
                        break;
                    },
                }
            }
            debug!("Operator console closed");
        })?;
    Ok(())
}
