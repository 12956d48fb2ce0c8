//! `stream` command: run a program on the machine

use crate::commands::config::CliConfig;
use crate::console::{self, Interrupt};
use crate::display::{Alerter, TerminalObserver, print_totals};
use anyhow::{Context, Result, bail};
use clap::Args;
use grbl_driver::{
    DEFAULT_PIECE_DISTANCE, ExecutorConfig, GrblLink, JobConfig, JobRunner, LinkConfig,
    OverrideController, PollerConfig, StreamMode,
};
use grbl_protocol::Substitution;
use grbl_serial::{DEFAULT_BAUD_RATE, SerialPortAdapter, available_ports};
use grbl_tools::{GlobalTotals, Ledger};
use inquire::InquireError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct StreamCommand {
    /// G-code file to stream
    file: PathBuf,

    /// Serial device (default: config value, then the first port found)
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    /// Simple (call-response) streaming instead of buffered
    #[arg(short, long)]
    simple: bool,

    /// Run in check mode ($C), no motion
    #[arg(short, long)]
    check: bool,

    /// Number of cycles
    #[arg(short, long, default_value_t = 1)]
    repeats: u32,

    /// Minimum Y travel between pieces (mm)
    #[arg(short = 'd', long)]
    piece_distance: Option<f64>,

    /// Alert once per cycle when Y passes this position (mm)
    #[arg(short = 'y', long)]
    y_alert: Option<f64>,

    /// Replace the laser power of cutting moves (percent)
    #[arg(short, long)]
    laser: Option<u32>,

    /// Replace the feed of cutting moves (mm/min)
    #[arg(short = 'f', long)]
    speed: Option<u32>,

    /// Home before the first cycle
    #[arg(long)]
    home: bool,

    /// Home after every N cycles instead of returning to start
    #[arg(short = 'x', long, default_value_t = 0)]
    home_every: u32,

    /// Operator id (prompted when omitted)
    #[arg(short, long)]
    operator: Option<String>,

    /// Do not prompt for an operator id
    #[arg(long)]
    anonymous: bool,

    /// Status report interval (seconds)
    #[arg(short, long)]
    interval: Option<f64>,

    /// Production ledger (default: config value, then ./stat.txt)
    #[arg(long)]
    ledger: Option<PathBuf>,
}

/// Replace every whitespace run with `_`
fn underscore_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Ledger name of a program file: file name only, whitespace runs replaced
pub fn program_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let name = underscore_whitespace(&name);
    (!name.is_empty()).then_some(name)
}

/// Upper-cased, whitespace runs replaced; empty means no operator
pub fn normalize_operator(raw: &str) -> Option<String> {
    let id = underscore_whitespace(raw).to_uppercase();
    (!id.is_empty()).then_some(id)
}

fn prompt_operator() -> Result<Option<String>> {
    match inquire::Text::new("Operator ID (Enter for none):").prompt() {
        Ok(answer) => Ok(normalize_operator(&answer)),
        Err(InquireError::NotTTY) => {
            warn!("No terminal to ask for an operator id; running anonymously");
            Ok(None)
        },
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
            bail!("Cancelled")
        },
        Err(e) => Err(e).context("Operator prompt failed"),
    }
}

fn resolve_port(arg: Option<String>, config: &CliConfig) -> Result<String> {
    if let Some(port) = arg.or_else(|| config.port.clone()) {
        return Ok(port);
    }
    let ports = available_ports().context("Failed to enumerate serial ports")?;
    match ports.into_iter().next() {
        Some(port) => {
            info!("Using {} ({})", port.name, port.description);
            Ok(port.name)
        },
        None => bail!("No serial port found; pass --port or set one with `config set --port`"),
    }
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid {what} {value}"))
}

impl StreamCommand {
    fn job_config(
        &self,
        config: &CliConfig,
        program_name: String,
        operator: Option<String>,
    ) -> Result<JobConfig> {
        let interval = match self.interval.or(config.report_interval) {
            Some(secs) => seconds(secs, "report interval")?,
            None => PollerConfig::default().interval,
        };

        Ok(JobConfig {
            program_name,
            operator,
            repeats: self.repeats,
            check_mode: self.check,
            home: self.home,
            home_every: self.home_every,
            executor: ExecutorConfig {
                mode: if self.simple {
                    StreamMode::Simple
                } else {
                    StreamMode::Buffered
                },
                piece_distance: self
                    .piece_distance
                    .or(config.piece_distance)
                    .unwrap_or(DEFAULT_PIECE_DISTANCE),
                y_alert: self.y_alert,
                substitution: Substitution {
                    laser_pct: self.laser,
                    speed: self.speed,
                },
                ..ExecutorConfig::default()
            },
            poller: PollerConfig { interval },
        })
    }

    pub fn execute(self) -> Result<()> {
        let config = CliConfig::load()?;

        let text = fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let program: Vec<String> = text.lines().map(str::to_string).collect();
        let name = program_name(&self.file)
            .with_context(|| format!("No file name in {}", self.file.display()))?;

        let operator = match (&self.operator, self.anonymous) {
            (Some(raw), _) => normalize_operator(raw),
            (None, true) => None,
            (None, false) => prompt_operator()?,
        };

        let job = self.job_config(&config, name, operator)?;
        job.validate()?;

        let ledger = Ledger::new(self.ledger.clone().unwrap_or_else(|| config.ledger_path()));
        if ledger.exists() {
            let records = ledger.read_all()?;
            print_totals(&GlobalTotals::from_records(&records));
            println!();
        }

        println!("Program:       {} ({} lines)", job.program_name, program.len());
        println!("Operator:      {}", job.operator.as_deref().unwrap_or("---"));
        let check = if job.check_mode { ", check" } else { "" };
        println!("Mode:          {}{}", job.executor.mode, check);
        println!("Cycles:        {}", job.repeats);
        println!("Piece spacing: {} mm", job.executor.piece_distance);
        if let Some(y) = job.executor.y_alert {
            println!("Y alert:       {y} mm");
        }
        if let Some(pct) = job.executor.substitution.laser_pct {
            println!("Laser power:   {pct} %");
        }
        if let Some(speed) = job.executor.substitution.speed {
            println!("Speed:         {speed} mm/min");
        }

        let port = resolve_port(self.port.clone(), &config)?;
        let baud = self.baud.or(config.baud).unwrap_or(DEFAULT_BAUD_RATE);
        let link_config = LinkConfig::default();
        let adapter = SerialPortAdapter::open(&port, baud, link_config.poll_timeout)
            .with_context(|| format!("Failed to open {port}"))?;

        println!("Connecting to {port} at {baud} baud...");
        let mut link = GrblLink::connect(adapter, link_config)?;
        println!("{}", link.banner().unwrap_or("Grbl"));

        let runner = JobRunner::new(job, Some(ledger))?;
        let interrupt = Interrupt::new(runner.control(), link.writer());
        interrupt.install()?;
        console::spawn(
            OverrideController::new(runner.control(), link.writer()),
            interrupt,
        )?;
        println!("Type 'help' for operator commands");

        let mut observer = TerminalObserver::new(Alerter::new(
            config.alert_player.clone(),
            config.alert_sound.clone(),
        ));
        let report = runner.run(&mut link, &program, &mut observer)?;

        println!();
        if report.resumed.is_resumed() {
            println!("Continued after {} earlier cycles", report.resumed.repeats_done);
        }
        let stopped = if report.stopped_by_request {
            " (stopped on request)"
        } else {
            ""
        };
        println!(
            "Finished {}/{} cycles, {} pieces{}",
            report.repeats_done,
            runner.config().repeats,
            report.pieces_total,
            stopped
        );
        Ok(())
    }
}
