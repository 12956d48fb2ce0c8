//! # grbl-stream
//!
//! Streams g-code programs to a Grbl laser machine and keeps the production ledger.
//!
//! ```bash
//! # remember the port once
//! grbl-stream config set --port /dev/ttyUSB0
//!
//! # cut a panel 20 times, homing every 5 cycles
//! grbl-stream stream panel.nc -r 20 -x 5
//!
//! # production totals and pieces per day
//! grbl-stream report
//! ```
//!
//! While a job runs the operator console accepts override commands (`hold`, `resume`,
//! `speed +10`, `laser -1`, `last-piece`, ...). Ctrl-C once stops after the current
//! piece; twice stops the machine immediately.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

mod commands;
mod console;
mod display;

use commands::{ConfigCommand, PortsCommand, ReportCommand, StreamCommand};

/// grbl-stream - g-code streamer for Grbl laser machines
#[derive(Parser, Debug)]
#[command(name = "grbl-stream")]
#[command(about = "Stream g-code to Grbl with production accounting", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging for the streaming crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a g-code file
    Stream {
        #[command(flatten)]
        args: StreamCommand,
    },

    /// Print ledger totals and pieces per day
    Report {
        #[command(flatten)]
        args: ReportCommand,
    },

    /// Manage defaults
    #[command(subcommand)]
    Config(ConfigCommand),

    /// List serial ports
    Ports {
        #[command(flatten)]
        args: PortsCommand,
    },
}

fn init_logging(verbose: bool) {
    let directives: &[&str] = if verbose {
        &["grbl_stream=debug", "grbl_driver=debug", "grbl_serial=debug", "grbl_tools=debug"]
    } else {
        &["grbl_stream=info", "grbl_driver=info"]
    };

    let mut filter = EnvFilter::from_default_env();
    for directive in directives {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Stream { args } => args.execute(),
        Commands::Report { args } => args.execute(),
        Commands::Config(cmd) => cmd.execute(),
        Commands::Ports { args } => args.execute(),
    }
}
