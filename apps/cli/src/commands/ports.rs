//! Serial port listing

use anyhow::{Context, Result};
use clap::Args;
use grbl_serial::available_ports;

#[derive(Args, Debug)]
pub struct PortsCommand {
    /// Print names only
    #[arg(short, long)]
    quiet: bool,
}

impl PortsCommand {
    pub fn execute(self) -> Result<()> {
        let ports = available_ports().context("Failed to enumerate serial ports")?;
        if ports.is_empty() && !self.quiet {
            println!("No serial ports found");
        }
        for port in ports {
            if self.quiet {
                println!("{}", port.name);
            } else {
                println!("{:<24}{}", port.name, port.description);
            }
        }
        Ok(())
    }
}
