//! Persistent defaults
//!
//! Stored as TOML in the platform config directory (`<config_dir>/grbl-stream/config.toml`);
//! `GRBL_STREAM_CONFIG` points to another file. Command-line flags override file values.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Overrides the config file location
pub const CONFIG_ENV: &str = "GRBL_STREAM_CONFIG";

/// Ledger used when neither the flag nor the config names one
pub const DEFAULT_LEDGER: &str = "stat.txt";

fn config_file() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let mut path = dirs::config_dir().context("Cannot determine the config directory")?;
    path.push("grbl-stream");
    path.push("config.toml");
    Ok(path)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: Option<String>,
    pub baud: Option<u32>,
    /// Production ledger file
    pub ledger: Option<PathBuf>,
    /// Minimum Y travel between pieces (mm)
    pub piece_distance: Option<f64>,
    /// Status report interval (seconds)
    pub report_interval: Option<f64>,
    /// Program that plays the alert sound (e.g. `aplay`)
    pub alert_player: Option<String>,
    pub alert_sound: Option<PathBuf>,
}

impl CliConfig {
    /// Missing file reads as defaults
    pub fn load() -> Result<Self> {
        let path = config_file()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = config_file()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create the config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = match key {
            "port" => self.port.clone(),
            "baud" => self.baud.map(|v| v.to_string()),
            "ledger" => self.ledger.as_ref().map(|p| p.display().to_string()),
            "piece-distance" => self.piece_distance.map(|v| v.to_string()),
            "report-interval" => self.report_interval.map(|v| v.to_string()),
            "alert-player" => self.alert_player.clone(),
            "alert-sound" => self.alert_sound.as_ref().map(|p| p.display().to_string()),
            other => bail!("Unknown config key {other:?}"),
        };
        Ok(value)
    }
}

const KEYS: [&str; 7] = [
    "port",
    "baud",
    "ledger",
    "piece-distance",
    "report-interval",
    "alert-player",
    "alert-sound",
];

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set one or more defaults
    Set {
        #[arg(short, long)]
        port: Option<String>,

        #[arg(short, long)]
        baud: Option<u32>,

        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Minimum Y travel between pieces (mm)
        #[arg(short = 'd', long)]
        piece_distance: Option<f64>,

        /// Status report interval (seconds, at least 0.2)
        #[arg(short = 'i', long)]
        report_interval: Option<f64>,

        #[arg(long)]
        alert_player: Option<String>,

        #[arg(long)]
        alert_sound: Option<PathBuf>,
    },

    /// Print a default (or all of them)
    Get {
        #[arg(default_value = "all")]
        key: String,
    },

    /// Print the config file location
    Path,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Set {
                port,
                baud,
                ledger,
                piece_distance,
                report_interval,
                alert_player,
                alert_sound,
            } => {
                let mut config = CliConfig::load()?;
                if let Some(interval) = report_interval
                    && interval < 0.2
                {
                    bail!("Report interval must be at least 0.2 s");
                }
                if let Some(distance) = piece_distance
                    && !(distance.is_finite() && distance > 0.0)
                {
                    bail!("Piece distance must be a positive number");
                }

                config.port = port.or(config.port);
                config.baud = baud.or(config.baud);
                config.ledger = ledger.or(config.ledger);
                config.piece_distance = piece_distance.or(config.piece_distance);
                config.report_interval = report_interval.or(config.report_interval);
                config.alert_player = alert_player.or(config.alert_player);
                config.alert_sound = alert_sound.or(config.alert_sound);

                let path = config.save()?;
                println!("Saved {}", path.display());
                Ok(())
            },

            ConfigCommand::Get { key } => {
                let config = CliConfig::load()?;
                if key == "all" {
                    for key in KEYS {
                        let value = config.get(key)?;
                        println!("{key:<16}{}", value.as_deref().unwrap_or("(unset)"));
                    }
                } else {
                    println!("{}", config.get(&key)?.as_deref().unwrap_or("(unset)"));
                }
                Ok(())
            },

            ConfigCommand::Path => {
                println!("{}", config_file()?.display());
                Ok(())
            },
        }
    }
}
