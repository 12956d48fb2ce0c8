//! Subcommands

pub mod config;
pub mod ports;
pub mod report;
pub mod stream;

pub use config::ConfigCommand;
pub use ports::PortsCommand;
pub use report::ReportCommand;
pub use stream::StreamCommand;
