//! Command-line interface structure for the `ridewatch` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, IncidentsCommand, MonitorCommand, PriorityArg, ZonesCommand,
};

/// ridewatch - rider safety monitoring
///
/// Tracks device location against allowed-operation zones and manages
/// the emergency incident lifecycle from trigger through resolution.
#[derive(Debug, Parser)]
#[command(name = "ridewatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the safety monitor
    #[command(subcommand)]
    Monitor(MonitorCommand),

    /// Inspect and manage emergency incidents
    #[command(subcommand)]
    Incidents(IncidentsCommand),

    /// Inspect the allowed-zones catalog
    #[command(subcommand)]
    Zones(ZonesCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> ridewatch::logging::Verbosity {
        if self.quiet {
            ridewatch::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => ridewatch::logging::Verbosity::Normal,
                1 => ridewatch::logging::Verbosity::Verbose,
                _ => ridewatch::logging::Verbosity::Trace,
            }
        }
    }
}
