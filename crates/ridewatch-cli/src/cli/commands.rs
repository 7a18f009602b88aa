//! CLI command definitions.

use std::path::PathBuf;

use clap::{Subcommand, ValueEnum};

use ridewatch::EmergencyPriority;

/// Monitor commands.
#[derive(Debug, Subcommand)]
pub enum MonitorCommand {
    /// Run the safety monitor against a replayed route
    Run {
        /// Rider identifier to attribute incidents to
        #[arg(short, long, default_value = "rider-demo")]
        user: String,

        /// Path to a replay route script (JSON); a built-in demo route
        /// is used when omitted
        #[arg(short, long)]
        route: Option<PathBuf>,
    },
}

/// Incident management commands.
#[derive(Debug, Subcommand)]
pub enum IncidentsCommand {
    /// Trigger a manual emergency (panic button)
    Trigger {
        /// Rider identifier
        #[arg(short, long)]
        user: String,

        /// Trigger latitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Trigger longitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Dispatch priority; defaults to critical for manual triggers
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,
    },

    /// List open incidents, most recent first
    List {
        /// Filter by rider
        #[arg(short, long)]
        user: Option<String>,

        /// Filter by priority
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Acknowledge an incident (active -> in progress)
    Ack {
        /// The incident id
        id: i64,
    },

    /// Resolve an incident
    Resolve {
        /// The incident id
        id: i64,
    },

    /// Resolve every open incident older than the stale cutoff
    Sweep {
        /// Override the configured stale age, in hours
        #[arg(long)]
        older_than_hours: Option<u32>,
    },

    /// Show store statistics
    Stats,
}

/// Zone catalog commands.
#[derive(Debug, Subcommand)]
pub enum ZonesCommand {
    /// Fetch and display the allowed-zones catalog
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Priority argument for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    /// Informational
    Low,
    /// Needs attention
    Medium,
    /// Needs prompt attention
    High,
    /// Drop everything
    Critical,
}

impl From<PriorityArg> for EmergencyPriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Self::Low,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::High => Self::High,
            PriorityArg::Critical => Self::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_arg_conversion() {
        assert_eq!(
            EmergencyPriority::from(PriorityArg::Low),
            EmergencyPriority::Low
        );
        assert_eq!(
            EmergencyPriority::from(PriorityArg::Medium),
            EmergencyPriority::Medium
        );
        assert_eq!(
            EmergencyPriority::from(PriorityArg::High),
            EmergencyPriority::High
        );
        assert_eq!(
            EmergencyPriority::from(PriorityArg::Critical),
            EmergencyPriority::Critical
        );
    }

    #[test]
    fn test_commands_debug() {
        let cmd = IncidentsCommand::Ack { id: 1 };
        assert!(format!("{cmd:?}").contains("Ack"));

        let cmd = ZonesCommand::Show { json: true };
        assert!(format!("{cmd:?}").contains("Show"));
    }
}
