//! Emergency incident types.
//!
//! An [`Emergency`] is a tracked safety incident with a status lifecycle
//! from trigger to resolution: `Active -> InProgress -> Resolved`, with
//! `Resolved` terminal. The lifecycle store owns these records
//! end-to-end; everything else only raises trigger requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::location::GeoPoint;

/// Status of an emergency incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyStatus {
    /// Triggered and awaiting a responder.
    Active,
    /// A responder has acknowledged the incident.
    InProgress,
    /// Closed. Terminal; the record never mutates again.
    Resolved,
}

impl EmergencyStatus {
    /// Check whether this status counts as open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::InProgress)
    }

    /// Parse a status from its storage form.
    ///
    /// # Errors
    ///
    /// Returns an internal error for unrecognized values.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            other => Err(Error::internal(format!("unknown emergency status: {other}"))),
        }
    }
}

impl std::fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Priority of an emergency incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyPriority {
    /// Informational.
    Low,
    /// Needs attention.
    Medium,
    /// Needs prompt attention.
    High,
    /// Drop everything.
    Critical,
}

impl EmergencyPriority {
    /// Parse a priority from its storage form.
    ///
    /// # Errors
    ///
    /// Returns an internal error for unrecognized values.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::internal(format!(
                "unknown emergency priority: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for EmergencyPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What raised the incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCause {
    /// The rider pressed the panic button.
    Manual,
    /// The violation detector observed the rider leave the allowed area.
    GeofenceViolation,
}

impl TriggerCause {
    /// Parse a cause from its storage form.
    ///
    /// # Errors
    ///
    /// Returns an internal error for unrecognized values.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "manual" => Ok(Self::Manual),
            "geofence_violation" => Ok(Self::GeofenceViolation),
            other => Err(Error::internal(format!("unknown trigger cause: {other}"))),
        }
    }

    /// Default priority when the caller does not pick one.
    ///
    /// Automatic geofence triggers land at High; Critical is reserved
    /// for a deliberate panic press (see DESIGN.md on coordinate trust).
    #[must_use]
    pub fn default_priority(&self) -> EmergencyPriority {
        match self {
            Self::Manual => EmergencyPriority::Critical,
            Self::GeofenceViolation => EmergencyPriority::High,
        }
    }
}

impl std::fmt::Display for TriggerCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::GeofenceViolation => write!(f, "geofence_violation"),
        }
    }
}

/// A tracked safety incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emergency {
    /// Unique identifier (assigned by the storage layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// The rider this incident belongs to.
    pub user: String,

    /// Where the incident was triggered.
    pub location: GeoPoint,

    /// Current lifecycle status.
    pub status: EmergencyStatus,

    /// Dispatch priority.
    pub priority: EmergencyPriority,

    /// What raised the incident.
    pub cause: TriggerCause,

    /// When the incident was triggered. Set at creation, immutable.
    pub triggered_at: DateTime<Utc>,

    /// When the incident was resolved; `None` until then.
    pub resolved_at: Option<DateTime<Utc>>,

    /// Whether the responder-notification collaborator was invoked.
    pub responder_notified: bool,
}

impl Emergency {
    /// Create a new incident in `Active`, triggered now.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        location: GeoPoint,
        cause: TriggerCause,
        priority: EmergencyPriority,
    ) -> Self {
        Self {
            id: None,
            user: user.into(),
            location,
            status: EmergencyStatus::Active,
            priority,
            cause,
            triggered_at: Utc::now(),
            resolved_at: None,
            responder_notified: false,
        }
    }

    /// Check whether this incident is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}
