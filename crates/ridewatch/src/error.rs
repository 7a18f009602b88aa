//! Error types for ridewatch.
//!
//! One taxonomy covers the whole monitor: watcher/permission failures,
//! zone-source failures, lifecycle transition failures, and the usual
//! storage/config/IO plumbing. Nothing here is fatal to the process;
//! every variant is recoverable at the call site.

use std::path::PathBuf;

use thiserror::Error;

use crate::incident::EmergencyStatus;

/// The main error type for ridewatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Location / permission errors ===
    /// Location permission was denied, or has not been granted yet.
    #[error("location permission denied")]
    PermissionDenied,

    /// A permission request is already in flight for this watcher.
    #[error("location permission request already pending")]
    PermissionPending,

    /// The provider could not resolve a position fix.
    #[error("location unavailable: {reason}")]
    LocationUnavailable {
        /// Why the provider could not produce a fix.
        reason: String,
    },

    /// An operation did not complete within its bounded interval.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    // === Zone catalog errors ===
    /// The zone source could not be reached or returned garbage.
    ///
    /// Callers on the evaluation path treat this as fail-open.
    #[error("zone catalog unavailable: {reason}")]
    ZoneCatalogUnavailable {
        /// Why the catalog could not be refreshed.
        reason: String,
    },

    /// A fetched zone document failed validation.
    #[error("invalid zone document: {message}")]
    ZoneDocument {
        /// What was wrong with the document.
        message: String,
    },

    // === Emergency lifecycle errors ===
    /// No emergency record exists with the given id.
    #[error("emergency {id} not found")]
    NotFound {
        /// The id that was looked up.
        id: i64,
    },

    /// The requested status transition is not legal from the current state.
    #[error("emergency {id}: cannot {attempted} while {from}")]
    InvalidTransition {
        /// The record id.
        id: i64,
        /// The status the record currently holds.
        from: EmergencyStatus,
        /// The operation that was rejected.
        attempted: &'static str,
    },

    // === Storage errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O and serialization errors ===
    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request to an external collaborator failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Generic errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for ridewatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a location-unavailable error.
    #[must_use]
    pub fn location_unavailable(reason: impl Into<String>) -> Self {
        Self::LocationUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a zone-catalog-unavailable error.
    #[must_use]
    pub fn catalog_unavailable(reason: impl Into<String>) -> Self {
        Self::ZoneCatalogUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a zone-document error.
    #[must_use]
    pub fn zone_document(message: impl Into<String>) -> Self {
        Self::ZoneDocument {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a permission issue.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::PermissionPending)
    }

    /// Check if this error should fail open on the geofence path.
    ///
    /// Infrastructure failures around the zone check must never raise a
    /// false violation; the detector treats them as "inside".
    #[must_use]
    pub fn is_fail_open(&self) -> bool {
        matches!(
            self,
            Self::ZoneCatalogUnavailable { .. } | Self::Timeout { .. } | Self::Http(_)
        )
    }

    /// Check if this error is a rejected lifecycle transition.
    #[must_use]
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_errors_display() {
        assert_eq!(
            Error::PermissionDenied.to_string(),
            "location permission denied"
        );
        assert!(Error::PermissionPending.to_string().contains("pending"));
    }

    #[test]
    fn test_is_permission_error() {
        assert!(Error::PermissionDenied.is_permission_error());
        assert!(Error::PermissionPending.is_permission_error());
        assert!(!Error::timeout("fix").is_permission_error());
    }

    #[test]
    fn test_location_unavailable_display() {
        let err = Error::location_unavailable("no satellites");
        assert!(err.to_string().contains("no satellites"));
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("current location fix");
        assert!(err.to_string().contains("current location fix"));
    }

    #[test]
    fn test_catalog_unavailable_is_fail_open() {
        assert!(Error::catalog_unavailable("connection refused").is_fail_open());
        assert!(Error::timeout("zone check").is_fail_open());
        assert!(!Error::PermissionDenied.is_fail_open());
        assert!(!Error::NotFound { id: 1 }.is_fail_open());
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound { id: 42 };
        assert_eq!(err.to_string(), "emergency 42 not found");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            id: 7,
            from: EmergencyStatus::Resolved,
            attempted: "resolve",
        };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains("resolve"));
        assert!(msg.contains("resolved"));
        assert!(err.is_invalid_transition());
    }

    #[test]
    fn test_zone_document_display() {
        let err = Error::zone_document("polygon has 2 vertices");
        assert!(err.to_string().contains("polygon has 2 vertices"));
    }

    #[test]
    fn test_internal_display() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_directory_create_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }

    #[test]
    fn test_config_validation_display() {
        let err = Error::ConfigValidation {
            message: "refresh interval must be positive".to_string(),
        };
        assert!(err.to_string().contains("refresh interval"));
    }
}
