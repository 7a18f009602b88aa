//! `ridewatch` - rider safety monitoring for a ride-sharing platform
//!
//! This library provides continuous device-location tracking, geofence
//! violation detection, and the emergency incident lifecycle from
//! trigger through resolution.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod config;
pub mod detector;
pub mod error;
pub mod geofence;
pub mod incident;
pub mod lifecycle;
pub mod location;
pub mod logging;
pub mod monitor;
pub mod storage;
pub mod watcher;
pub mod zones;

pub use config::Config;
pub use detector::{DetectorSession, GeofenceOracle, ViolationDetector, ViolationEvent};
pub use error::{Error, Result};
pub use geofence::{evaluate, GeofenceStatus};
pub use incident::{Emergency, EmergencyPriority, EmergencyStatus, TriggerCause};
pub use lifecycle::{EmergencyLifecycle, ResponderNotifier};
pub use location::{GeoPoint, LocationProvider, LocationSample};
pub use logging::init_logging;
pub use monitor::SafetyMonitor;
pub use storage::{OpenFilter, Storage};
pub use watcher::{LocationWatcher, PermissionState, WatchError};
pub use zones::{Zone, ZoneCatalog, ZoneGeometry, ZoneSource};
