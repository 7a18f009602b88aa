//! Core location types and the device provider seam.
//!
//! This module defines the coordinate and sample types shared across the
//! monitor, plus the [`LocationProvider`] trait that platform or test
//! providers implement to deliver position updates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// A WGS-84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check that both coordinates are finite and within WGS-84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// A single position fix from the device provider.
///
/// Samples carry the provider's capture timestamp; within one tracking
/// session timestamps must be monotonically non-decreasing, and the
/// watcher discards any sample that arrives out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// The reported position.
    pub point: GeoPoint,

    /// Estimated accuracy radius in metres.
    pub accuracy_m: f64,

    /// When the provider captured this fix.
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    /// Create a sample stamped with the current time.
    #[must_use]
    pub fn new(point: GeoPoint, accuracy_m: f64) -> Self {
        Self {
            point,
            accuracy_m,
            captured_at: Utc::now(),
        }
    }

    /// Create a sample with an explicit capture timestamp.
    #[must_use]
    pub fn at(point: GeoPoint, accuracy_m: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            point,
            accuracy_m,
            captured_at,
        }
    }
}

/// Outcome of a platform permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// The user granted location access.
    Granted,
    /// The user denied location access.
    Denied,
}

/// An update delivered by a streaming location subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderUpdate {
    /// A new position fix.
    Sample(LocationSample),

    /// A transient provider fault. Tracking continues; the provider may
    /// recover on its own.
    Fault(String),

    /// The platform revoked location permission mid-session. The session
    /// cannot continue.
    PermissionRevoked,
}

/// A handle to a live provider subscription.
///
/// The handle carries the stop signal for the provider's streaming task.
/// Stopping is idempotent, and dropping the handle stops the stream, so
/// the subscription is released on every exit path.
#[derive(Debug)]
pub struct ProviderSubscription {
    stopped: Arc<AtomicBool>,
}

impl ProviderSubscription {
    /// Create a new, running subscription handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a clone of the stop flag for the provider's streaming task.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    /// Signal the provider to stop streaming.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Check whether the subscription has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for ProviderSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProviderSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A source of device positions.
///
/// Implementors wrap a platform location service (or a scripted replay)
/// and deliver updates on their own schedule; nothing here polls
/// synchronously on the caller's thread.
#[async_trait::async_trait]
pub trait LocationProvider: Send + Sync {
    /// The name of this provider (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Resolve the platform permission dialog.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform request itself fails; a user
    /// refusal is a normal [`PermissionDecision::Denied`], not an error.
    async fn request_permission(&self) -> Result<PermissionDecision>;

    /// Resolve a single position fix.
    ///
    /// # Errors
    ///
    /// Fails with `LocationUnavailable` if no fix can be produced,
    /// `PermissionDenied` if access is missing, or `Timeout` if the
    /// provider does not respond within `timeout`.
    async fn current_location(&self, timeout: Duration) -> Result<LocationSample>;

    /// Begin streaming position updates into `tx`.
    ///
    /// The provider keeps streaming until the returned subscription is
    /// stopped or the receiver is dropped. Updates must be sent in
    /// capture order.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be established.
    async fn subscribe(&self, tx: mpsc::Sender<ProviderUpdate>) -> Result<ProviderSubscription>;
}

impl std::fmt::Debug for dyn LocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocationProvider({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_display() {
        let p = GeoPoint::new(40.0, -73.0);
        assert_eq!(p.to_string(), "(40.000000, -73.000000)");
    }

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint::new(40.0, -73.0).is_valid());
        assert!(GeoPoint::new(90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(90.5, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_sample_new_stamps_now() {
        let before = Utc::now();
        let sample = LocationSample::new(GeoPoint::new(1.0, 2.0), 15.0);
        let after = Utc::now();
        assert!(sample.captured_at >= before && sample.captured_at <= after);
        assert_eq!(sample.accuracy_m, 15.0);
    }

    #[test]
    fn test_sample_at_keeps_timestamp() {
        let ts = Utc::now() - chrono::Duration::seconds(30);
        let sample = LocationSample::at(GeoPoint::new(1.0, 2.0), 5.0, ts);
        assert_eq!(sample.captured_at, ts);
    }

    #[test]
    fn test_sample_serialization_round_trip() {
        let sample = LocationSample::new(GeoPoint::new(40.0, -73.0), 8.5);
        let json = serde_json::to_string(&sample).unwrap();
        let back: LocationSample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, back);
    }

    #[test]
    fn test_subscription_stop_is_idempotent() {
        let sub = ProviderSubscription::new();
        assert!(!sub.is_stopped());
        sub.stop();
        assert!(sub.is_stopped());
        sub.stop();
        assert!(sub.is_stopped());
    }

    #[test]
    fn test_subscription_stop_flag_is_shared() {
        let sub = ProviderSubscription::new();
        let flag = sub.stop_flag();
        sub.stop();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_subscription_drop_sets_flag() {
        let sub = ProviderSubscription::new();
        let flag = sub.stop_flag();
        drop(sub);
        assert!(flag.load(Ordering::SeqCst));
    }
}
