//! Scripted location provider for ridewatch.
//!
//! Replays a pre-programmed route, including injectable provider faults
//! and a mid-session permission revocation, against the same
//! [`LocationProvider`] seam a platform provider would implement. Used
//! by the `monitor run` demo and by tests that need a deterministic
//! position stream.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use ridewatch::error::{Error, Result};
use ridewatch::location::{
    GeoPoint, LocationProvider, LocationSample, PermissionDecision, ProviderSubscription,
    ProviderUpdate,
};

/// Default pause after each step, in milliseconds.
const DEFAULT_HOLD_MS: u64 = 100;

fn default_hold_ms() -> u64 {
    DEFAULT_HOLD_MS
}

fn default_accuracy_m() -> f64 {
    5.0
}

/// One step of a replay script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Deliver a position fix.
    Sample {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
        /// Accuracy radius in metres.
        #[serde(default = "default_accuracy_m")]
        accuracy_m: f64,
        /// Pause after this step, in milliseconds.
        #[serde(default = "default_hold_ms")]
        hold_ms: u64,
    },

    /// Deliver a transient provider fault.
    Fault {
        /// The fault message.
        message: String,
        /// Pause after this step, in milliseconds.
        #[serde(default = "default_hold_ms")]
        hold_ms: u64,
    },

    /// Revoke location permission and end the stream.
    RevokePermission,
}

/// A scripted route: steps played in order, optionally on a loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// The steps to play.
    pub steps: Vec<ReplayStep>,

    /// Restart from the first step after the last one.
    #[serde(default)]
    pub loop_route: bool,
}

impl ReplayScript {
    /// Build a script that just walks the given points.
    #[must_use]
    pub fn route(points: &[GeoPoint], hold_ms: u64) -> Self {
        Self {
            steps: points
                .iter()
                .map(|p| ReplayStep::Sample {
                    latitude: p.latitude,
                    longitude: p.longitude,
                    accuracy_m: default_accuracy_m(),
                    hold_ms,
                })
                .collect(),
            loop_route: false,
        }
    }

    /// Parse a script from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid script.
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    /// Load a script from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json(&document)
    }

    /// The first scripted position, if any.
    #[must_use]
    pub fn first_point(&self) -> Option<GeoPoint> {
        self.steps.iter().find_map(|step| match step {
            ReplayStep::Sample {
                latitude,
                longitude,
                ..
            } => Some(GeoPoint::new(*latitude, *longitude)),
            _ => None,
        })
    }
}

/// A [`LocationProvider`] that replays a script.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    script: ReplayScript,
    decision: PermissionDecision,
}

impl ReplayProvider {
    /// Create a provider that replays `script` with permission granted.
    #[must_use]
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script,
            decision: PermissionDecision::Granted,
        }
    }

    /// Override the scripted permission decision.
    #[must_use]
    pub fn with_decision(mut self, decision: PermissionDecision) -> Self {
        self.decision = decision;
        self
    }
}

#[async_trait::async_trait]
impl LocationProvider for ReplayProvider {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn request_permission(&self) -> Result<PermissionDecision> {
        Ok(self.decision)
    }

    async fn current_location(&self, _timeout: Duration) -> Result<LocationSample> {
        self.script
            .first_point()
            .map(|point| LocationSample::new(point, default_accuracy_m()))
            .ok_or_else(|| Error::location_unavailable("replay script has no samples"))
    }

    async fn subscribe(&self, tx: mpsc::Sender<ProviderUpdate>) -> Result<ProviderSubscription> {
        let subscription = ProviderSubscription::new();
        let stop = subscription.stop_flag();
        let script = self.script.clone();

        tokio::spawn(async move {
            loop {
                for step in &script.steps {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let hold_ms = match step {
                        ReplayStep::Sample {
                            latitude,
                            longitude,
                            accuracy_m,
                            hold_ms,
                        } => {
                            let sample = LocationSample::new(
                                GeoPoint::new(*latitude, *longitude),
                                *accuracy_m,
                            );
                            if tx.send(ProviderUpdate::Sample(sample)).await.is_err() {
                                return;
                            }
                            *hold_ms
                        }
                        ReplayStep::Fault { message, hold_ms } => {
                            if tx
                                .send(ProviderUpdate::Fault(message.clone()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                            *hold_ms
                        }
                        ReplayStep::RevokePermission => {
                            let _ = tx.send(ProviderUpdate::PermissionRevoked).await;
                            return;
                        }
                    };
                    if hold_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(hold_ms)).await;
                    }
                }
                if !script.loop_route {
                    break;
                }
                debug!("replay script looping");
            }
        });

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridewatch::watcher::{LocationWatcher, PermissionState, WatchError};

    fn quick_script(points: &[GeoPoint]) -> ReplayScript {
        ReplayScript::route(points, 1)
    }

    #[test]
    fn test_script_json_round_trip() {
        let script = ReplayScript {
            steps: vec![
                ReplayStep::Sample {
                    latitude: 40.0,
                    longitude: -73.0,
                    accuracy_m: 5.0,
                    hold_ms: 50,
                },
                ReplayStep::Fault {
                    message: "gps glitch".to_string(),
                    hold_ms: 50,
                },
                ReplayStep::RevokePermission,
            ],
            loop_route: false,
        };
        let json = serde_json::to_string(&script).unwrap();
        let back = ReplayScript::from_json(&json).unwrap();
        assert_eq!(script, back);
    }

    #[test]
    fn test_script_defaults_from_minimal_json() {
        let json = r#"{"steps":[{"kind":"sample","latitude":40.0,"longitude":-73.0}]}"#;
        let script = ReplayScript::from_json(json).unwrap();
        assert!(!script.loop_route);
        match &script.steps[0] {
            ReplayStep::Sample {
                accuracy_m,
                hold_ms,
                ..
            } => {
                assert_eq!(*accuracy_m, 5.0);
                assert_eq!(*hold_ms, DEFAULT_HOLD_MS);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_first_point_skips_faults() {
        let script = ReplayScript {
            steps: vec![
                ReplayStep::Fault {
                    message: "warmup".to_string(),
                    hold_ms: 0,
                },
                ReplayStep::Sample {
                    latitude: 1.0,
                    longitude: 2.0,
                    accuracy_m: 5.0,
                    hold_ms: 0,
                },
            ],
            loop_route: false,
        };
        assert_eq!(script.first_point(), Some(GeoPoint::new(1.0, 2.0)));
    }

    #[tokio::test]
    async fn test_provider_streams_samples_in_order() {
        let points = [
            GeoPoint::new(40.0, -73.0),
            GeoPoint::new(40.001, -73.0),
            GeoPoint::new(40.002, -73.0),
        ];
        let provider = ReplayProvider::new(quick_script(&points));

        let (tx, mut rx) = mpsc::channel(8);
        let _subscription = provider.subscribe(tx).await.unwrap();

        for expected in points {
            match rx.recv().await.unwrap() {
                ProviderUpdate::Sample(sample) => assert_eq!(sample.point, expected),
                other => panic!("unexpected update {other:?}"),
            }
        }
        // Non-looping script hangs up after the last step.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_provider_stops_on_subscription_stop() {
        let mut script = quick_script(&[GeoPoint::new(40.0, -73.0)]);
        script.loop_route = true;
        script.steps[0] = ReplayStep::Sample {
            latitude: 40.0,
            longitude: -73.0,
            accuracy_m: 5.0,
            hold_ms: 10,
        };
        let provider = ReplayProvider::new(script);

        let (tx, mut rx) = mpsc::channel(8);
        let subscription = provider.subscribe(tx).await.unwrap();

        assert!(rx.recv().await.is_some());
        subscription.stop();

        // The stream drains and then closes.
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_current_location_uses_first_sample() {
        let provider = ReplayProvider::new(quick_script(&[GeoPoint::new(40.0, -73.0)]));
        let sample = provider
            .current_location(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(sample.point, GeoPoint::new(40.0, -73.0));
    }

    #[tokio::test]
    async fn test_current_location_without_samples_is_unavailable() {
        let provider = ReplayProvider::new(ReplayScript {
            steps: vec![ReplayStep::RevokePermission],
            loop_route: false,
        });
        let err = provider
            .current_location(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocationUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_replay_drives_a_watcher_session() {
        use std::sync::Arc;

        let script = ReplayScript {
            steps: vec![
                ReplayStep::Sample {
                    latitude: 40.0,
                    longitude: -73.0,
                    accuracy_m: 5.0,
                    hold_ms: 1,
                },
                ReplayStep::Fault {
                    message: "tunnel".to_string(),
                    hold_ms: 1,
                },
                ReplayStep::Sample {
                    latitude: 40.001,
                    longitude: -73.0,
                    accuracy_m: 5.0,
                    hold_ms: 1,
                },
                ReplayStep::RevokePermission,
            ],
            loop_route: false,
        };
        let watcher = LocationWatcher::new(
            Arc::new(ReplayProvider::new(script)),
            Duration::from_secs(1),
        );
        watcher.ensure_permission().await.unwrap();

        let (sample_tx, mut sample_rx) = mpsc::channel(8);
        let (error_tx, mut error_rx) = mpsc::channel(8);
        watcher.start_tracking(sample_tx, error_tx).await.unwrap();

        assert!(sample_rx.recv().await.is_some());
        assert!(matches!(
            error_rx.recv().await.unwrap(),
            WatchError::Provider(_)
        ));
        assert!(sample_rx.recv().await.is_some());
        assert_eq!(
            error_rx.recv().await.unwrap(),
            WatchError::PermissionRevoked
        );
        assert_eq!(watcher.permission_state(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_denied_decision_blocks_watcher() {
        use std::sync::Arc;

        let provider = ReplayProvider::new(quick_script(&[GeoPoint::new(40.0, -73.0)]))
            .with_decision(PermissionDecision::Denied);
        let watcher = LocationWatcher::new(Arc::new(provider), Duration::from_secs(1));

        assert!(watcher.ensure_permission().await.is_err());
        assert_eq!(watcher.permission_state(), PermissionState::Denied);
    }
}
