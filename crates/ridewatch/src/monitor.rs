//! The assembled safety monitor for one rider session.
//!
//! Wires the location watcher into the violation detector and the
//! detector's events into the emergency lifecycle: the first violation
//! of an episode triggers an incident with cause `GeofenceViolation`.
//! Teardown releases the subscription, the detector session, and every
//! forwarding task on all exit paths.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::detector::{CatalogOracle, DetectorSession, ViolationDetector, ViolationEvent};
use crate::error::Result;
use crate::lifecycle::EmergencyLifecycle;
use crate::incident::TriggerCause;
use crate::location::LocationSample;
use crate::watcher::{LocationWatcher, WatchError};
use crate::zones::ZoneCatalog;

/// A running watcher -> detector -> lifecycle pipeline.
#[derive(Debug)]
pub struct SafetyMonitor {
    watcher: Arc<LocationWatcher>,
    session: Arc<DetectorSession>,
    tasks: Vec<JoinHandle<()>>,
}

impl SafetyMonitor {
    /// Start the pipeline for one rider.
    ///
    /// Permission must already be granted on `watcher` (call
    /// [`LocationWatcher::ensure_permission`] first).
    ///
    /// # Errors
    ///
    /// Returns an error if tracking cannot start.
    pub async fn start(
        watcher: Arc<LocationWatcher>,
        catalog: Arc<ZoneCatalog>,
        lifecycle: Arc<EmergencyLifecycle>,
        user: impl Into<String>,
    ) -> Result<Self> {
        let user = user.into();

        let (sample_tx, mut sample_rx) = mpsc::channel::<LocationSample>(64);
        let (error_tx, mut error_rx) = mpsc::channel::<WatchError>(16);
        let (event_tx, mut event_rx) = mpsc::channel::<ViolationEvent>(16);

        let detector = ViolationDetector::new(Arc::new(CatalogOracle::new(catalog)));
        let session = Arc::new(DetectorSession::spawn(detector, event_tx));

        watcher.start_tracking(sample_tx, error_tx).await?;
        info!(user = %user, "safety monitor started");

        let feed = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                while let Some(sample) = sample_rx.recv().await {
                    session.submit(sample);
                }
            })
        };

        let apply = {
            let lifecycle = Arc::clone(&lifecycle);
            let user = user.clone();
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    match event {
                        ViolationEvent::Entered { sample, status } => {
                            let nearest = status
                                .nearest_zone
                                .as_ref()
                                .map_or("none", |z| z.name.as_str());
                            warn!(
                                user = %user,
                                location = %sample.point,
                                nearest_zone = nearest,
                                "geofence violation"
                            );
                            if let Err(e) = lifecycle.trigger(
                                user.clone(),
                                sample.point,
                                TriggerCause::GeofenceViolation,
                                None,
                            ) {
                                error!(user = %user, error = %e, "failed to trigger emergency");
                            }
                        }
                        ViolationEvent::Cleared { sample } => {
                            info!(user = %user, location = %sample.point, "geofence recovered");
                        }
                    }
                }
            })
        };

        let faults = tokio::spawn(async move {
            while let Some(fault) = error_rx.recv().await {
                match fault {
                    WatchError::Provider(message) => {
                        warn!(fault = %message, "location provider fault");
                    }
                    WatchError::PermissionRevoked => {
                        warn!("location permission revoked, monitor session ended");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            watcher,
            session,
            tasks: vec![feed, apply, faults],
        })
    }

    /// Check whether the underlying tracking session is live.
    pub async fn is_tracking(&self) -> bool {
        self.watcher.is_tracking().await
    }

    /// Tear the pipeline down: stop tracking, cancel the detector
    /// session (discarding any in-flight zone check), and end the
    /// forwarding tasks.
    pub async fn stop(self) {
        self.watcher.stop_tracking().await;
        self.session.stop();
        for task in self.tasks {
            task.abort();
        }
        info!("safety monitor stopped");
    }
}
