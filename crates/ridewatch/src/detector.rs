//! Geofence violation detection.
//!
//! Converts a stream of classified samples into edge-triggered
//! violation/recovery events. One persisted `was_inside` bit per session
//! keeps sensor noise from storming: repeated outside samples while
//! already outside emit nothing. Evaluation failures fail open.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::Result;
use crate::geofence::{self, GeofenceStatus};
use crate::location::{GeoPoint, LocationSample};
use crate::zones::ZoneCatalog;

/// An edge-triggered geofence event.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationEvent {
    /// The session left the allowed area. Fired once per episode.
    Entered {
        /// The sample that crossed the boundary.
        sample: LocationSample,
        /// The classification that detected the crossing, including the
        /// nearest zone.
        status: GeofenceStatus,
    },

    /// The session returned to the allowed area.
    Cleared {
        /// The sample that re-entered.
        sample: LocationSample,
    },
}

impl ViolationEvent {
    /// The sample that produced this event.
    #[must_use]
    pub fn sample(&self) -> &LocationSample {
        match self {
            Self::Entered { sample, .. } | Self::Cleared { sample } => sample,
        }
    }

    /// Check whether this is a violation (as opposed to a recovery).
    #[must_use]
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Entered { .. })
    }
}

/// Classifies a point against the current zone configuration.
///
/// The zone check may be a remote call per sample; implementations are
/// async and fallible, and the detector treats any failure as inside.
#[async_trait::async_trait]
pub trait GeofenceOracle: Send + Sync {
    /// Classify a point.
    ///
    /// # Errors
    ///
    /// Returns `ZoneCatalogUnavailable` (or a transport error) when the
    /// zone configuration cannot be consulted.
    async fn classify(&self, point: GeoPoint) -> Result<GeofenceStatus>;
}

/// Oracle backed by a locally cached [`ZoneCatalog`].
#[derive(Debug)]
pub struct CatalogOracle {
    catalog: Arc<ZoneCatalog>,
}

impl CatalogOracle {
    /// Create an oracle over the given catalog.
    #[must_use]
    pub fn new(catalog: Arc<ZoneCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait::async_trait]
impl GeofenceOracle for CatalogOracle {
    async fn classify(&self, point: GeoPoint) -> Result<GeofenceStatus> {
        Ok(geofence::evaluate(point, &self.catalog.snapshot()))
    }
}

/// Two-state edge detector for one tracking session.
///
/// `was_inside` starts `true`: the session is assumed compliant until a
/// sample proves otherwise, matching the fail-open policy.
pub struct ViolationDetector {
    oracle: Arc<dyn GeofenceOracle>,
    was_inside: bool,
}

impl std::fmt::Debug for ViolationDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViolationDetector")
            .field("was_inside", &self.was_inside)
            .finish_non_exhaustive()
    }
}

impl ViolationDetector {
    /// Create a detector over the given oracle.
    #[must_use]
    pub fn new(oracle: Arc<dyn GeofenceOracle>) -> Self {
        Self {
            oracle,
            was_inside: true,
        }
    }

    /// The current hysteresis state.
    #[must_use]
    pub fn was_inside(&self) -> bool {
        self.was_inside
    }

    /// Classify one sample and apply the edge detector.
    ///
    /// Returns an event only on an inside/outside transition. An oracle
    /// failure is treated as inside and leaves the state untouched, so
    /// infrastructure trouble can neither raise a false violation nor
    /// clear a real one.
    pub async fn process(&mut self, sample: LocationSample) -> Option<ViolationEvent> {
        let status = match self.oracle.classify(sample.point).await {
            Ok(status) => status,
            Err(e) => {
                debug!(error = %e, "zone check unavailable, failing open");
                return None;
            }
        };

        match (self.was_inside, status.is_inside) {
            (true, false) => {
                self.was_inside = false;
                Some(ViolationEvent::Entered { sample, status })
            }
            (false, true) => {
                self.was_inside = true;
                Some(ViolationEvent::Cleared { sample })
            }
            _ => {
                trace!(inside = status.is_inside, "no geofence transition");
                None
            }
        }
    }
}

/// The async pump for one tracking session's violation detection.
///
/// Samples are fed through a latest-value slot: while an evaluation is
/// in flight, newer samples overwrite the slot and only the most recent
/// is evaluated next. Evaluations for one session never run
/// concurrently, and stopping the session cancels any in-flight check
/// so its result is discarded.
pub struct DetectorSession {
    latest: watch::Sender<Option<LocationSample>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for DetectorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorSession")
            .field("stopped", &*self.stop.borrow())
            .finish_non_exhaustive()
    }
}

impl DetectorSession {
    /// Spawn the pump for `detector`, delivering events into `events`.
    #[must_use]
    pub fn spawn(detector: ViolationDetector, events: mpsc::Sender<ViolationEvent>) -> Self {
        let (latest_tx, latest_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_session(detector, events, latest_rx, stop_rx));

        Self {
            latest: latest_tx,
            stop: stop_tx,
            task,
        }
    }

    /// Submit a sample, superseding any not-yet-evaluated predecessor.
    pub fn submit(&self, sample: LocationSample) {
        let _ = self.latest.send_replace(Some(sample));
    }

    /// Stop the session, discarding any in-flight evaluation.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl Drop for DetectorSession {
    fn drop(&mut self) {
        self.stop();
        self.task.abort();
    }
}

async fn run_session(
    mut detector: ViolationDetector,
    events: mpsc::Sender<ViolationEvent>,
    mut latest_rx: watch::Receiver<Option<LocationSample>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            changed = latest_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Clone out: the watch borrow must not be held across an
                // await.
                let Some(sample) = latest_rx.borrow_and_update().clone() else {
                    continue;
                };
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    event = detector.process(sample) => {
                        if let Some(event) = event {
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
    debug!("detector session ended");
}
