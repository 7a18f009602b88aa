//! Device location watcher.
//!
//! Owns the provider subscription and the permission state machine.
//! Permission moves `NoPermission -> PendingPermission -> {Granted,
//! Denied}` with at most one provider request in flight; tracking is an
//! independent sub-state that may only start from `Granted`. One active
//! subscription per watcher, released on every exit path.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::location::{
    LocationProvider, LocationSample, PermissionDecision, ProviderSubscription, ProviderUpdate,
};

/// Permission acquisition state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PermissionState {
    /// Permission has not been requested yet.
    NoPermission = 0,
    /// A provider request is in flight.
    PendingPermission = 1,
    /// The user granted access.
    Granted = 2,
    /// The user denied access, or access was revoked.
    Denied = 3,
}

impl PermissionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::PendingPermission,
            2 => Self::Granted,
            3 => Self::Denied,
            _ => Self::NoPermission,
        }
    }
}

/// Lock-free cell holding the permission state.
#[derive(Debug)]
struct PermissionCell(AtomicU8);

impl PermissionCell {
    fn new() -> Self {
        Self(AtomicU8::new(PermissionState::NoPermission as u8))
    }

    fn get(&self) -> PermissionState {
        PermissionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: PermissionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `NoPermission -> PendingPermission`; false if another request
    /// already claimed the transition.
    fn begin_request(&self) -> bool {
        self.0
            .compare_exchange(
                PermissionState::NoPermission as u8,
                PermissionState::PendingPermission as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

/// Non-fatal session errors delivered on the watcher's error channel.
///
/// Provider faults do not stop tracking; a permission revocation does.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The provider reported a transient fault and may recover.
    #[error("location provider fault: {0}")]
    Provider(String),

    /// The platform revoked location permission; the session was
    /// force-stopped.
    #[error("location permission revoked")]
    PermissionRevoked,
}

/// A live tracking session: the provider subscription plus the task
/// forwarding its updates.
#[derive(Debug)]
struct TrackingSession {
    subscription: ProviderSubscription,
    pump: JoinHandle<()>,
    live: Arc<AtomicBool>,
}

impl TrackingSession {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        // Subscription stops via its own Drop; the pump must not outlive
        // the session.
        self.subscription.stop();
        self.pump.abort();
    }
}

/// Manages location permission and the live position subscription for
/// one rider session.
#[derive(Debug)]
pub struct LocationWatcher {
    provider: Arc<dyn LocationProvider>,
    fix_timeout: Duration,
    permission: Arc<PermissionCell>,
    session: Mutex<Option<TrackingSession>>,
    discarded_samples: Arc<AtomicU64>,
}

impl LocationWatcher {
    /// Create a watcher over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn LocationProvider>, fix_timeout: Duration) -> Self {
        Self {
            provider,
            fix_timeout,
            permission: Arc::new(PermissionCell::new()),
            session: Mutex::new(None),
            discarded_samples: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current permission state.
    #[must_use]
    pub fn permission_state(&self) -> PermissionState {
        self.permission.get()
    }

    /// Number of out-of-order samples discarded by this watcher.
    #[must_use]
    pub fn discarded_samples(&self) -> u64 {
        self.discarded_samples.load(Ordering::SeqCst)
    }

    /// Drive the permission machine to a terminal decision.
    ///
    /// Only one provider request may be in flight per watcher; a
    /// concurrent call observes the pending request and fails with
    /// `PermissionPending` instead of issuing a duplicate.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if the user denied access (now or earlier),
    /// `PermissionPending` if a request is already in flight, or the
    /// provider's own failure if the platform request errored.
    pub async fn ensure_permission(&self) -> Result<()> {
        match self.permission.get() {
            PermissionState::Granted => return Ok(()),
            PermissionState::Denied => return Err(Error::PermissionDenied),
            PermissionState::PendingPermission => return Err(Error::PermissionPending),
            PermissionState::NoPermission => {}
        }

        if !self.permission.begin_request() {
            // Lost the race to another caller.
            return match self.permission.get() {
                PermissionState::Granted => Ok(()),
                PermissionState::Denied => Err(Error::PermissionDenied),
                _ => Err(Error::PermissionPending),
            };
        }

        debug!(provider = self.provider.name(), "requesting location permission");
        match self.provider.request_permission().await {
            Ok(PermissionDecision::Granted) => {
                self.permission.set(PermissionState::Granted);
                Ok(())
            }
            Ok(PermissionDecision::Denied) => {
                self.permission.set(PermissionState::Denied);
                Err(Error::PermissionDenied)
            }
            Err(e) => {
                // The request itself failed; allow a retry later.
                self.permission.set(PermissionState::NoPermission);
                Err(e)
            }
        }
    }

    /// Resolve a single position fix within the configured timeout.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if permission is not granted,
    /// `LocationUnavailable` if the provider cannot produce a fix, or
    /// `Timeout` if it does not respond in time.
    pub async fn current_location(&self) -> Result<LocationSample> {
        self.require_granted()?;

        match tokio::time::timeout(
            self.fix_timeout,
            self.provider.current_location(self.fix_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout("current location fix")),
        }
    }

    /// Start streaming samples into `samples` and session errors into
    /// `errors`.
    ///
    /// Idempotent: a second call while a session is live is a no-op and
    /// does not create a duplicate subscription. Samples are forwarded
    /// exactly once, in provider order, after dropping any sample whose
    /// timestamp regresses. Provider faults go to the error channel and
    /// do not stop tracking; a permission revocation force-stops the
    /// session.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if permission is not granted, or the
    /// provider's error if the subscription cannot be established.
    pub async fn start_tracking(
        &self,
        samples: mpsc::Sender<LocationSample>,
        errors: mpsc::Sender<WatchError>,
    ) -> Result<()> {
        self.require_granted()?;

        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.is_live() {
                debug!("start_tracking called while already tracking; ignoring");
                return Ok(());
            }
            // The previous session ended on its own (revocation or
            // provider hang-up); tear it down before re-acquiring.
            *slot = None;
        }

        let (tx, rx) = mpsc::channel(64);
        let subscription = self.provider.subscribe(tx).await?;
        let live = Arc::new(AtomicBool::new(true));

        let pump = tokio::spawn(pump_updates(PumpContext {
            rx,
            samples,
            errors,
            permission: Arc::clone(&self.permission),
            live: Arc::clone(&live),
            stop_flag: subscription.stop_flag(),
            discarded: Arc::clone(&self.discarded_samples),
        }));

        *slot = Some(TrackingSession {
            subscription,
            pump,
            live,
        });
        debug!(provider = self.provider.name(), "tracking started");
        Ok(())
    }

    /// Stop the live tracking session, if any.
    ///
    /// Idempotent: a second call (or a call with no session) is a no-op.
    /// Cancels the provider subscription and the forwarding task so no
    /// stale update is applied after the session closes.
    pub async fn stop_tracking(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            debug!(provider = self.provider.name(), "tracking stopped");
            drop(session);
        }
    }

    /// Check whether a tracking session is currently live.
    pub async fn is_tracking(&self) -> bool {
        let slot = self.session.lock().await;
        slot.as_ref().is_some_and(TrackingSession::is_live)
    }

    fn require_granted(&self) -> Result<()> {
        match self.permission.get() {
            PermissionState::Granted => Ok(()),
            PermissionState::PendingPermission => Err(Error::PermissionPending),
            _ => Err(Error::PermissionDenied),
        }
    }
}

struct PumpContext {
    rx: mpsc::Receiver<ProviderUpdate>,
    samples: mpsc::Sender<LocationSample>,
    errors: mpsc::Sender<WatchError>,
    permission: Arc<PermissionCell>,
    live: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    discarded: Arc<AtomicU64>,
}

async fn pump_updates(mut ctx: PumpContext) {
    let mut last_captured: Option<DateTime<Utc>> = None;

    while let Some(update) = ctx.rx.recv().await {
        match update {
            ProviderUpdate::Sample(sample) => {
                if let Some(prev) = last_captured {
                    if sample.captured_at < prev {
                        ctx.discarded.fetch_add(1, Ordering::SeqCst);
                        debug!(
                            captured_at = %sample.captured_at,
                            last = %prev,
                            "discarding out-of-order sample"
                        );
                        continue;
                    }
                }
                last_captured = Some(sample.captured_at);
                if ctx.samples.send(sample).await.is_err() {
                    debug!("sample channel closed, ending session");
                    break;
                }
            }
            ProviderUpdate::Fault(message) => {
                warn!(fault = %message, "provider fault, tracking continues");
                if ctx.errors.send(WatchError::Provider(message)).await.is_err() {
                    break;
                }
            }
            ProviderUpdate::PermissionRevoked => {
                warn!("location permission revoked, force-stopping session");
                ctx.permission.set(PermissionState::Denied);
                ctx.stop_flag.store(true, Ordering::SeqCst);
                let _ = ctx.errors.send(WatchError::PermissionRevoked).await;
                break;
            }
        }
    }

    ctx.live.store(false, Ordering::SeqCst);
}
