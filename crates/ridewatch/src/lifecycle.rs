//! Emergency lifecycle: the authoritative state machine over the store.
//!
//! All Emergency records are owned here end-to-end. Trigger requests
//! arrive from the panic button or the violation detector; both funnel
//! into [`EmergencyLifecycle::trigger`]. Transition errors are always
//! synchronous and surfaced to the caller; a dropped acknowledge or
//! resolve could strand an incident in the wrong state.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::incident::{Emergency, EmergencyPriority, TriggerCause};
use crate::location::GeoPoint;
use crate::storage::{OpenFilter, Storage, StorageStats};

/// The responder-notification collaborator.
///
/// Invoked exactly once per transition into `Active`. Delivery itself
/// (push, SMS) lives behind this seam, outside the monitor.
pub trait ResponderNotifier: Send + Sync {
    /// Notify responders about a newly triggered incident.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be handed off.
    fn notify(&self, incident: &Emergency) -> Result<()>;
}

/// Notifier that records the hand-off in the log.
///
/// Stands in wherever a real delivery collaborator is not wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ResponderNotifier for LogNotifier {
    fn notify(&self, incident: &Emergency) -> Result<()> {
        info!(
            id = incident.id,
            user = %incident.user,
            priority = %incident.priority,
            cause = %incident.cause,
            location = %incident.location,
            "responder notification"
        );
        Ok(())
    }
}

/// State machine and store for safety incidents.
#[derive(Debug)]
pub struct EmergencyLifecycle {
    store: Mutex<Storage>,
    notifier: Arc<dyn ResponderNotifier>,
}

impl std::fmt::Debug for dyn ResponderNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResponderNotifier")
    }
}

impl EmergencyLifecycle {
    /// Create a lifecycle over the given store and notifier.
    #[must_use]
    pub fn new(store: Storage, notifier: Arc<dyn ResponderNotifier>) -> Self {
        Self {
            store: Mutex::new(store),
            notifier,
        }
    }

    /// Create a lifecycle that logs responder notifications.
    #[must_use]
    pub fn with_log_notifier(store: Storage) -> Self {
        Self::new(store, Arc::new(LogNotifier))
    }

    /// Create a new incident in `Active`.
    ///
    /// Every call creates a distinct record; rapid repeated triggers are
    /// never deduplicated, so a second panic press during an existing
    /// incident is never silently dropped. When `priority` is `None`
    /// the cause picks its default. The responder collaborator is
    /// invoked exactly once per created record; its failure is logged
    /// but does not fail the trigger.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub fn trigger(
        &self,
        user: impl Into<String>,
        location: GeoPoint,
        cause: TriggerCause,
        priority: Option<EmergencyPriority>,
    ) -> Result<Emergency> {
        let priority = priority.unwrap_or_else(|| cause.default_priority());
        let mut record = Emergency::new(user, location, cause, priority);

        let id = self.store()?.insert(&record)?;
        record.id = Some(id);
        info!(id, user = %record.user, cause = %cause, priority = %priority, "emergency triggered");

        match self.notifier.notify(&record) {
            Ok(()) => {
                self.store()?.mark_notified(id)?;
                record.responder_notified = true;
            }
            Err(e) => {
                warn!(id, error = %e, "responder notification failed");
            }
        }

        Ok(record)
    }

    /// Acknowledge an incident: `Active -> InProgress`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `InvalidTransition` when the record
    /// is not currently `Active` (including when a concurrent call
    /// already applied the transition).
    pub fn acknowledge(&self, id: i64) -> Result<Emergency> {
        let updated = self.store()?.acknowledge(id)?;
        info!(id, "emergency acknowledged");
        Ok(updated)
    }

    /// Resolve an incident: `Active|InProgress -> Resolved`, stamping
    /// `resolved_at` with the current time.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `InvalidTransition` when the record
    /// is already resolved.
    pub fn resolve(&self, id: i64) -> Result<Emergency> {
        let updated = self.store()?.resolve(id, Utc::now())?;
        info!(id, "emergency resolved");
        Ok(updated)
    }

    /// Get one incident.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn get(&self, id: i64) -> Result<Emergency> {
        self.store()?.get(id)?.ok_or(Error::NotFound { id })
    }

    /// List open incidents matching `filter`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_open(&self, filter: &OpenFilter) -> Result<Vec<Emergency>> {
        self.store()?.list_open(filter)
    }

    /// Open incidents ranked by distance from `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn nearest_open(
        &self,
        origin: GeoPoint,
        within_m: Option<f64>,
        limit: usize,
    ) -> Result<Vec<(Emergency, f64)>> {
        self.store()?.nearest_open(origin, within_m, limit)
    }

    /// Administrative sweep: resolve every open incident triggered
    /// before `cutoff`. Returns the number of records affected.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep fails.
    pub fn bulk_resolve_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.store()?.bulk_resolve_stale(cutoff, Utc::now())
    }

    /// Count open incidents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_open(&self) -> Result<i64> {
        self.store()?.count_open()
    }

    /// Aggregate store counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<StorageStats> {
        self.store()?.stats()
    }

    fn store(&self) -> Result<MutexGuard<'_, Storage>> {
        self.store
            .lock()
            .map_err(|_| Error::internal("emergency store lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::EmergencyStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lifecycle() -> EmergencyLifecycle {
        EmergencyLifecycle::with_log_notifier(Storage::open_in_memory().unwrap())
    }

    fn here() -> GeoPoint {
        GeoPoint::new(40.0, -73.0)
    }

    #[test]
    fn test_trigger_creates_active_record() {
        let lifecycle = lifecycle();
        let record = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, Some(EmergencyPriority::High))
            .unwrap();

        assert!(record.id.is_some());
        assert_eq!(record.status, EmergencyStatus::Active);
        assert!(record.resolved_at.is_none());
        assert!(record.responder_notified);
    }

    #[test]
    fn test_trigger_twice_creates_two_independent_incidents() {
        let lifecycle = lifecycle();
        let a = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, Some(EmergencyPriority::High))
            .unwrap();
        let b = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, Some(EmergencyPriority::High))
            .unwrap();

        assert_ne!(a.id, b.id);
        let open = lifecycle.list_open(&OpenFilter::for_user("rider-1")).unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|e| e.status == EmergencyStatus::Active));
    }

    #[test]
    fn test_trigger_defaults_priority_from_cause() {
        let lifecycle = lifecycle();
        let manual = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap();
        assert_eq!(manual.priority, EmergencyPriority::Critical);

        let auto = lifecycle
            .trigger("rider-1", here(), TriggerCause::GeofenceViolation, None)
            .unwrap();
        assert_eq!(auto.priority, EmergencyPriority::High);
    }

    #[test]
    fn test_notifier_invoked_exactly_once_per_trigger() {
        struct CountingNotifier(AtomicUsize);

        impl ResponderNotifier for CountingNotifier {
            fn notify(&self, _incident: &Emergency) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let lifecycle = EmergencyLifecycle::new(
            Storage::open_in_memory().unwrap(),
            Arc::clone(&notifier) as Arc<dyn ResponderNotifier>,
        );

        let record = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap();
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);

        // Later transitions never re-notify.
        lifecycle.acknowledge(record.id.unwrap()).unwrap();
        lifecycle.resolve(record.id.unwrap()).unwrap();
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notifier_failure_does_not_fail_trigger() {
        struct FailingNotifier;

        impl ResponderNotifier for FailingNotifier {
            fn notify(&self, _incident: &Emergency) -> Result<()> {
                Err(Error::internal("gateway unreachable"))
            }
        }

        let lifecycle =
            EmergencyLifecycle::new(Storage::open_in_memory().unwrap(), Arc::new(FailingNotifier));

        let record = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap();
        assert!(!record.responder_notified);
        assert_eq!(record.status, EmergencyStatus::Active);
    }

    #[test]
    fn test_full_lifecycle_status_sequence() {
        let lifecycle = lifecycle();
        let id = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap()
            .id
            .unwrap();

        assert_eq!(lifecycle.get(id).unwrap().status, EmergencyStatus::Active);
        lifecycle.acknowledge(id).unwrap();
        assert_eq!(lifecycle.get(id).unwrap().status, EmergencyStatus::InProgress);
        lifecycle.resolve(id).unwrap();

        let closed = lifecycle.get(id).unwrap();
        assert_eq!(closed.status, EmergencyStatus::Resolved);
        assert!(closed.resolved_at.is_some());
    }

    #[test]
    fn test_acknowledge_unknown_id() {
        let lifecycle = lifecycle();
        assert!(matches!(
            lifecycle.acknowledge(404).unwrap_err(),
            Error::NotFound { id: 404 }
        ));
    }

    #[test]
    fn test_resolve_is_terminal() {
        let lifecycle = lifecycle();
        let id = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap()
            .id
            .unwrap();
        let resolved = lifecycle.resolve(id).unwrap();

        let err = lifecycle.resolve(id).unwrap_err();
        assert!(err.is_invalid_transition());
        let err = lifecycle.acknowledge(id).unwrap_err();
        assert!(err.is_invalid_transition());

        // Stored state is unchanged by the rejected calls.
        assert_eq!(lifecycle.get(id).unwrap(), resolved);
    }

    #[test]
    fn test_list_open_never_returns_resolved() {
        let lifecycle = lifecycle();
        let keep = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap();
        let gone = lifecycle
            .trigger("rider-2", here(), TriggerCause::Manual, None)
            .unwrap();
        lifecycle.resolve(gone.id.unwrap()).unwrap();

        let open = lifecycle.list_open(&OpenFilter::any()).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, keep.id);
    }

    #[test]
    fn test_bulk_resolve_stale_twice_affects_zero_second_time() {
        let lifecycle = lifecycle();
        lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap();

        // Everything triggered so far is older than a future cutoff.
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(lifecycle.bulk_resolve_stale(cutoff).unwrap(), 1);
        assert_eq!(lifecycle.bulk_resolve_stale(cutoff).unwrap(), 0);
        assert_eq!(lifecycle.count_open().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_acknowledge_only_one_applies() {
        let lifecycle = Arc::new(lifecycle());
        let id = lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap()
            .id
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lifecycle = Arc::clone(&lifecycle);
            handles.push(std::thread::spawn(move || lifecycle.acknowledge(id).is_ok()));
        }

        let successes = handles
            .into_iter()
            .map(std::thread::JoinHandle::join)
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(
            lifecycle.get(id).unwrap().status,
            EmergencyStatus::InProgress
        );
    }

    #[test]
    fn test_stats_reflect_lifecycle() {
        let lifecycle = lifecycle();
        lifecycle
            .trigger("rider-1", here(), TriggerCause::Manual, None)
            .unwrap();
        let done = lifecycle
            .trigger("rider-2", here(), TriggerCause::Manual, None)
            .unwrap();
        lifecycle.resolve(done.id.unwrap()).unwrap();

        let stats = lifecycle.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.resolved, 1);
    }
}
