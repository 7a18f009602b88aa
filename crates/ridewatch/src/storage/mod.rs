//! Persistent store for emergency incidents.
//!
//! `SQLite`-backed storage keyed by status, user, priority, and trigger
//! position. Status transitions are single conditional UPDATE
//! statements: a compare-and-swap on the current status, so two
//! concurrent transition attempts against one record can never both
//! apply. No lock is held across an await; every mutation is one atomic
//! statement.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geofence::{haversine_m, EARTH_RADIUS_M};
use crate::incident::{Emergency, EmergencyPriority, EmergencyStatus, TriggerCause};
use crate::location::GeoPoint;

/// Metres per degree of latitude, for bounding-box prefilters.
const METERS_PER_DEGREE_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

const SELECT_COLUMNS: &str = "id, user, latitude, longitude, status, priority, cause, \
                              triggered_at, resolved_at, responder_notified";

/// Optional filters for open-incident listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenFilter {
    /// Restrict to one rider.
    pub user: Option<String>,
    /// Restrict to one priority.
    pub priority: Option<EmergencyPriority>,
}

impl OpenFilter {
    /// No filtering: every open incident.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter to one rider's incidents.
    #[must_use]
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            priority: None,
        }
    }

    /// Add a priority filter.
    #[must_use]
    pub fn with_priority(mut self, priority: EmergencyPriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Total records.
    pub total: i64,
    /// Records in `Active` or `InProgress`.
    pub open: i64,
    /// Records in `Resolved`.
    pub resolved: i64,
}

/// Storage engine for emergency incidents.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a store at the given path.
    ///
    /// Creates parent directories and the database file if needed, and
    /// recreates any table or index that is missing (an external
    /// maintenance tool may have rebuilt indexes offline).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening emergency store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL keeps dashboard reads cheap while transitions write.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Emergency store ready at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new incident, returning its assigned id.
    ///
    /// Inserts never deduplicate: each trigger creates a distinct
    /// record, so a repeated panic press is never silently dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, incident: &Emergency) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO emergencies
                (user, latitude, longitude, status, priority, cause,
                 triggered_at, resolved_at, responder_notified)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                incident.user,
                incident.location.latitude,
                incident.location.longitude,
                incident.status.to_string(),
                incident.priority.to_string(),
                incident.cause.to_string(),
                incident.triggered_at.to_rfc3339(),
                incident.resolved_at.map(|t| t.to_rfc3339()),
                i64::from(incident.responder_notified),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, user = %incident.user, "inserted emergency");
        Ok(id)
    }

    /// Get an incident by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<Emergency>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM emergencies WHERE id = ?1"),
                [id],
                Self::row_to_emergency,
            )
            .optional()?;
        Ok(result)
    }

    /// Move an incident `Active -> InProgress`.
    ///
    /// The transition is a compare-and-swap: of two concurrent calls,
    /// exactly one applies and the other observes the changed state.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is unknown, `InvalidTransition` if the
    /// record is not currently `Active`.
    pub fn acknowledge(&self, id: i64) -> Result<Emergency> {
        let affected = self.conn.execute(
            "UPDATE emergencies SET status = 'in_progress' WHERE id = ?1 AND status = 'active'",
            [id],
        )?;

        if affected == 0 {
            return Err(self.transition_failure(id, "acknowledge")?);
        }
        self.fetch_after_update(id)
    }

    /// Move an incident `Active|InProgress -> Resolved`, stamping
    /// `resolved_at`.
    ///
    /// `Resolved` is terminal: resolving an already-resolved record
    /// fails with `InvalidTransition` and leaves it untouched.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is unknown, `InvalidTransition` if the
    /// record is not open.
    pub fn resolve(&self, id: i64, resolved_at: DateTime<Utc>) -> Result<Emergency> {
        let affected = self.conn.execute(
            r"
            UPDATE emergencies SET status = 'resolved', resolved_at = ?2
            WHERE id = ?1 AND status IN ('active', 'in_progress')
            ",
            params![id, resolved_at.to_rfc3339()],
        )?;

        if affected == 0 {
            return Err(self.transition_failure(id, "resolve")?);
        }
        self.fetch_after_update(id)
    }

    /// Record that the responder collaborator was notified.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_notified(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE emergencies SET responder_notified = 1 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// List open incidents, most recently triggered first.
    ///
    /// The ordering is a query-time sort; it holds regardless of
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_open(&self, filter: &OpenFilter) -> Result<Vec<Emergency>> {
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM emergencies \
             WHERE status IN ('active', 'in_progress')"
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(user) = &filter.user {
            sql.push_str(" AND user = ?");
            args.push(user.clone());
        }
        if let Some(priority) = filter.priority {
            sql.push_str(" AND priority = ?");
            args.push(priority.to_string());
        }
        sql.push_str(" ORDER BY triggered_at DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let incidents = stmt
            .query_map(params_from_iter(args), Self::row_to_emergency)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(incidents)
    }

    /// Open incidents ordered by distance from `origin`, closest first.
    ///
    /// With `within_m` set, a bounding box over the positional index
    /// prefilters candidates before the exact haversine ordering.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn nearest_open(
        &self,
        origin: GeoPoint,
        within_m: Option<f64>,
        limit: usize,
    ) -> Result<Vec<(Emergency, f64)>> {
        let candidates = if let Some(radius) = within_m {
            let lat_delta = radius / METERS_PER_DEGREE_LAT;
            let lon_scale = origin.latitude.to_radians().cos().max(1e-6);
            let lon_delta = radius / (METERS_PER_DEGREE_LAT * lon_scale);

            let mut stmt = self.conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM emergencies \
                 WHERE status IN ('active', 'in_progress') \
                 AND latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        origin.latitude - lat_delta,
                        origin.latitude + lat_delta,
                        origin.longitude - lon_delta,
                        origin.longitude + lon_delta,
                    ],
                    Self::row_to_emergency,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            self.list_open(&OpenFilter::any())?
        };

        let mut scored: Vec<(Emergency, f64)> = candidates
            .into_iter()
            .map(|incident| {
                let distance = haversine_m(origin, incident.location);
                (incident, distance)
            })
            .filter(|(_, distance)| within_m.map_or(true, |radius| *distance <= radius))
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Resolve every open incident triggered before `cutoff`.
    ///
    /// One UPDATE statement, so the sweep is atomic with respect to
    /// concurrent listings, and idempotent: a second run with the same
    /// cutoff affects nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn bulk_resolve_stale(
        &self,
        cutoff: DateTime<Utc>,
        resolved_at: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn.execute(
            r"
            UPDATE emergencies SET status = 'resolved', resolved_at = ?2
            WHERE status IN ('active', 'in_progress') AND triggered_at < ?1
            ",
            params![cutoff.to_rfc3339(), resolved_at.to_rfc3339()],
        )?;

        if affected > 0 {
            info!(affected, cutoff = %cutoff, "bulk-resolved stale emergencies");
        }
        Ok(affected)
    }

    /// Count open incidents.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_open(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM emergencies WHERE status IN ('active', 'in_progress')",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Get aggregate counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM emergencies", [], |row| row.get(0))?;
        let open = self.count_open()?;
        Ok(StorageStats {
            total,
            open,
            resolved: total - open,
        })
    }

    /// Re-run the index statements.
    ///
    /// Harmless when the indexes exist; used after an external tool has
    /// rebuilt the database offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn ensure_indexes(&self) -> Result<()> {
        for statement in schema::INDEX_STATEMENTS {
            self.conn.execute(statement, [])?;
        }
        Ok(())
    }

    /// Build the error for a conditional UPDATE that matched nothing.
    fn transition_failure(&self, id: i64, attempted: &'static str) -> Result<Error> {
        match self.get(id)? {
            None => Ok(Error::NotFound { id }),
            Some(record) => Ok(Error::InvalidTransition {
                id,
                from: record.status,
                attempted,
            }),
        }
    }

    fn fetch_after_update(&self, id: i64) -> Result<Emergency> {
        self.get(id)?
            .ok_or_else(|| Error::internal(format!("emergency {id} vanished mid-update")))
    }

    fn row_to_emergency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Emergency> {
        let status_str: String = row.get(4)?;
        let priority_str: String = row.get(5)?;
        let cause_str: String = row.get(6)?;
        let triggered_str: String = row.get(7)?;
        let resolved_str: Option<String> = row.get(8)?;
        let notified: i64 = row.get(9)?;

        let status = EmergencyStatus::parse(&status_str)
            .map_err(|e| decode_error(4, e.to_string()))?;
        let priority = EmergencyPriority::parse(&priority_str)
            .map_err(|e| decode_error(5, e.to_string()))?;
        let cause =
            TriggerCause::parse(&cause_str).map_err(|e| decode_error(6, e.to_string()))?;
        let triggered_at = parse_timestamp(7, &triggered_str)?;
        let resolved_at = resolved_str
            .map(|s| parse_timestamp(8, &s))
            .transpose()?;

        Ok(Emergency {
            id: Some(row.get(0)?),
            user: row.get(1)?,
            location: GeoPoint::new(row.get(2)?, row.get(3)?),
            status,
            priority,
            cause,
            triggered_at,
            resolved_at,
            responder_notified: notified != 0,
        })
    }
}

fn parse_timestamp(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(index, format!("bad timestamp {value}: {e}")))
}

fn decode_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, message.into())
}
