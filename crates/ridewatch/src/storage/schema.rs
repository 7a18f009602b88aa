//! `SQLite` schema for the emergency store.
//!
//! The four indexes below are load-bearing for the lifecycle's query
//! patterns. An external maintenance tool may drop and rebuild them
//! offline; every statement is `IF NOT EXISTS` so the store recreates
//! anything missing at startup.

/// SQL statement to create the emergencies table.
pub const CREATE_EMERGENCIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS emergencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    cause TEXT NOT NULL,
    triggered_at TEXT NOT NULL,
    resolved_at TEXT,
    responder_notified INTEGER NOT NULL DEFAULT 0
)
";

/// Index backing open-incident listings ordered by recency.
pub const CREATE_STATUS_TRIGGERED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_emergencies_status_triggered
ON emergencies(status, triggered_at DESC)
";

/// Index backing per-user open-incident lookups.
pub const CREATE_USER_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_emergencies_user_status
ON emergencies(user, status)
";

/// Index backing priority-filtered dashboards.
pub const CREATE_PRIORITY_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_emergencies_priority_status
ON emergencies(priority, status)
";

/// Positional index backing nearest-responder bounding-box queries.
pub const CREATE_POSITION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_emergencies_position
ON emergencies(latitude, longitude)
";

/// SQL statement to create the metadata table for key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// The index statements alone, re-runnable after an offline rebuild.
pub const INDEX_STATEMENTS: &[&str] = &[
    CREATE_STATUS_TRIGGERED_INDEX,
    CREATE_USER_STATUS_INDEX,
    CREATE_PRIORITY_STATUS_INDEX,
    CREATE_POSITION_INDEX,
];

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_EMERGENCIES_TABLE,
    CREATE_STATUS_TRIGGERED_INDEX,
    CREATE_USER_STATUS_INDEX,
    CREATE_PRIORITY_STATUS_INDEX,
    CREATE_POSITION_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_emergencies_table_has_required_columns() {
        for column in [
            "user TEXT NOT NULL",
            "latitude REAL NOT NULL",
            "longitude REAL NOT NULL",
            "status TEXT NOT NULL",
            "priority TEXT NOT NULL",
            "cause TEXT NOT NULL",
            "triggered_at TEXT NOT NULL",
            "resolved_at TEXT",
        ] {
            assert!(CREATE_EMERGENCIES_TABLE.contains(column), "missing {column}");
        }
    }

    #[test]
    fn test_every_index_is_recreatable() {
        for stmt in INDEX_STATEMENTS {
            assert!(stmt.contains("IF NOT EXISTS"));
        }
    }
}
