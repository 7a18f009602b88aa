//! Allowed-operation zones and the refreshable zone catalog.
//!
//! Zones are fetched as a whole document from a [`ZoneSource`] and
//! replace the previous set wholesale. A failed refresh keeps the last
//! good catalog in effect: stale-but-available beats failing closed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::location::GeoPoint;

/// The geometry of a zone: either a polygon or a circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneGeometry {
    /// A closed polygon described by its vertices, in order. The closing
    /// edge from the last vertex back to the first is implicit.
    Polygon {
        /// Polygon vertices; at least three.
        vertices: Vec<GeoPoint>,
    },

    /// A circle described by its center and radius.
    Circle {
        /// Circle center.
        center: GeoPoint,
        /// Radius in metres.
        radius_m: f64,
    },
}

/// A geographic region defining permitted operating area.
///
/// Zones are immutable once fetched; the catalog swaps in a whole new
/// set on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Stable zone identifier (used for deterministic tie-breaking).
    pub id: i64,

    /// Display name.
    pub name: String,

    /// The zone's geometry.
    pub geometry: ZoneGeometry,

    /// Whether the zone currently counts for containment.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Zone {
    /// Validate this zone's geometry.
    ///
    /// # Errors
    ///
    /// Returns a `ZoneDocument` error for degenerate polygons, negative
    /// radii, or out-of-range coordinates.
    pub fn validate(&self) -> Result<()> {
        match &self.geometry {
            ZoneGeometry::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(Error::zone_document(format!(
                        "zone {} polygon has {} vertices, need at least 3",
                        self.id,
                        vertices.len()
                    )));
                }
                if let Some(bad) = vertices.iter().find(|v| !v.is_valid()) {
                    return Err(Error::zone_document(format!(
                        "zone {} has out-of-range vertex {bad}",
                        self.id
                    )));
                }
            }
            ZoneGeometry::Circle { center, radius_m } => {
                if !center.is_valid() {
                    return Err(Error::zone_document(format!(
                        "zone {} has out-of-range center {center}",
                        self.id
                    )));
                }
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(Error::zone_document(format!(
                        "zone {} has non-positive radius {radius_m}",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The wire shape of the allowed-zones document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDocument {
    /// The full set of zones.
    pub zones: Vec<Zone>,
}

/// Outcome of a catalog refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new zone set was installed.
    Updated {
        /// Number of zones in the new set.
        count: usize,
    },
    /// The fetched document was byte-identical to the installed one.
    Unchanged,
}

/// A source of zone documents.
///
/// The transport behind the document (HTTP endpoint, file, fixture) is
/// the source's business; the catalog only sees raw document text.
#[async_trait::async_trait]
pub trait ZoneSource: Send + Sync {
    /// Human-readable description of where zones come from.
    fn describe(&self) -> String;

    /// Fetch the current allowed-zones document.
    ///
    /// # Errors
    ///
    /// Returns `ZoneCatalogUnavailable` when the source cannot be
    /// reached.
    async fn fetch(&self) -> Result<String>;
}

/// Fetches the zone document from a remote HTTP endpoint.
#[derive(Debug)]
pub struct HttpZoneSource {
    url: String,
    client: reqwest::Client,
}

impl HttpZoneSource {
    /// Create a source polling the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl ZoneSource for HttpZoneSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::catalog_unavailable(e.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|e| Error::catalog_unavailable(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| Error::catalog_unavailable(e.to_string()))
    }
}

/// Reads the zone document from a local file.
#[derive(Debug)]
pub struct FileZoneSource {
    path: PathBuf,
}

impl FileZoneSource {
    /// Create a source reading the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ZoneSource for FileZoneSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::catalog_unavailable(format!("{}: {e}", self.path.display())))
    }
}

/// Serves a fixed zone set from memory.
#[derive(Debug)]
pub struct StaticZoneSource {
    document: String,
}

impl StaticZoneSource {
    /// Create a source serving the given zones.
    ///
    /// # Errors
    ///
    /// Returns an error if the zones cannot be serialized.
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        let document = serde_json::to_string(&ZoneDocument { zones })?;
        Ok(Self { document })
    }
}

#[async_trait::async_trait]
impl ZoneSource for StaticZoneSource {
    fn describe(&self) -> String {
        "static zone set".to_string()
    }

    async fn fetch(&self) -> Result<String> {
        Ok(self.document.clone())
    }
}

/// The current set of allowed-operation zones.
///
/// Readers take cheap [`ZoneCatalog::snapshot`] clones; refreshes swap
/// the whole set atomically. A content hash of the last installed
/// document short-circuits no-op refreshes.
#[derive(Debug)]
pub struct ZoneCatalog {
    zones: RwLock<Arc<Vec<Zone>>>,
    installed_hash: RwLock<Option<String>>,
}

impl ZoneCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(Arc::new(Vec::new())),
            installed_hash: RwLock::new(None),
        }
    }

    /// Create a catalog pre-loaded with the given zones.
    ///
    /// # Errors
    ///
    /// Returns an error if any zone fails validation.
    pub fn with_zones(zones: Vec<Zone>) -> Result<Self> {
        let catalog = Self::new();
        catalog.install(zones)?;
        Ok(catalog)
    }

    /// Get the current zone set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Zone>> {
        match self.zones.read() {
            Ok(guard) => Arc::clone(&guard),
            // A poisoned lock still holds the last installed set.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Number of zones currently installed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Check whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Validate and install a new zone set, replacing the old one.
    ///
    /// # Errors
    ///
    /// Returns an error if any zone fails validation; the previous set
    /// stays installed.
    pub fn install(&self, zones: Vec<Zone>) -> Result<()> {
        for zone in &zones {
            zone.validate()?;
        }
        let next = Arc::new(zones);
        match self.zones.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }

    /// Pull the latest document from `source` and install it.
    ///
    /// On any failure (transport, parse, validation) the previously
    /// installed catalog remains in effect and the error is returned to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns `ZoneCatalogUnavailable` for transport failures and
    /// `ZoneDocument` for malformed payloads.
    pub async fn refresh(&self, source: &dyn ZoneSource) -> Result<RefreshOutcome> {
        let body = source.fetch().await?;
        let hash = blake3::hash(body.as_bytes()).to_hex().to_string();

        if self.hash_matches(&hash) {
            debug!(source = %source.describe(), "zone document unchanged");
            return Ok(RefreshOutcome::Unchanged);
        }

        let document: ZoneDocument = serde_json::from_str(&body)
            .map_err(|e| Error::zone_document(format!("parse failed: {e}")))?;
        let count = document.zones.len();
        self.install(document.zones)?;
        self.set_hash(hash);

        info!(count, source = %source.describe(), "zone catalog updated");
        Ok(RefreshOutcome::Updated { count })
    }

    fn hash_matches(&self, hash: &str) -> bool {
        match self.installed_hash.read() {
            Ok(guard) => guard.as_deref() == Some(hash),
            Err(poisoned) => poisoned.into_inner().as_deref() == Some(hash),
        }
    }

    fn set_hash(&self, hash: String) {
        match self.installed_hash.write() {
            Ok(mut guard) => *guard = Some(hash),
            Err(poisoned) => *poisoned.into_inner() = Some(hash),
        }
    }
}

impl Default for ZoneCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a background catalog refresh loop.
#[derive(Debug)]
pub struct RefreshHandle {
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop the refresh loop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a task that refreshes `catalog` from `source` on a fixed cadence.
///
/// Refresh failures are logged and leave the previous catalog in effect;
/// the loop keeps polling until the handle is stopped or dropped.
#[must_use]
pub fn spawn_refresh_task(
    catalog: Arc<ZoneCatalog>,
    source: Arc<dyn ZoneSource>,
    period: Duration,
) -> RefreshHandle {
    let stopped = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stopped);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick fires immediately; consume it so the caller's
        // initial load isn't raced.
        ticker.tick().await;
        while !stop_flag.load(Ordering::SeqCst) {
            ticker.tick().await;
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            match catalog.refresh(source.as_ref()).await {
                Ok(RefreshOutcome::Updated { count }) => {
                    debug!(count, "periodic zone refresh installed new set");
                }
                Ok(RefreshOutcome::Unchanged) => {}
                Err(e) => {
                    warn!(error = %e, "zone refresh failed, keeping previous catalog");
                }
            }
        }
    });

    RefreshHandle { stopped, task }
}
