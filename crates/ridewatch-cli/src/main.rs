//! `ridewatch` - CLI for the rider safety monitor.
//!
//! Runs the monitor pipeline against a replayed route, and manages the
//! incident store and zone catalog from the command line.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

mod cli;

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use ridewatch::lifecycle::EmergencyLifecycle;
use ridewatch::location::GeoPoint;
use ridewatch::storage::{OpenFilter, Storage};
use ridewatch::watcher::LocationWatcher;
use ridewatch::zones::{
    spawn_refresh_task, FileZoneSource, HttpZoneSource, Zone, ZoneCatalog, ZoneGeometry,
    ZoneSource,
};
use ridewatch::{init_logging, Config, SafetyMonitor};
use ridewatch_replay::{ReplayProvider, ReplayScript};

use cli::{Cli, Command, ConfigCommand, IncidentsCommand, MonitorCommand, ZonesCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Monitor(cmd) => handle_monitor(&config, cmd).await,
        Command::Incidents(cmd) => handle_incidents(&config, &cmd),
        Command::Zones(cmd) => handle_zones(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

/// Build the configured zone source, if any.
fn zone_source(config: &Config) -> Option<Arc<dyn ZoneSource>> {
    if let Some(url) = &config.zones.source_url {
        Some(Arc::new(HttpZoneSource::new(url.clone())))
    } else {
        config
            .zones
            .source_path
            .as_ref()
            .map(|path| Arc::new(FileZoneSource::new(path.clone())) as Arc<dyn ZoneSource>)
    }
}

async fn handle_monitor(config: &Config, cmd: MonitorCommand) -> anyhow::Result<()> {
    let MonitorCommand::Run { user, route } = cmd;

    let catalog = Arc::new(ZoneCatalog::new());
    let _refresh_handle = if let Some(source) = zone_source(config) {
        if let Err(e) = catalog.refresh(source.as_ref()).await {
            warn!(error = %e, "initial zone fetch failed; monitor starts unconstrained");
        }
        Some(spawn_refresh_task(
            Arc::clone(&catalog),
            source,
            config.zone_refresh_interval(),
        ))
    } else {
        info!("no zone source configured; using the built-in demo zone");
        catalog.install(demo_zones())?;
        None
    };

    let script = match route {
        Some(path) => ReplayScript::load(&path)
            .with_context(|| format!("failed to load route {}", path.display()))?,
        None => demo_route(),
    };

    let storage = Storage::open(config.database_path())?;
    let lifecycle = Arc::new(EmergencyLifecycle::with_log_notifier(storage));
    let watcher = Arc::new(LocationWatcher::new(
        Arc::new(ReplayProvider::new(script)),
        config.fix_timeout(),
    ));

    watcher.ensure_permission().await?;
    let monitor = SafetyMonitor::start(
        Arc::clone(&watcher),
        catalog,
        Arc::clone(&lifecycle),
        user,
    )
    .await?;

    println!("Safety monitor running; press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    monitor.stop().await;

    let open = lifecycle.list_open(&OpenFilter::any())?;
    println!("Monitor stopped with {} open incident(s).", open.len());
    Ok(())
}

fn handle_incidents(config: &Config, cmd: &IncidentsCommand) -> anyhow::Result<()> {
    let lifecycle = EmergencyLifecycle::with_log_notifier(Storage::open(config.database_path())?);

    match cmd {
        IncidentsCommand::Trigger {
            user,
            lat,
            lon,
            priority,
        } => {
            let record = lifecycle.trigger(
                user.clone(),
                GeoPoint::new(*lat, *lon),
                ridewatch::TriggerCause::Manual,
                priority.map(Into::into),
            )?;
            println!(
                "Triggered incident #{} for {} at {} ({}).",
                record.id.unwrap_or(0),
                record.user,
                record.location,
                record.priority,
            );
        }
        IncidentsCommand::List {
            user,
            priority,
            json,
        } => {
            let filter = OpenFilter {
                user: user.clone(),
                priority: priority.map(Into::into),
            };
            let open = lifecycle.list_open(&filter)?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&open)?);
            } else if open.is_empty() {
                println!("No open incidents.");
            } else {
                for incident in open {
                    println!(
                        "#{:<6} {:<12} {:<11} {:<8} {:<19} {} {}",
                        incident.id.unwrap_or(0),
                        incident.user,
                        incident.status,
                        incident.priority,
                        incident.cause,
                        incident.triggered_at.format("%Y-%m-%d %H:%M:%S"),
                        incident.location,
                    );
                }
            }
        }
        IncidentsCommand::Ack { id } => {
            let updated = lifecycle.acknowledge(*id)?;
            println!("Incident {} is now {}.", id, updated.status);
        }
        IncidentsCommand::Resolve { id } => {
            let updated = lifecycle.resolve(*id)?;
            println!("Incident {} is now {}.", id, updated.status);
        }
        IncidentsCommand::Sweep { older_than_hours } => {
            let age = older_than_hours
                .map(|hours| chrono::Duration::hours(i64::from(hours)))
                .unwrap_or_else(|| config.stale_age());
            let cutoff = Utc::now() - age;
            let affected = lifecycle.bulk_resolve_stale(cutoff)?;
            println!("Resolved {affected} stale incident(s).");
        }
        IncidentsCommand::Stats => {
            let stats = lifecycle.stats()?;
            println!("Incidents");
            println!("---------");
            println!("Total:    {}", stats.total);
            println!("Open:     {}", stats.open);
            println!("Resolved: {}", stats.resolved);
        }
    }
    Ok(())
}

async fn handle_zones(config: &Config, cmd: &ZonesCommand) -> anyhow::Result<()> {
    let ZonesCommand::Show { json } = cmd;

    let Some(source) = zone_source(config) else {
        bail!("no zone source configured; set zones.source_url or zones.source_path");
    };

    let catalog = ZoneCatalog::new();
    catalog.refresh(source.as_ref()).await?;
    let zones = catalog.snapshot();

    if *json {
        println!("{}", serde_json::to_string_pretty(zones.as_slice())?);
    } else if zones.is_empty() {
        println!("Zone catalog is empty.");
    } else {
        for zone in zones.iter() {
            let shape = match &zone.geometry {
                ZoneGeometry::Polygon { vertices } => {
                    format!("polygon({} vertices)", vertices.len())
                }
                ZoneGeometry::Circle { center, radius_m } => {
                    format!("circle({center}, r={radius_m}m)")
                }
            };
            let state = if zone.active { "active" } else { "inactive" };
            println!("#{:<6} {:<24} {:<10} {}", zone.id, zone.name, state, shape);
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Watcher]");
                println!("  Fix timeout (ms):     {}", config.watcher.fix_timeout_ms);
                println!();
                println!("[Zones]");
                println!(
                    "  Source URL:           {}",
                    config.zones.source_url.as_deref().unwrap_or("(none)")
                );
                println!(
                    "  Source path:          {}",
                    config
                        .zones
                        .source_path
                        .as_ref()
                        .map_or("(none)".to_string(), |p| p.display().to_string())
                );
                println!(
                    "  Refresh interval (s): {}",
                    config.zones.refresh_interval_secs
                );
                println!();
                println!("[Storage]");
                println!("  Database path:        {}", config.database_path().display());
                println!();
                println!("[Incidents]");
                println!(
                    "  Stale after (hours):  {}",
                    config.incidents.stale_after_hours
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

/// The built-in demo zone: a 500m circle in midtown.
fn demo_zones() -> Vec<Zone> {
    vec![Zone {
        id: 1,
        name: "demo-operating-area".to_string(),
        geometry: ZoneGeometry::Circle {
            center: GeoPoint::new(40.0, -73.0),
            radius_m: 500.0,
        },
        active: true,
    }]
}

/// The built-in demo route: inside the demo zone, a 5km excursion, and
/// back.
fn demo_route() -> ReplayScript {
    let center = GeoPoint::new(40.0, -73.0);
    let outside = GeoPoint::new(40.045, -73.0);
    ReplayScript::route(
        &[center, center, outside, outside, outside, center, center],
        1_000,
    )
}
