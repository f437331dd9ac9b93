//! Loaders for the static reference tables.
//!
//! Every loader reads straight from `static_dir` with no caching, so a
//! refreshed static set is picked up by the next run without coordination.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use crate::model::RouteCategory;

pub const ROUTES_FILE: &str = "routes.txt";
pub const AGENCY_FILE: &str = "agency.txt";
pub const TRIPS_FILE: &str = "trips.txt";
pub const STOPS_FILE: &str = "stops.txt";
pub const STOP_TIMES_FILE: &str = "stop_times.txt";
pub const REGIONS_FILE: &str = "regions.json";

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad row in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("bad json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One route joined with its agency, as the static aggregates consume it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub route_id: String,
    pub short_name: String,
    pub agency_name: String,
    pub category: RouteCategory,
}

/// One stop row from `stops.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct StopInfo {
    pub stop_id: String,
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One schedule row from `stop_times.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub arrival_time: String,
}

#[derive(Deserialize)]
struct RouteRow {
    route_id: String,
    agency_id: String,
    route_short_name: String,
}

#[derive(Deserialize)]
struct AgencyRow {
    agency_id: String,
    agency_name: String,
}

#[derive(Deserialize)]
struct TripRow {
    route_id: String,
    trip_id: String,
    block_id: String,
}

#[derive(Deserialize)]
struct StopRow {
    stop_id: String,
    stop_name: String,
    #[serde(default)]
    stop_desc: String,
    stop_lat: f64,
    stop_lon: f64,
}

#[derive(Deserialize)]
struct StopTimeRow {
    trip_id: String,
    stop_id: String,
    arrival_time: String,
}

fn load_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ReferenceError> {
    let file = File::open(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.map_err(|source| ReferenceError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Route id → short name, from `routes.txt`.
pub fn route_names(static_dir: &Path) -> Result<HashMap<String, String>, ReferenceError> {
    let rows: Vec<RouteRow> = load_csv(&static_dir.join(ROUTES_FILE))?;
    Ok(rows
        .into_iter()
        .map(|r| (r.route_id, r.route_short_name))
        .collect())
}

/// Routes joined with their agency names. Rows referencing an agency id
/// missing from `agency.txt` are skipped with a warning.
pub fn routes(static_dir: &Path) -> Result<Vec<RouteInfo>, ReferenceError> {
    let agencies: Vec<AgencyRow> = load_csv(&static_dir.join(AGENCY_FILE))?;
    let agencies: HashMap<String, String> = agencies
        .into_iter()
        .map(|a| (a.agency_id, a.agency_name))
        .collect();

    let rows: Vec<RouteRow> = load_csv(&static_dir.join(ROUTES_FILE))?;
    let mut routes = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(agency_name) = agencies.get(&row.agency_id) else {
            warn!(route_id = %row.route_id, agency_id = %row.agency_id, "route references unknown agency, skipping");
            continue;
        };
        routes.push(RouteInfo {
            category: RouteCategory::from_short_name(&row.route_short_name),
            route_id: row.route_id,
            short_name: row.route_short_name,
            agency_name: agency_name.clone(),
        });
    }
    Ok(routes)
}

/// Route id → set of block ids, from `trips.txt`.
pub fn route_blocks(static_dir: &Path) -> Result<HashMap<String, HashSet<String>>, ReferenceError> {
    let rows: Vec<TripRow> = load_csv(&static_dir.join(TRIPS_FILE))?;
    let mut blocks: HashMap<String, HashSet<String>> = HashMap::new();
    for row in rows {
        blocks.entry(row.route_id).or_default().insert(row.block_id);
    }
    Ok(blocks)
}

/// Trip id → route id, from `trips.txt`.
pub fn trip_routes(static_dir: &Path) -> Result<HashMap<String, String>, ReferenceError> {
    let rows: Vec<TripRow> = load_csv(&static_dir.join(TRIPS_FILE))?;
    Ok(rows
        .into_iter()
        .map(|r| (r.trip_id, r.route_id))
        .collect())
}

/// Stop id → stop info, from `stops.txt`.
pub fn stops(static_dir: &Path) -> Result<HashMap<String, StopInfo>, ReferenceError> {
    let rows: Vec<StopRow> = load_csv(&static_dir.join(STOPS_FILE))?;
    Ok(rows
        .into_iter()
        .map(|r| {
            (
                r.stop_id.clone(),
                StopInfo {
                    stop_id: r.stop_id,
                    name: r.stop_name,
                    description: r.stop_desc,
                    latitude: r.stop_lat,
                    longitude: r.stop_lon,
                },
            )
        })
        .collect())
}

/// All schedule rows from `stop_times.txt`, in file order.
pub fn stop_times(static_dir: &Path) -> Result<Vec<StopTime>, ReferenceError> {
    let rows: Vec<StopTimeRow> = load_csv(&static_dir.join(STOP_TIMES_FILE))?;
    Ok(rows
        .into_iter()
        .map(|r| StopTime {
            trip_id: r.trip_id,
            stop_id: r.stop_id,
            arrival_time: r.arrival_time,
        })
        .collect())
}

/// Region name → boundary ring of `(lat, lon)` pairs, from `regions.json`.
pub fn region_bounds(static_dir: &Path) -> Result<HashMap<String, Vec<(f64, f64)>>, ReferenceError> {
    let path = static_dir.join(REGIONS_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|source| ReferenceError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ReferenceError::Json { path, source })
}

/// Seconds since the start of the service day for a `HH:MM:SS` schedule time.
///
/// Hours run past 24 for trips crossing midnight, so `25:10:00` is valid.
pub fn arrival_seconds(time: &str) -> Option<u32> {
    let mut parts = time.split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}
