//! Domain records produced and persisted by the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport mode derived from a route's short name.
///
/// Lviv short names carry a Cyrillic mode prefix ahead of the line number:
/// `А18` is a bus, `Н-А2` a night bus, `Т3` a tram, `Тр25` a trolleybus.
/// Anything else lands in [`RouteCategory::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteCategory {
    Bus,
    NightBus,
    Tram,
    Trolleybus,
    Other,
}

impl RouteCategory {
    /// Categorize a route by its short name, ignoring the line number.
    pub fn from_short_name(short_name: &str) -> Self {
        let prefix: String = short_name
            .chars()
            .filter(|c| !c.is_ascii_digit())
            .collect();
        match prefix.trim() {
            "А" => Self::Bus,
            "Н-А" => Self::NightBus,
            "Т" => Self::Tram,
            "Тр" => Self::Trolleybus,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bus => "bus",
            Self::NightBus => "night_bus",
            Self::Tram => "tram",
            Self::Trolleybus => "trolleybus",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vehicle observation, enriched with route metadata and the movement
/// distance since the previous run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSample {
    pub route_id: String,
    pub route_short_name: String,
    pub route_category: RouteCategory,
    pub vehicle_id: String,
    pub license_plate: String,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    /// Ground speed in km/h.
    pub speed: f64,
    /// Cumulative odometer reading in meters.
    pub odometer: f64,
    /// Meters travelled since the previous run; zero on first sighting.
    pub distance: f64,
    /// Capture time shared by every sample of the run (unix seconds).
    pub timestamp: i64,
}

/// Congestion index for one region at one capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionRecord {
    pub region: String,
    /// `100.0 * baseline / mean(values)`; lower means slower traffic.
    pub value: f64,
    pub timestamp: i64,
}

/// One `id -> count` row inside a static aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub id: String,
    pub value: i64,
}

/// A named count table derived from the static reference set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAggregate {
    pub name: String,
    pub entries: Vec<CountEntry>,
}

/// A scheduled arrival at a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub route_name: String,
    /// Raw `HH:MM:SS` string from the schedule; hours past 24 are legal.
    pub arrival_time: String,
    /// Seconds since the service day started.
    pub arrival_seconds: u32,
}

/// A stop with its schedule, as served to map clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub stop_id: String,
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub arrivals: Vec<Arrival>,
}

/// Which per-vehicle quantity congestion is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Speed,
    Distance,
}

impl Metric {
    /// The sample field this metric reads.
    pub fn value_of(&self, sample: &VehicleSample) -> f64 {
        match self {
            Self::Speed => sample.speed,
            Self::Distance => sample.distance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Distance => "distance",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown metric {0:?}, expected \"speed\" or \"distance\"")]
pub struct ParseMetricError(String);

impl FromStr for Metric {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "speed" => Ok(Self::Speed),
            "distance" => Ok(Self::Distance),
            other => Err(ParseMetricError(other.to_string())),
        }
    }
}
