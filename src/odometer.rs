//! Per-vehicle odometer state carried between runs through the cache.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::cache::{Cache, CacheError, ODOMETER_KEY};
use crate::model::VehicleSample;

/// The odometer readings committed by the previous run.
///
/// The cache entry expires after a few minutes, so after an outage every
/// vehicle is treated as freshly sighted instead of being credited with the
/// whole gap's mileage.
#[derive(Debug, Default, PartialEq)]
pub struct OdometerState {
    previous: HashMap<String, f64>,
}

impl OdometerState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(previous: HashMap<String, f64>) -> Self {
        Self { previous }
    }

    /// Read the previous run's state. A missing, expired or undecodable
    /// entry yields the empty state; only a backend failure is an error.
    pub async fn load(cache: &dyn Cache) -> Result<Self, CacheError> {
        let Some(raw) = cache.get(ODOMETER_KEY).await? else {
            return Ok(Self::empty());
        };
        match serde_json::from_str(&raw) {
            Ok(previous) => Ok(Self { previous }),
            Err(error) => {
                warn!(%error, "cached odometer state undecodable, starting empty");
                Ok(Self::empty())
            }
        }
    }

    /// Meters travelled since the previous run.
    ///
    /// An unknown vehicle defaults its previous reading to `current`, so
    /// first sightings and post-expiry sightings both report zero.
    pub fn delta(&self, vehicle_id: &str, current: f64) -> f64 {
        let previous = self.previous.get(vehicle_id).copied().unwrap_or(current);
        current - previous
    }

    /// Replace the cached state with the readings of this run's samples.
    ///
    /// Called only after the run's persists succeeded; a failed run leaves
    /// the previous state (and its remaining TTL) in place.
    pub async fn commit(
        cache: &dyn Cache,
        samples: &[VehicleSample],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let readings: HashMap<&str, f64> = samples
            .iter()
            .map(|s| (s.vehicle_id.as_str(), s.odometer))
            .collect();
        let encoded = serde_json::to_string(&readings)?;
        cache.set(ODOMETER_KEY, &encoded, ttl).await
    }
}
