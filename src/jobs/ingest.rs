//! The feed ingestion job: one cycle turns a feed snapshot into persisted
//! samples and congestion records.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::baseline::BaselineEstimator;
use crate::congestion::{congestion_records, group_by_region};
use crate::context::Context;
use crate::error::JobError;
use crate::jobs::{CycleOutcome, INGEST_LEASE, run_cycle};
use crate::model::{RouteCategory, VehicleSample};
use crate::odometer::OdometerState;
use crate::parser::{VehicleUpdate, decode_feed};
use crate::reference;
use crate::regions::RegionIndex;

/// What one successful run produced.
#[derive(Debug, PartialEq, Eq)]
pub struct RunReport {
    pub samples: usize,
    pub congested_regions: usize,
}

/// Run one ingest cycle under the ingest lease.
pub async fn run(ctx: &Context) -> CycleOutcome {
    run_cycle(
        ctx.cache.as_ref(),
        "ingest",
        INGEST_LEASE,
        ctx.config.ingest_max_attempts,
        ctx.config.retry_delay,
        ctx.config.run_budget,
        || run_once(ctx),
    )
    .await
}

/// One attempt: download, decode, enrich, aggregate, persist, then commit
/// the odometer state.
///
/// Reference tables and region polygons are re-read from disk on every
/// attempt, so a static refresh (or a half-written file that caused the
/// previous attempt to fail) is picked up without restarting the process.
/// The odometer commit comes strictly after both persists: a failed run
/// leaves the previous state untouched and the next run re-derives the
/// same deltas.
#[tracing::instrument(skip(ctx))]
pub async fn run_once(ctx: &Context) -> Result<RunReport, JobError> {
    let bytes = ctx.feed.fetch(&ctx.config.feed_url).await?;
    let updates = decode_feed(&bytes)?;
    if updates.is_empty() {
        return Err(JobError::EmptyResult);
    }

    let route_names = reference::route_names(&ctx.config.static_dir)?;
    let region_index = RegionIndex::load(&ctx.config.static_dir)?;
    let odometers = OdometerState::load(ctx.cache.as_ref()).await?;

    // One capture time for the whole run; every sample and congestion
    // record of this run carries it.
    let timestamp = Utc::now().timestamp();
    let samples = build_samples(updates, &route_names, &odometers, timestamp);
    let groups = group_by_region(&samples, &region_index, ctx.config.metric);

    let estimator = BaselineEstimator::new(ctx.cache.as_ref(), &ctx.store, &ctx.config);
    let records = match estimator.estimate(ctx.config.metric, timestamp).await {
        Ok(baseline) => congestion_records(&groups, baseline, timestamp),
        Err(error @ JobError::BaselineUnavailable { .. }) => {
            warn!(%error, "no baseline, skipping congestion output for this run");
            Vec::new()
        }
        Err(error) => return Err(error),
    };

    ctx.store.insert_samples(&samples).await?;
    ctx.store.insert_congestion(&records).await?;
    OdometerState::commit(ctx.cache.as_ref(), &samples, ctx.config.odometer_ttl).await?;

    info!(
        samples = samples.len(),
        regions = region_index.len(),
        congested_regions = records.len(),
        "collected feed snapshot"
    );

    Ok(RunReport {
        samples: samples.len(),
        congested_regions: records.len(),
    })
}

/// Join decoded updates with route metadata and previous odometer state.
///
/// An update whose route id is missing from the reference set keeps an
/// empty short name and falls into the catch-all category.
fn build_samples(
    updates: Vec<VehicleUpdate>,
    route_names: &HashMap<String, String>,
    odometers: &OdometerState,
    timestamp: i64,
) -> Vec<VehicleSample> {
    updates
        .into_iter()
        .map(|update| {
            let route_short_name = route_names
                .get(&update.route_id)
                .cloned()
                .unwrap_or_default();
            let distance = odometers.delta(&update.vehicle_id, update.odometer);
            VehicleSample {
                route_category: RouteCategory::from_short_name(&route_short_name),
                route_id: update.route_id,
                route_short_name,
                vehicle_id: update.vehicle_id,
                license_plate: update.license_plate,
                latitude: update.latitude,
                longitude: update.longitude,
                bearing: update.bearing,
                speed: update.speed_kmh,
                odometer: update.odometer,
                distance,
                timestamp,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(route_id: &str, vehicle_id: &str, odometer: f64) -> VehicleUpdate {
        VehicleUpdate {
            route_id: route_id.into(),
            vehicle_id: vehicle_id.into(),
            license_plate: "BC1234AB".into(),
            latitude: 49.84,
            longitude: 24.03,
            bearing: 90.0,
            speed_kmh: 18.0,
            odometer,
        }
    }

    #[test]
    fn test_build_samples_joins_and_derives() {
        let names = HashMap::from([("r1".to_string(), "Тр5".to_string())]);
        let odometers =
            OdometerState::from_map(HashMap::from([("v1".to_string(), 900.0)]));

        let samples = build_samples(
            vec![update("r1", "v1", 1000.0), update("r1", "v2", 500.0)],
            &names,
            &odometers,
            42,
        );

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].route_short_name, "Тр5");
        assert_eq!(samples[0].route_category, RouteCategory::Trolleybus);
        assert_eq!(samples[0].distance, 100.0);
        assert_eq!(samples[0].timestamp, 42);
        // First sighting of v2.
        assert_eq!(samples[1].distance, 0.0);
    }

    #[test]
    fn test_unknown_route_falls_back_to_other() {
        let names = HashMap::new();
        let odometers = OdometerState::empty();
        let samples = build_samples(vec![update("ghost", "v1", 10.0)], &names, &odometers, 0);

        assert_eq!(samples[0].route_short_name, "");
        assert_eq!(samples[0].route_category, RouteCategory::Other);
    }
}
