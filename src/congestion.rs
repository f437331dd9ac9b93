//! Per-region congestion index derived from one run's samples.

use std::collections::HashMap;

use tracing::debug;

use crate::model::{CongestionRecord, Metric, VehicleSample};
use crate::outliers::mean;
use crate::regions::RegionIndex;

/// Bucket each sample's metric value into every region containing it.
///
/// A sample inside two overlapping regions contributes to both; a sample
/// outside every region contributes nowhere.
pub fn group_by_region(
    samples: &[VehicleSample],
    index: &RegionIndex,
    metric: Metric,
) -> HashMap<String, Vec<f64>> {
    let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
    for sample in samples {
        let value = metric.value_of(sample);
        for region in index.locate(sample.latitude, sample.longitude) {
            groups.entry(region.to_string()).or_default().push(value);
        }
    }
    groups
}

/// Turn region buckets into congestion records.
///
/// Zero values (stationary vehicles, first sightings) are dropped per
/// region; a region whose bucket empties out produces no record at all.
/// `value = 100 * baseline / mean(values)`. The index is dimensionless and
/// has the same form for both metrics.
pub fn congestion_records(
    groups: &HashMap<String, Vec<f64>>,
    baseline: f64,
    timestamp: i64,
) -> Vec<CongestionRecord> {
    let mut records: Vec<CongestionRecord> = groups
        .iter()
        .filter_map(|(region, values)| {
            let moving: Vec<f64> = values.iter().copied().filter(|v| *v != 0.0).collect();
            if moving.is_empty() {
                debug!(region = %region, "no moving samples, skipping region");
                return None;
            }
            let avg = mean(&moving);
            if avg == 0.0 {
                debug!(region = %region, "zero average after filtering, skipping region");
                return None;
            }
            Some(CongestionRecord {
                region: region.clone(),
                value: 100.0 * baseline / avg,
                timestamp,
            })
        })
        .collect();
    records.sort_by(|a, b| a.region.cmp(&b.region));
    records
}
