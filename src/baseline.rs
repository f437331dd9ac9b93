//! Reference-value estimation for the congestion index.

use tracing::{debug, info, warn};

use crate::cache::{BASELINE_DISTANCE_KEY, BASELINE_SPEED_KEY, Cache};
use crate::config::Config;
use crate::error::JobError;
use crate::model::Metric;
use crate::outliers::quantile_band;
use crate::store::Store;

fn cache_key(metric: Metric) -> &'static str {
    match metric {
        Metric::Speed => BASELINE_SPEED_KEY,
        Metric::Distance => BASELINE_DISTANCE_KEY,
    }
}

/// Computes (or recalls) the free-flow reference value for a metric.
///
/// The estimate is the minimum of the outlier-filtered pool of recent
/// non-zero observations, cached under the metric's key so consecutive runs
/// share one scalar instead of re-scanning the store.
pub struct BaselineEstimator<'a> {
    cache: &'a dyn Cache,
    store: &'a Store,
    config: &'a Config,
}

impl<'a> BaselineEstimator<'a> {
    pub fn new(cache: &'a dyn Cache, store: &'a Store, config: &'a Config) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    /// Estimate the baseline for `metric` as of `now` (unix seconds).
    ///
    /// Cache and store read failures degrade: the cache is bypassed, a dead
    /// store yields [`JobError::BaselineUnavailable`] so the run can carry
    /// on without congestion output instead of aborting.
    pub async fn estimate(&self, metric: Metric, now: i64) -> Result<f64, JobError> {
        let key = cache_key(metric);

        match self.cache.get(key).await {
            Ok(Some(raw)) => match raw.parse::<f64>() {
                Ok(value) => {
                    debug!(metric = %metric, value, "baseline served from cache");
                    return Ok(value);
                }
                Err(_) => {
                    warn!(metric = %metric, raw, "cached baseline unparsable, recomputing");
                }
            },
            Ok(None) => {}
            Err(error) => {
                warn!(metric = %metric, %error, "baseline cache read failed, recomputing");
            }
        }

        let pool = match self
            .store
            .recent_values(metric, self.config.baseline_window, now)
            .await
        {
            Ok(pool) => pool,
            Err(error) => {
                warn!(metric = %metric, %error, "baseline pool query failed");
                return Err(JobError::BaselineUnavailable {
                    metric: metric.as_str(),
                });
            }
        };

        let (low, high) = self.config.baseline_band(metric);
        let kept = quantile_band(&pool, low, high);
        let baseline = kept
            .iter()
            .copied()
            .min_by(|a, b| a.total_cmp(b))
            .filter(|b| *b > 0.0)
            .ok_or(JobError::BaselineUnavailable {
                metric: metric.as_str(),
            })?;

        info!(
            metric = %metric,
            pool = pool.len(),
            kept = kept.len(),
            baseline,
            "baseline computed"
        );

        if let Err(error) = self
            .cache
            .set(key, &baseline.to_string(), self.config.baseline_ttl(metric))
            .await
        {
            warn!(metric = %metric, %error, "failed to cache baseline");
        }

        Ok(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::model::{RouteCategory, VehicleSample};
    use std::time::Duration;

    fn sample(vehicle_id: &str, speed: f64, timestamp: i64) -> VehicleSample {
        VehicleSample {
            route_id: "r1".into(),
            route_short_name: "А18".into(),
            route_category: RouteCategory::Bus,
            vehicle_id: vehicle_id.into(),
            license_plate: "".into(),
            latitude: 0.0,
            longitude: 0.0,
            bearing: 0.0,
            speed,
            odometer: 0.0,
            distance: 0.0,
            timestamp,
        }
    }

    async fn store_with_speeds(speeds: &[f64]) -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let samples: Vec<_> = speeds
            .iter()
            .enumerate()
            .map(|(i, s)| sample(&format!("v{i}"), *s, 1_000))
            .collect();
        store.insert_samples(&samples).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_warm_cache_skips_pool() {
        // The store is empty, so any value can only come from the cache.
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let cache = MemoryCache::new();
        cache
            .set(BASELINE_SPEED_KEY, "12.5", Duration::from_secs(60))
            .await
            .unwrap();

        let config = Config::default();
        let estimator = BaselineEstimator::new(&cache, &store, &config);
        let baseline = estimator.estimate(Metric::Speed, 1_000).await.unwrap();
        assert_eq!(baseline, 12.5);
    }

    #[tokio::test]
    async fn test_cold_estimate_filters_and_caches() {
        let store = store_with_speeds(&[10.0, 20.0, 30.0, 40.0]).await;
        let cache = MemoryCache::new();
        let config = Config::default();

        let estimator = BaselineEstimator::new(&cache, &store, &config);
        // Band (0.10, 0.75) over [10, 20, 30, 40] keeps [20, 30].
        let baseline = estimator.estimate(Metric::Speed, 1_000).await.unwrap();
        assert_eq!(baseline, 20.0);

        let cached = cache.get(BASELINE_SPEED_KEY).await.unwrap().unwrap();
        assert_eq!(cached.parse::<f64>().unwrap(), 20.0);
    }

    #[tokio::test]
    async fn test_empty_pool_is_unavailable() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let cache = MemoryCache::new();
        let config = Config::default();

        let estimator = BaselineEstimator::new(&cache, &store, &config);
        let err = estimator.estimate(Metric::Distance, 1_000).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::BaselineUnavailable { metric: "distance" }
        ));
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn test_garbage_cache_entry_recomputes() {
        let store = store_with_speeds(&[10.0, 20.0, 30.0, 40.0]).await;
        let cache = MemoryCache::new();
        cache
            .set(BASELINE_SPEED_KEY, "not a number", Duration::from_secs(60))
            .await
            .unwrap();

        let config = Config::default();
        let estimator = BaselineEstimator::new(&cache, &store, &config);
        let baseline = estimator.estimate(Metric::Speed, 1_000).await.unwrap();
        assert_eq!(baseline, 20.0);
    }
}
