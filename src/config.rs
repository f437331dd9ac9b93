//! Runtime configuration, read once at startup from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};

use crate::model::Metric;

const DEFAULT_FEED_URL: &str = "http://track.ua-gis.com/gtfs/lviv/vehicle_position";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_DATABASE_URL: &str = "sqlite://jamwatch.db";
const DEFAULT_INGEST_INTERVAL_SECS: u64 = 60;
const DEFAULT_REBUILD_INTERVAL_SECS: u64 = 86_400;
const DEFAULT_RETRY_DELAY_SECS: u64 = 30;
const DEFAULT_RUN_BUDGET_SECS: u64 = 120;
const DEFAULT_BASELINE_WINDOW_SECS: u64 = 86_400;

/// Everything the jobs need to know, carried inside the context instead of
/// globals. Fields without an environment knob keep the defaults below.
#[derive(Debug, Clone)]
pub struct Config {
    /// Vehicle position feed endpoint (`FEED_URL`).
    pub feed_url: String,
    /// Directory holding the reference tables (`STATIC_DIR`).
    pub static_dir: PathBuf,
    /// SQLite database URL (`DATABASE_URL`).
    pub database_url: String,
    /// Redis URL (`REDIS_URL`); unset falls back to the in-process cache.
    pub redis_url: Option<String>,
    /// Observable the congestion index is computed over
    /// (`CONGESTION_METRIC`, `speed` or `distance`).
    pub metric: Metric,
    /// Ingest schedule period (`INGEST_INTERVAL_SECS`).
    pub ingest_interval: Duration,
    /// Static rebuild schedule period (`REBUILD_INTERVAL_SECS`).
    pub rebuild_interval: Duration,
    /// Attempts per ingest cycle before abandoning it.
    pub ingest_max_attempts: u32,
    /// Attempts per rebuild cycle before abandoning it.
    pub rebuild_max_attempts: u32,
    /// Pause between attempts of one cycle (`RETRY_DELAY_SECS`).
    pub retry_delay: Duration,
    /// Per-attempt execution budget (`RUN_BUDGET_SECS`).
    pub run_budget: Duration,
    /// Lifetime of the cached odometer state.
    pub odometer_ttl: Duration,
    /// Lifetime of the cached speed baseline.
    pub baseline_speed_ttl: Duration,
    /// Lifetime of the cached distance baseline.
    pub baseline_distance_ttl: Duration,
    /// History the baseline pool draws from (`BASELINE_WINDOW_SECS`,
    /// 0 = unbounded).
    pub baseline_window: Option<Duration>,
    /// Quantile band retained when estimating the speed baseline.
    pub speed_band: (f64, f64),
    /// Quantile band retained when estimating the distance baseline.
    pub distance_band: (f64, f64),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            redis_url: None,
            metric: Metric::Speed,
            ingest_interval: Duration::from_secs(DEFAULT_INGEST_INTERVAL_SECS),
            rebuild_interval: Duration::from_secs(DEFAULT_REBUILD_INTERVAL_SECS),
            ingest_max_attempts: 5,
            rebuild_max_attempts: 2,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            run_budget: Duration::from_secs(DEFAULT_RUN_BUDGET_SECS),
            odometer_ttl: Duration::from_secs(360),
            baseline_speed_ttl: Duration::from_secs(86_400),
            baseline_distance_ttl: Duration::from_secs(600),
            baseline_window: Some(Duration::from_secs(DEFAULT_BASELINE_WINDOW_SECS)),
            speed_band: (0.10, 0.75),
            distance_band: (0.25, 0.75),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let metric = match std::env::var("CONGESTION_METRIC") {
            Ok(raw) => raw.parse().context("CONGESTION_METRIC")?,
            Err(_) => defaults.metric,
        };

        let baseline_window = match env_u64("BASELINE_WINDOW_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.baseline_window,
        };

        let config = Self {
            feed_url: env_string("FEED_URL", defaults.feed_url),
            static_dir: PathBuf::from(env_string(
                "STATIC_DIR",
                defaults.static_dir.display().to_string(),
            )),
            database_url: env_string("DATABASE_URL", defaults.database_url),
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            metric,
            ingest_interval: env_duration("INGEST_INTERVAL_SECS", defaults.ingest_interval)?,
            rebuild_interval: env_duration("REBUILD_INTERVAL_SECS", defaults.rebuild_interval)?,
            retry_delay: env_duration("RETRY_DELAY_SECS", defaults.retry_delay)?,
            run_budget: env_duration("RUN_BUDGET_SECS", defaults.run_budget)?,
            baseline_window,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ingest_interval.is_zero() || self.rebuild_interval.is_zero() {
            bail!("schedule intervals must be positive");
        }
        if self.run_budget.is_zero() {
            bail!("RUN_BUDGET_SECS must be positive");
        }
        for (name, (low, high)) in [
            ("speed band", self.speed_band),
            ("distance band", self.distance_band),
        ] {
            if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
                bail!("{name} must satisfy 0 <= low < high <= 1, got ({low}, {high})");
            }
        }
        Ok(())
    }

    /// Quantile band for the metric's baseline pool.
    pub fn baseline_band(&self, metric: Metric) -> (f64, f64) {
        match metric {
            Metric::Speed => self.speed_band,
            Metric::Distance => self.distance_band,
        }
    }

    /// Cache lifetime of the metric's baseline scalar.
    pub fn baseline_ttl(&self, metric: Metric) -> Duration {
        match metric {
            Metric::Speed => self.baseline_speed_ttl,
            Metric::Distance => self.baseline_distance_ttl,
        }
    }
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse::<u64>()
                .with_context(|| format!("{name} must be an integer, got {raw:?}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn env_duration(name: &str, default: Duration) -> Result<Duration> {
    Ok(env_u64(name)?
        .map(Duration::from_secs)
        .unwrap_or(default))
}
