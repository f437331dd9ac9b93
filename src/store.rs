//! SQLite-backed document store for samples, congestion series and the
//! static collections.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::model::{
    Arrival, CongestionRecord, CountEntry, Metric, StaticAggregate, StopRecord, VehicleSample,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vehicle_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    route_id TEXT NOT NULL,
    route_short_name TEXT NOT NULL,
    route_category TEXT NOT NULL,
    vehicle_id TEXT NOT NULL,
    license_plate TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    bearing REAL NOT NULL,
    speed REAL NOT NULL,
    odometer REAL NOT NULL,
    distance REAL NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vehicle_samples_timestamp
    ON vehicle_samples (timestamp);

CREATE TABLE IF NOT EXISTS congestion (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    region TEXT NOT NULL,
    value REAL NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_congestion_region_time
    ON congestion (region, timestamp DESC);

CREATE TABLE IF NOT EXISTS static_aggregates (
    name TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stops (
    stop_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    arrivals TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database and ensure the schema.
    ///
    /// The pool is capped at one connection: SQLite takes a single writer,
    /// and `sqlite::memory:` only stays one database that way.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn insert_samples(&self, samples: &[VehicleSample]) -> Result<(), sqlx::Error> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for sample in samples {
            sqlx::query(
                r#"
                INSERT INTO vehicle_samples
                    (route_id, route_short_name, route_category, vehicle_id,
                     license_plate, latitude, longitude, bearing, speed,
                     odometer, distance, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&sample.route_id)
            .bind(&sample.route_short_name)
            .bind(sample.route_category.as_str())
            .bind(&sample.vehicle_id)
            .bind(&sample.license_plate)
            .bind(sample.latitude)
            .bind(sample.longitude)
            .bind(sample.bearing)
            .bind(sample.speed)
            .bind(sample.odometer)
            .bind(sample.distance)
            .bind(sample.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    pub async fn insert_congestion(&self, records: &[CongestionRecord]) -> Result<(), sqlx::Error> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query("INSERT INTO congestion (region, value, timestamp) VALUES (?, ?, ?)")
                .bind(&record.region)
                .bind(record.value)
                .bind(record.timestamp)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    /// Non-zero values of the metric column observed within `window` of
    /// `now`; `None` means unbounded history.
    pub async fn recent_values(
        &self,
        metric: Metric,
        window: Option<Duration>,
        now: i64,
    ) -> Result<Vec<f64>, sqlx::Error> {
        let cutoff = window
            .map(|w| now.saturating_sub(w.as_secs() as i64))
            .unwrap_or(i64::MIN);
        // Column name comes from the enum, never from input.
        let column = metric.as_str();
        let sql = format!(
            "SELECT {column} FROM vehicle_samples WHERE {column} <> 0 AND timestamp >= ?"
        );
        let rows: Vec<(f64,)> = sqlx::query_as(&sql).bind(cutoff).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// Swap the whole aggregate collection in one transaction, so a reader
    /// sees either the previous set or the new one, never a partial mix.
    pub async fn replace_aggregates(
        &self,
        aggregates: &[StaticAggregate],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM static_aggregates")
            .execute(&mut *tx)
            .await?;
        for aggregate in aggregates {
            let data = encode_json(&aggregate.entries)?;
            sqlx::query("INSERT INTO static_aggregates (name, data) VALUES (?, ?)")
                .bind(&aggregate.name)
                .bind(data)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    /// Swap the stops collection in one transaction, like
    /// [`Store::replace_aggregates`].
    pub async fn replace_stops(&self, stops: &[StopRecord]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM stops").execute(&mut *tx).await?;
        for stop in stops {
            insert_stop(&mut tx, stop).await?;
        }
        tx.commit().await
    }

    pub async fn sample_count(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vehicle_samples")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Latest congestion records for a region, newest first.
    pub async fn congestion_for_region(
        &self,
        region: &str,
        limit: i64,
    ) -> Result<Vec<CongestionRecord>, sqlx::Error> {
        let rows: Vec<(String, f64, i64)> = sqlx::query_as(
            "SELECT region, value, timestamp FROM congestion \
             WHERE region = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(region)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(region, value, timestamp)| CongestionRecord {
                region,
                value,
                timestamp,
            })
            .collect())
    }

    pub async fn aggregate(&self, name: &str) -> Result<Option<StaticAggregate>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM static_aggregates WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(data,)| {
            let entries: Vec<CountEntry> = decode_json(&data)?;
            Ok(StaticAggregate {
                name: name.to_string(),
                entries,
            })
        })
        .transpose()
    }

    pub async fn stop(&self, stop_id: &str) -> Result<Option<StopRecord>, sqlx::Error> {
        let row: Option<(String, String, f64, f64, String)> = sqlx::query_as(
            "SELECT name, description, latitude, longitude, arrivals \
             FROM stops WHERE stop_id = ?",
        )
        .bind(stop_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(name, description, latitude, longitude, arrivals)| {
            let arrivals: Vec<Arrival> = decode_json(&arrivals)?;
            Ok(StopRecord {
                stop_id: stop_id.to_string(),
                name,
                description,
                latitude,
                longitude,
                arrivals,
            })
        })
        .transpose()
    }
}

async fn insert_stop(tx: &mut Transaction<'_, Sqlite>, stop: &StopRecord) -> Result<(), sqlx::Error> {
    let arrivals = encode_json(&stop.arrivals)?;
    sqlx::query(
        "INSERT INTO stops (stop_id, name, description, latitude, longitude, arrivals) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&stop.stop_id)
    .bind(&stop.name)
    .bind(&stop.description)
    .bind(stop.latitude)
    .bind(stop.longitude)
    .bind(arrivals)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, sqlx::Error> {
    serde_json::to_string(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
