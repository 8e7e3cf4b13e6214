//! PostgreSQL persistence for station records.
//!
//! The store owns the schema lifecycle and performs insert-or-ignore batch
//! writes keyed by the natural uniqueness constraint
//! `(name, station, last_updated)`. Re-ingesting an observation is a
//! silent no-op, never an update. The pool is explicitly constructed from
//! one connection string and explicitly closed; no process-exit hooks.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use gasprices_core::{StationRecord, StoredRecord};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

pub const CRATE_NAME: &str = "gasprices-store";

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS gasprices";

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS gasprices.prices (
    id BIGSERIAL PRIMARY KEY,
    created TIMESTAMPTZ NOT NULL DEFAULT now(),
    name TEXT NOT NULL,
    station TEXT NOT NULL,
    gas DOUBLE PRECISION,
    diesel DOUBLE PRECISION,
    lpg DOUBLE PRECISION,
    last_updated TIMESTAMP,
    location TEXT NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    CONSTRAINT uniq_name_station_last_updated UNIQUE (name, station, last_updated)
)
"#;

const CREATE_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_fuel_location ON gasprices.prices (location)",
    "CREATE INDEX IF NOT EXISTS idx_fuel_created ON gasprices.prices (created)",
];

const INSERT_PRICE: &str = r#"
INSERT INTO gasprices.prices
    (name, station, gas, diesel, lpg, last_updated, location, lat, lon)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (name, station, last_updated) DO NOTHING
"#;

const SELECT_RANGE: &str = r#"
SELECT created, name, station, gas, diesel, lpg, last_updated, location, lat, lon
  FROM gasprices.prices
 WHERE created >= $1 AND created <= $2
"#;

/// Handle to the prices table, scoped to one run or service process.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connects to the database. Connectivity failure here is fatal to the
    /// run; callers should not continue and silently lose data.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPool::connect(dsn)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    /// Creates the schema, table and secondary indexes if absent. Safe to
    /// run on every startup.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_SCHEMA)
            .execute(&self.pool)
            .await
            .context("creating schema")?;
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .context("creating prices table")?;
        for statement in CREATE_INDEXES {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("creating index")?;
        }
        debug!("schema ensured");
        Ok(())
    }

    /// Inserts a batch of records, silently skipping rows that conflict on
    /// `(name, station, last_updated)`. Partial success is normal; returns
    /// the number of rows actually inserted.
    pub async fn upsert_batch(&self, records: &[StationRecord]) -> Result<u64> {
        let mut inserted = 0;
        for record in records {
            let result = sqlx::query(INSERT_PRICE)
                .bind(&record.name)
                .bind(record.station_key())
                .bind(record.gas)
                .bind(record.diesel)
                .bind(record.lpg)
                .bind(record.last_updated)
                .bind(&record.location)
                .bind(record.lat)
                .bind(record.lon)
                .execute(&self.pool)
                .await
                .with_context(|| format!("inserting record for {}", record.name))?;
            inserted += result.rows_affected();
        }
        info!(
            batch = records.len(),
            inserted, "upsert batch committed"
        );
        Ok(inserted)
    }

    /// Returns all rows whose ingestion time falls within the trailing
    /// window `[now - days, now]`. Ordering is left to the caller.
    pub async fn query_range(&self, days: u32) -> Result<Vec<StoredRecord>> {
        let until = Utc::now();
        let since = until - Duration::days(i64::from(days));
        let rows = sqlx::query(SELECT_RANGE)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await
            .context("querying price range")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let created: DateTime<Utc> = row.try_get("created")?;
            let station: String = row.try_get("station")?;
            out.push(StoredRecord {
                created,
                record: StationRecord {
                    station: station_from_column(station),
                    name: row.try_get("name")?,
                    gas: row.try_get("gas")?,
                    diesel: row.try_get("diesel")?,
                    lpg: row.try_get("lpg")?,
                    last_updated: row.try_get("last_updated")?,
                    location: row.try_get("location")?,
                    lat: row.try_get("lat")?,
                    lon: row.try_get("lon")?,
                },
            });
        }
        Ok(out)
    }

    /// Closes the underlying pool. The store is unusable afterwards.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Inverse of [`StationRecord::station_key`]: the empty string stored for
/// brand-less records reads back as an absent brand.
fn station_from_column(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
