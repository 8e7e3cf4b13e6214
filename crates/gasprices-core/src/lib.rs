//! Core domain model for the gas prices pipeline.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "gasprices-core";

/// One fuel-price observation for one station at one reported time.
///
/// Constructed only by the record extractor from a single page block and
/// immutable afterwards. `last_updated` is the time the source claims the
/// prices were current; the ingestion timestamp (`created`) is assigned by
/// the store at insert time and never travels with the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    /// Brand, when the source page separates it from the station name.
    pub station: Option<String>,
    pub name: String,
    pub gas: Option<f64>,
    pub diesel: Option<f64>,
    pub lpg: Option<f64>,
    /// Source-reported update time, midnight of the listed date.
    pub last_updated: Option<NaiveDateTime>,
    pub location: String,
    pub lat: f64,
    pub lon: f64,
}

impl StationRecord {
    pub fn has_any_price(&self) -> bool {
        self.gas.is_some() || self.diesel.is_some() || self.lpg.is_some()
    }

    /// A record carries information only if it has at least one price and a
    /// source-reported timestamp to place it on the time series. Everything
    /// else is dropped before persistence.
    pub fn is_persistable(&self) -> bool {
        self.has_any_price() && self.last_updated.is_some()
    }

    /// Brand column value as stored: `None` maps to the empty string so the
    /// uniqueness constraint applies uniformly (SQL NULLs compare distinct).
    pub fn station_key(&self) -> &str {
        self.station.as_deref().unwrap_or("")
    }
}

/// One row as read back from the store: a record plus its ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub record: StationRecord,
}
