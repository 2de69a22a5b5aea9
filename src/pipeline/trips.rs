//! Trip loading, temporal normalization, and the filter/feature stage

use crate::config::FilterConfig;
use crate::error::{Result, TripcastError};
use crate::pipeline::schema::{self, column_epoch_seconds, column_f64, column_i64, floor_to_hour};
use crate::utils::io;
use chrono::{DateTime, Datelike, Timelike};
use polars::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use tracing::info;

/// Seed for the optional reproducible subsample
const SAMPLE_SEED: u64 = 42;

/// Load the raw trip table, optionally capped to `sample_n_rows` rows.
///
/// The subsample is drawn without replacement with a fixed seed so repeated
/// runs see the same rows. Tables at or under the cap pass through untouched.
pub fn load_trips(path: &Path, sample_n_rows: Option<usize>) -> Result<DataFrame> {
    let df = io::read_parquet(path)?;
    info!(rows = df.height(), "loaded trip table");

    match sample_n_rows {
        Some(n) if df.height() > n => {
            let mut rng = ChaCha8Rng::seed_from_u64(SAMPLE_SEED);
            let mut indices: Vec<u32> = rand::seq::index::sample(&mut rng, df.height(), n)
                .into_iter()
                .map(|i| i as u32)
                .collect();
            indices.sort_unstable();
            let sampled = df
                .take(&IdxCa::from_vec("idx".into(), indices))
                .map_err(|e| TripcastError::DataError(e.to_string()))?;
            info!(rows = sampled.height(), "subsampled trip table");
            Ok(sampled)
        }
        _ => Ok(df),
    }
}

/// Parse pickup/dropoff timestamps and derive trip duration.
///
/// Adds canonical `pickup_ts`/`dropoff_ts` columns (epoch seconds) and
/// `trip_duration_min`. The input frame is not mutated.
pub fn normalize_timestamps(df: &DataFrame) -> Result<DataFrame> {
    let trip_schema = schema::resolve_trip_schema(df)?;

    let pickup = column_epoch_seconds(df, &trip_schema.pickup)?;
    let dropoff = column_epoch_seconds(df, &trip_schema.dropoff)?;

    let duration_min: Vec<Option<f64>> = pickup
        .iter()
        .zip(dropoff.iter())
        .map(|(p, d)| match (p, d) {
            (Some(p), Some(d)) => Some((d - p) as f64 / 60.0),
            _ => None,
        })
        .collect();

    let mut out = df.clone();
    out.with_column(Column::new("pickup_ts".into(), pickup))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    out.with_column(Column::new("dropoff_ts".into(), dropoff))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    out.with_column(Column::new("trip_duration_min".into(), duration_min))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    Ok(out)
}

/// Apply the validity predicates and derive calendar features.
///
/// A row survives iff `distance > min_distance`, `0 < fare <= max_fare`,
/// `passengers >= min_passengers` and `duration > 0`. Rows violating any
/// predicate are dropped, never repaired. Survivors gain `hour`, `weekday`
/// (0 = Monday), `is_weekend`, `day_type` and `pickup_hour` (the pickup
/// instant floored to its hour).
pub fn filter_and_derive(df: &DataFrame, filters: &FilterConfig) -> Result<DataFrame> {
    let trip_schema = schema::resolve_trip_schema(df)?;

    let fare_col = trip_schema.fare.as_deref().ok_or_else(|| {
        TripcastError::SchemaError("no fare column ('fare_amount' or 'fare') present".to_string())
    })?;
    let distance_col = trip_schema.distance.as_deref().ok_or_else(|| {
        TripcastError::SchemaError(
            "no distance column ('trip_distance' or 'distance') present".to_string(),
        )
    })?;

    let fares = column_f64(df, fare_col)?;
    let distances = column_f64(df, distance_col)?;
    let durations = column_f64(df, "trip_duration_min")?;
    let pickups = column_i64(df, "pickup_ts")?;

    // Missing passenger counts (column or value) default to 1 before comparison
    let passengers: Vec<i64> = match trip_schema.passenger.as_deref() {
        Some(name) => column_i64(df, name)?
            .into_iter()
            .map(|v| v.unwrap_or(1))
            .collect(),
        None => vec![1; df.height()],
    };

    let mask: Vec<bool> = (0..df.height())
        .map(|i| {
            let dist_ok = distances[i].is_some_and(|d| d > filters.min_distance);
            let fare_ok = fares[i].is_some_and(|f| f > 0.0 && f <= filters.max_fare);
            let pass_ok = passengers[i] >= filters.min_passengers;
            let dur_ok = durations[i].is_some_and(|d| d > 0.0);
            dist_ok && fare_ok && pass_ok && dur_ok
        })
        .collect();

    // Canonical numeric columns so downstream never sees the alias names
    let mut augmented = df.clone();
    augmented
        .with_column(Column::new("fare_amount".into(), fares))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    augmented
        .with_column(Column::new("trip_distance".into(), distances))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    augmented
        .with_column(Column::new("passenger_count".into(), passengers))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;

    let filtered = augmented
        .filter(&BooleanChunked::from_slice("mask".into(), &mask))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;

    info!(
        kept = filtered.height(),
        dropped = df.height() - filtered.height(),
        "applied trip validity filters"
    );

    // Calendar features from the (now guaranteed non-null) pickup instant
    let survivors: Vec<i64> = pickups
        .iter()
        .zip(mask.iter())
        .filter(|(_, keep)| **keep)
        .filter_map(|(ts, _)| *ts)
        .collect();

    let mut hours = Vec::with_capacity(survivors.len());
    let mut weekdays = Vec::with_capacity(survivors.len());
    let mut weekend_flags = Vec::with_capacity(survivors.len());
    let mut day_types = Vec::with_capacity(survivors.len());
    let mut pickup_hours = Vec::with_capacity(survivors.len());

    for &ts in &survivors {
        let dt = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
            TripcastError::DataError(format!("pickup timestamp {ts} out of range"))
        })?;
        let weekday = dt.weekday().num_days_from_monday() as i64;
        let is_weekend = i64::from(weekday >= 5);
        hours.push(dt.hour() as i64);
        weekdays.push(weekday);
        weekend_flags.push(is_weekend);
        day_types.push(if is_weekend == 1 { "weekend" } else { "weekday" });
        pickup_hours.push(floor_to_hour(ts));
    }

    let mut out = filtered;
    out.with_column(Column::new("hour".into(), hours))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    out.with_column(Column::new("weekday".into(), weekdays))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    out.with_column(Column::new("is_weekend".into(), weekend_flags))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    out.with_column(Column::new("day_type".into(), day_types))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    out.with_column(Column::new("pickup_hour".into(), pickup_hours))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    Ok(out)
}
