//! Schema resolution for the raw inputs
//!
//! Both input tables arrive with column names under one of two naming
//! conventions. Resolution is a single step returning a typed schema record,
//! so the rest of the pipeline only ever sees canonical names. A required
//! column absent under every known convention is a fatal schema error.

use crate::error::{Result, TripcastError};
use chrono::NaiveDateTime;
use polars::prelude::*;

/// Canonical view of the raw trip table
#[derive(Debug, Clone)]
pub struct TripSchema {
    pub pickup: String,
    pub dropoff: String,
    pub fare: Option<String>,
    pub distance: Option<String>,
    pub passenger: Option<String>,
    pub location: Option<String>,
}

/// Canonical view of the raw weather table
#[derive(Debug, Clone)]
pub struct WeatherSchema {
    pub timestamp: String,
    pub has_precip: bool,
    pub has_temp: bool,
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Pick the first present name from a list of alternatives
fn pick<'a>(df: &DataFrame, alternatives: &[&'a str]) -> Option<&'a str> {
    alternatives.iter().copied().find(|n| has_column(df, n))
}

/// Resolve the trip table column names.
///
/// The TLC convention (`tpep_*`) is preferred when both conventions match.
pub fn resolve_trip_schema(df: &DataFrame) -> Result<TripSchema> {
    let pickup = pick(df, &["tpep_pickup_datetime", "pickup_datetime"]);
    let dropoff = pick(df, &["tpep_dropoff_datetime", "dropoff_datetime"]);

    match (pickup, dropoff) {
        (Some(pickup), Some(dropoff)) => Ok(TripSchema {
            pickup: pickup.to_string(),
            dropoff: dropoff.to_string(),
            fare: pick(df, &["fare_amount", "fare"]).map(String::from),
            distance: pick(df, &["trip_distance", "distance"]).map(String::from),
            passenger: pick(df, &["passenger_count"]).map(String::from),
            location: pick(df, &["PULocationID"]).map(String::from),
        }),
        _ => Err(TripcastError::SchemaError(format!(
            "trip table must have pickup/dropoff timestamps under \
             tpep_pickup_datetime/tpep_dropoff_datetime or \
             pickup_datetime/dropoff_datetime; found columns: {:?}",
            df.get_column_names()
        ))),
    }
}

/// Resolve the weather table column names
pub fn resolve_weather_schema(df: &DataFrame) -> Result<WeatherSchema> {
    let timestamp = pick(df, &["timestamp", "datetime"]).ok_or_else(|| {
        TripcastError::SchemaError(format!(
            "weather table must have a 'timestamp' or 'datetime' column; \
             found columns: {:?}",
            df.get_column_names()
        ))
    })?;

    Ok(WeatherSchema {
        timestamp: timestamp.to_string(),
        has_precip: has_column(df, "precip_mm"),
        has_temp: has_column(df, "temp_c"),
    })
}

// ─── Typed column extraction ───────────────────────────────────────────────

/// Extract a timestamp column as epoch seconds.
///
/// Parquet trip columns arrive as `Datetime` in ns/µs/ms; weather CSV
/// timestamps usually infer as strings and are parsed with chrono.
pub fn column_epoch_seconds(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let column = df
        .column(name)
        .map_err(|_| TripcastError::SchemaError(format!("column '{name}' not found")))?;
    let series = column.as_materialized_series();

    match series.dtype() {
        DataType::Datetime(unit, _) => {
            let divisor = match unit {
                TimeUnit::Nanoseconds => 1_000_000_000,
                TimeUnit::Microseconds => 1_000_000,
                TimeUnit::Milliseconds => 1_000,
            };
            let physical = series
                .cast(&DataType::Int64)
                .map_err(|e| TripcastError::DataError(e.to_string()))?;
            let ca = physical
                .i64()
                .map_err(|e| TripcastError::DataError(e.to_string()))?;
            Ok(ca
                .into_iter()
                .map(|v| v.map(|t| t.div_euclid(divisor)))
                .collect())
        }
        DataType::Date => {
            let physical = series
                .cast(&DataType::Int64)
                .map_err(|e| TripcastError::DataError(e.to_string()))?;
            let ca = physical
                .i64()
                .map_err(|e| TripcastError::DataError(e.to_string()))?;
            Ok(ca
                .into_iter()
                .map(|v| v.map(|days| days * 86_400))
                .collect())
        }
        DataType::String => {
            let ca = series
                .str()
                .map_err(|e| TripcastError::DataError(e.to_string()))?;
            Ok(ca
                .into_iter()
                .map(|v| v.and_then(parse_timestamp))
                .collect())
        }
        DataType::Int64 => {
            // Already epoch seconds
            let ca = series
                .i64()
                .map_err(|e| TripcastError::DataError(e.to_string()))?;
            Ok(ca.into_iter().collect())
        }
        other => Err(TripcastError::DataError(format!(
            "column '{name}' has unsupported timestamp dtype {other:?}"
        ))),
    }
}

fn parse_timestamp(text: &str) -> Option<i64> {
    const FORMATS: [&str; 3] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    None
}

/// Extract a numeric column as `f64`, casting if needed
pub fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| TripcastError::SchemaError(format!("column '{name}' not found")))?;
    let series = column
        .as_materialized_series()
        .cast(&DataType::Float64)
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    let ca = series
        .f64()
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    Ok(ca.into_iter().collect())
}

/// Extract an integer column as `i64`, casting if needed
pub fn column_i64(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let column = df
        .column(name)
        .map_err(|_| TripcastError::SchemaError(format!("column '{name}' not found")))?;
    let series = column
        .as_materialized_series()
        .cast(&DataType::Int64)
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    let ca = series
        .i64()
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    Ok(ca.into_iter().collect())
}

/// Floor an epoch-second timestamp to the start of its containing hour
pub fn floor_to_hour(ts: i64) -> i64 {
    ts - ts.rem_euclid(3600)
}
