//! Hourly demand aggregation
//!
//! Collapses the filtered trip table into the `(ds, trip_count)` series the
//! demand forecaster trains on. Hours with no trips are absent from the
//! series; there is no zero-filling here.

use crate::error::{Result, TripcastError};
use crate::pipeline::schema::column_i64;
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

/// Group the filtered trips by hour-bucket and count rows per bucket.
///
/// The output has one row per distinct bucket, ascending, and is
/// deterministic regardless of the input row order.
pub fn aggregate_hourly(df: &DataFrame) -> Result<DataFrame> {
    let buckets = column_i64(df, "pickup_hour")?;

    let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
    for bucket in buckets.into_iter().flatten() {
        *counts.entry(bucket).or_insert(0) += 1;
    }

    let ds: Vec<i64> = counts.keys().copied().collect();
    let trip_count: Vec<i64> = counts.values().copied().collect();
    info!(hours = ds.len(), "aggregated hourly trip counts");

    DataFrame::new(vec![
        Column::new("ds".into(), ds),
        Column::new("trip_count".into(), trip_count),
    ])
    .map_err(|e| TripcastError::DataError(e.to_string()))
}
