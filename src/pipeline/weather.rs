//! Weather normalization, hourly resampling, and the temporal join

use crate::error::{Result, TripcastError};
use crate::pipeline::schema::{self, column_epoch_seconds, column_f64, column_i64, floor_to_hour};
use crate::utils::io;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Load the raw weather table and resample it to hourly granularity.
///
/// Timestamps are floored to their hour. When two raw readings floor to the
/// same hour the later reading wins (a documented design choice, matching
/// the behavior of resampling the floored series). The result covers every
/// hour from the earliest to the latest observation; gaps and null readings
/// are filled by carrying the previous hour's value forward. Leading gaps
/// stay null here — they are only resolved at join time.
///
/// Absent `precip_mm`/`temp_c` columns are synthesized as all-zero before
/// resampling.
pub fn load_weather(path: &Path) -> Result<DataFrame> {
    let raw = io::read_csv(path)?;
    resample_weather(&raw)
}

/// Resample an in-memory weather table (split out for testability)
pub fn resample_weather(raw: &DataFrame) -> Result<DataFrame> {
    let weather_schema = schema::resolve_weather_schema(raw)?;

    let timestamps = column_epoch_seconds(raw, &weather_schema.timestamp)?;
    let precip: Vec<Option<f64>> = if weather_schema.has_precip {
        column_f64(raw, "precip_mm")?
    } else {
        vec![Some(0.0); raw.height()]
    };
    let temp: Vec<Option<f64>> = if weather_schema.has_temp {
        column_f64(raw, "temp_c")?
    } else {
        vec![Some(0.0); raw.height()]
    };

    // Last-wins per floored hour, in input row order
    let mut by_hour: HashMap<i64, (Option<f64>, Option<f64>)> = HashMap::new();
    let mut min_hour = i64::MAX;
    let mut max_hour = i64::MIN;
    for i in 0..raw.height() {
        if let Some(ts) = timestamps[i] {
            let hour = floor_to_hour(ts);
            by_hour.insert(hour, (precip[i], temp[i]));
            min_hour = min_hour.min(hour);
            max_hour = max_hour.max(hour);
        }
    }

    if by_hour.is_empty() {
        return Err(TripcastError::DataError(
            "weather table has no parseable timestamps".to_string(),
        ));
    }

    // Contiguous hourly index with forward-fill (no backward fill yet)
    let n_hours = ((max_hour - min_hour) / 3600 + 1) as usize;
    let mut hours = Vec::with_capacity(n_hours);
    let mut precip_out = Vec::with_capacity(n_hours);
    let mut temp_out = Vec::with_capacity(n_hours);
    let mut last_precip: Option<f64> = None;
    let mut last_temp: Option<f64> = None;

    let mut hour = min_hour;
    while hour <= max_hour {
        if let Some(&(p, t)) = by_hour.get(&hour) {
            if p.is_some() {
                last_precip = p;
            }
            if t.is_some() {
                last_temp = t;
            }
        }
        hours.push(hour);
        precip_out.push(last_precip);
        temp_out.push(last_temp);
        hour += 3600;
    }

    info!(
        hours = hours.len(),
        raw_rows = raw.height(),
        "resampled weather to hourly"
    );

    DataFrame::new(vec![
        Column::new("hour".into(), hours),
        Column::new("precip_mm".into(), precip_out),
        Column::new("temp_c".into(), temp_out),
    ])
    .map_err(|e| TripcastError::DataError(e.to_string()))
}

/// Left-join trips to the resampled weather series on hour-bucket.
///
/// Every trip row is retained. Missing precipitation becomes 0.0. Missing
/// temperature is forward-filled across the joined table's row order, then
/// backward-filled for leading rows, then 0.0 for anything still missing.
/// The fill chain runs in exactly that order; it deliberately operates over
/// trip rows rather than the weather time axis.
pub fn join_weather(trips: &DataFrame, weather: &DataFrame) -> Result<DataFrame> {
    let hours = column_i64(weather, "hour")?;
    let precip = column_f64(weather, "precip_mm")?;
    let temp = column_f64(weather, "temp_c")?;

    let mut by_hour: HashMap<i64, (Option<f64>, Option<f64>)> =
        HashMap::with_capacity(weather.height());
    for i in 0..weather.height() {
        if let Some(h) = hours[i] {
            by_hour.insert(h, (precip[i], temp[i]));
        }
    }

    let buckets = column_i64(trips, "pickup_hour")?;

    let mut precip_joined: Vec<f64> = Vec::with_capacity(trips.height());
    let mut temp_joined: Vec<Option<f64>> = Vec::with_capacity(trips.height());
    for bucket in &buckets {
        let matched = bucket.and_then(|b| by_hour.get(&b).copied());
        let (p, t) = matched.unwrap_or((None, None));
        precip_joined.push(p.unwrap_or(0.0));
        temp_joined.push(t);
    }

    // Forward-fill, then backward-fill, then zero
    let mut carry: Option<f64> = None;
    for t in temp_joined.iter_mut() {
        match t {
            Some(v) => carry = Some(*v),
            None => *t = carry,
        }
    }
    carry = None;
    for t in temp_joined.iter_mut().rev() {
        match t {
            Some(v) => carry = Some(*v),
            None => *t = carry,
        }
    }
    let temp_filled: Vec<f64> = temp_joined.into_iter().map(|t| t.unwrap_or(0.0)).collect();

    let mut out = trips.clone();
    out.with_column(Column::new("precip_mm".into(), precip_joined))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    out.with_column(Column::new("temp_c".into(), temp_filled))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;

    info!(rows = out.height(), "joined weather onto trips");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_weather_is_join_ready() {
        // load_weather resamples internally; its output feeds join_weather
        // directly, with no further schema resolution in between
        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        std::fs::write(
            file.path(),
            "timestamp,precip_mm,temp_c\n\
             1970-01-01 00:30:00,0.5,4.0\n\
             1970-01-01 02:00:00,1.5,6.0\n",
        )
        .unwrap();

        let weather = load_weather(file.path()).unwrap();
        assert_eq!(
            weather.get_column_names_str(),
            ["hour", "precip_mm", "temp_c"]
        );
        assert_eq!(weather.height(), 3);

        let trips = df!("pickup_hour" => &[3600i64, 7200]).unwrap();
        let joined = join_weather(&trips, &weather).unwrap();
        let precip = column_f64(&joined, "precip_mm").unwrap();
        // Hour 1 is a gap forward-filled from hour 0; hour 2 is observed
        assert_eq!(precip, vec![Some(0.5), Some(1.5)]);
    }

    #[test]
    fn test_resample_covers_full_range() {
        let raw = df!(
            "timestamp" => &["2023-01-01 00:10:00", "2023-01-01 05:59:00"],
            "precip_mm" => &[1.0, 2.0],
            "temp_c" => &[5.0, 6.0]
        )
        .unwrap();
        let weather = resample_weather(&raw).unwrap();
        // Hours 00..05 inclusive, no gaps
        assert_eq!(weather.height(), 6);
        let hours = column_i64(&weather, "hour").unwrap();
        for w in hours.windows(2) {
            assert_eq!(w[1].unwrap() - w[0].unwrap(), 3600);
        }
    }

    #[test]
    fn test_resample_forward_fills_gaps() {
        let raw = df!(
            "timestamp" => &["2023-01-01 00:00:00", "2023-01-01 03:00:00"],
            "precip_mm" => &[1.5, 3.0],
            "temp_c" => &[-2.0, -1.0]
        )
        .unwrap();
        let weather = resample_weather(&raw).unwrap();
        let temp = column_f64(&weather, "temp_c").unwrap();
        // Hours 1 and 2 carry hour 0's reading forward
        assert_eq!(temp, vec![Some(-2.0), Some(-2.0), Some(-2.0), Some(-1.0)]);
    }

    #[test]
    fn test_resample_duplicate_hours_last_wins() {
        let raw = df!(
            "timestamp" => &["2023-01-01 00:05:00", "2023-01-01 00:45:00"],
            "precip_mm" => &[1.0, 9.0],
            "temp_c" => &[5.0, 7.0]
        )
        .unwrap();
        let weather = resample_weather(&raw).unwrap();
        assert_eq!(weather.height(), 1);
        let precip = column_f64(&weather, "precip_mm").unwrap();
        assert_eq!(precip[0], Some(9.0));
    }

    #[test]
    fn test_resample_synthesizes_missing_columns() {
        let raw = df!(
            "datetime" => &["2023-01-01 00:00:00", "2023-01-01 01:00:00"]
        )
        .unwrap();
        let weather = resample_weather(&raw).unwrap();
        let precip = column_f64(&weather, "precip_mm").unwrap();
        let temp = column_f64(&weather, "temp_c").unwrap();
        assert!(precip.iter().all(|v| *v == Some(0.0)));
        assert!(temp.iter().all(|v| *v == Some(0.0)));
    }

    #[test]
    fn test_join_preserves_every_trip_row() {
        let trips = df!("pickup_hour" => &[0i64, 3600, 999_000_000]).unwrap();
        let weather = df!(
            "hour" => &[0i64],
            "precip_mm" => &[1.0],
            "temp_c" => &[4.0]
        )
        .unwrap();
        let joined = join_weather(&trips, &weather).unwrap();
        assert_eq!(joined.height(), trips.height());
    }

    #[test]
    fn test_fill_policy_scenario() {
        // Weather has hours 0 and 2; the trip at hour 1 must see hour 0's
        // temperature (forward-filled) and zero precipitation.
        let weather = df!(
            "hour" => &[0i64, 7200],
            "precip_mm" => &[1.0, 2.0],
            "temp_c" => &[10.0, 12.0]
        )
        .unwrap();
        let trips = df!("pickup_hour" => &[0i64, 3600, 7200]).unwrap();
        let joined = join_weather(&trips, &weather).unwrap();

        let precip = column_f64(&joined, "precip_mm").unwrap();
        let temp = column_f64(&joined, "temp_c").unwrap();
        assert_eq!(precip, vec![Some(1.0), Some(0.0), Some(2.0)]);
        assert_eq!(temp, vec![Some(10.0), Some(10.0), Some(12.0)]);
    }

    #[test]
    fn test_leading_temperature_backward_fill() {
        // First trip has no weather match; it takes the next row's value
        let weather = df!(
            "hour" => &[7200i64],
            "precip_mm" => &[0.5],
            "temp_c" => &[3.0]
        )
        .unwrap();
        let trips = df!("pickup_hour" => &[0i64, 7200]).unwrap();
        let joined = join_weather(&trips, &weather).unwrap();
        let temp = column_f64(&joined, "temp_c").unwrap();
        assert_eq!(temp, vec![Some(3.0), Some(3.0)]);
    }

    #[test]
    fn test_no_weather_at_all_zero_fills_temperature() {
        let weather = df!(
            "hour" => &Vec::<i64>::new(),
            "precip_mm" => &Vec::<f64>::new(),
            "temp_c" => &Vec::<f64>::new()
        )
        .unwrap();
        let trips = df!("pickup_hour" => &[0i64, 3600]).unwrap();
        let joined = join_weather(&trips, &weather).unwrap();
        let temp = column_f64(&joined, "temp_c").unwrap();
        let precip = column_f64(&joined, "precip_mm").unwrap();
        assert_eq!(temp, vec![Some(0.0), Some(0.0)]);
        assert_eq!(precip, vec![Some(0.0), Some(0.0)]);
    }
}
