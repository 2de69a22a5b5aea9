//! End-to-end pipeline run
//!
//! Wires the stages together: load and clean the trip table, aggregate the
//! hourly demand series, join weather, assign zone clusters, train the three
//! models, and write every artifact under the configured output directory.
//! A run is fully determined by the configuration document, so repeating it
//! on the same inputs writes identical artifacts.

use crate::config::{ForecastConfig, PipelineConfig, RegressionConfig};
use crate::error::{Result, TripcastError};
use crate::pipeline::schema::{column_f64, column_i64, floor_to_hour};
use crate::pipeline::{hourly, trips, weather, zones};
use crate::training::{
    stratified_split, BoostedTreesRegressor, BoostingConfig, ForecastReport,
    RandomForestRegressor, RegressionReport, SeasonalForecaster,
};
use crate::utils::{ensure_dir, write_csv, write_json};
use chrono::DateTime;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Regressor feature columns, in matrix order
const FEATURE_NAMES: [&str; 6] = [
    "trip_distance",
    "hour",
    "is_weekend",
    "precip_mm",
    "temp_c",
    "zone_cluster",
];

/// The `metrics.json` document. Field order is fixed so repeated runs
/// produce byte-identical output.
#[derive(Debug, Serialize)]
pub struct MetricsDocument {
    pub prophet: ForecastReport,
    pub fare_xgboost: RegressionReport,
    pub duration_random_forest: RegressionReport,
}

pub fn run(config: &PipelineConfig) -> Result<MetricsDocument> {
    let output_dir = Path::new(&config.output_dir);
    ensure_dir(output_dir)?;
    let models_dir = output_dir.join("models");
    ensure_dir(&models_dir)?;

    let raw = trips::load_trips(
        Path::new(&config.data.trips_parquet_path),
        config.sample_n_rows,
    )?;
    let normalized = trips::normalize_timestamps(&raw)?;
    let cleaned = trips::filter_and_derive(&normalized, &config.filters)?;
    if cleaned.height() == 0 {
        return Err(TripcastError::DataError(
            "no trips survived the validity filters".to_string(),
        ));
    }

    let demand = hourly::aggregate_hourly(&cleaned)?;

    let weather_hourly = weather::load_weather(Path::new(&config.data.weather_csv_path))?;
    let enriched = weather::join_weather(&cleaned, &weather_hourly)?;
    let enriched = zones::add_zone_clusters(&enriched, &config.clustering)?;

    let (forecaster, mut forecast, forecast_report) =
        train_forecaster(&demand, &config.prophet)?;
    write_csv(&mut forecast, &output_dir.join("forecast_prophet.csv"))?;
    write_json(&forecaster, &models_dir.join("prophet_model.json"))?;
    info!(
        mape = forecast_report.mape,
        rmse = forecast_report.rmse,
        "evaluated demand forecast"
    );

    let (x, y_fare, y_duration, hours) = assemble_features(&enriched)?;
    let (train_idx, test_idx) =
        stratified_split(&hours, config.regression.test_size, config.regression.random_state)?;
    info!(
        train = train_idx.len(),
        test = test_idx.len(),
        "split regression rows stratified by hour"
    );

    let x_train = x.select(ndarray::Axis(0), &train_idx);
    let x_test = x.select(ndarray::Axis(0), &test_idx);

    let (fare_model, fare_report) = train_fare_model(
        &x_train,
        &x_test,
        &select_values(&y_fare, &train_idx),
        &select_values(&y_fare, &test_idx),
        &config.regression,
    )?;
    write_json(&fare_model, &models_dir.join("xgboost_fare.json"))?;

    let (duration_model, duration_report) = train_duration_model(
        &x_train,
        &x_test,
        &select_values(&y_duration, &train_idx),
        &select_values(&y_duration, &test_idx),
        &config.regression,
    )?;
    write_json(&duration_model, &models_dir.join("rf_duration.json"))?;

    let metrics = MetricsDocument {
        prophet: forecast_report,
        fare_xgboost: fare_report,
        duration_random_forest: duration_report,
    };
    write_json(&metrics, &output_dir.join("metrics.json"))?;
    info!(path = %output_dir.join("metrics.json").display(), "wrote metrics");
    Ok(metrics)
}

/// Fit the demand forecaster on the pre-cutoff series, predict the full
/// hourly grid through `test_end`, and score the held-out window.
fn train_forecaster(
    demand: &DataFrame,
    config: &ForecastConfig,
) -> Result<(SeasonalForecaster, DataFrame, ForecastReport)> {
    let train_end = config.train_end_ts()?;
    let test_end = config.test_end_ts()?;

    let ds = column_i64(demand, "ds")?;
    let counts = column_f64(demand, "trip_count")?;

    let ((train_ds, train_y), (eval_ds, eval_y)) =
        partition_series(&ds, &counts, train_end, test_end);
    if eval_ds.is_empty() {
        return Err(TripcastError::DataError(format!(
            "no demand observations in the evaluation window ({} .. {}]",
            config.train_end, config.test_end
        )));
    }

    let mut model = SeasonalForecaster::new(
        config.changepoint_prior_scale,
        config.seasonality_prior_scale,
        config.daily_seasonality,
        config.weekly_seasonality,
    );
    model.fit(&train_ds, &Array1::from_vec(train_y))?;
    info!(
        train_hours = train_ds.len(),
        eval_hours = eval_ds.len(),
        "fit demand forecaster"
    );

    // Full hourly grid from the first observed hour through test_end
    let series_start = train_ds
        .first()
        .copied()
        .ok_or_else(|| TripcastError::DataError("empty training series".to_string()))?;
    let grid: Vec<i64> = (series_start..=floor_to_hour(test_end))
        .step_by(3600)
        .collect();
    let yhat = model.predict(&grid)?;
    let ds_text: Vec<String> = grid
        .iter()
        .map(|&ts| format_hour(ts))
        .collect::<Result<_>>()?;
    let forecast = DataFrame::new(vec![
        Column::new("ds".into(), ds_text),
        Column::new("yhat".into(), yhat.to_vec()),
    ])
    .map_err(|e| TripcastError::DataError(e.to_string()))?;

    let eval_pred = model.predict(&eval_ds)?;
    let report = ForecastReport::compute(&Array1::from_vec(eval_y), &eval_pred)?;
    Ok((model, forecast, report))
}

/// Split the demand series at the cutoffs: points with `ds <= train_end`
/// train the forecaster, points with `train_end < ds <= test_end` score it,
/// later points are ignored.
fn partition_series(
    ds: &[Option<i64>],
    counts: &[Option<f64>],
    train_end: i64,
    test_end: i64,
) -> ((Vec<i64>, Vec<f64>), (Vec<i64>, Vec<f64>)) {
    let mut train_ds = Vec::new();
    let mut train_y = Vec::new();
    let mut eval_ds = Vec::new();
    let mut eval_y = Vec::new();
    for (ts, count) in ds.iter().zip(counts.iter()) {
        let (Some(ts), Some(count)) = (ts, count) else {
            continue;
        };
        if *ts <= train_end {
            train_ds.push(*ts);
            train_y.push(*count);
        } else if *ts <= test_end {
            eval_ds.push(*ts);
            eval_y.push(*count);
        }
    }
    ((train_ds, train_y), (eval_ds, eval_y))
}

/// Pull the regressor features and both targets out of the enriched trip
/// table, dropping any row with a missing value.
fn assemble_features(
    df: &DataFrame,
) -> Result<(Array2<f64>, Vec<f64>, Vec<f64>, Vec<i64>)> {
    let columns: Vec<Vec<Option<f64>>> = FEATURE_NAMES
        .iter()
        .map(|name| column_f64(df, name))
        .collect::<Result<_>>()?;
    let fares = column_f64(df, "fare_amount")?;
    let durations = column_f64(df, "trip_duration_min")?;
    let hours = column_i64(df, "hour")?;

    let n_rows = df.height();
    let mut rows = Vec::new();
    let mut y_fare = Vec::new();
    let mut y_duration = Vec::new();
    let mut strata = Vec::new();
    for i in 0..n_rows {
        let features: Option<Vec<f64>> = columns.iter().map(|col| col[i]).collect();
        let (Some(features), Some(fare), Some(duration), Some(hour)) =
            (features, fares[i], durations[i], hours[i])
        else {
            continue;
        };
        rows.push(features);
        y_fare.push(fare);
        y_duration.push(duration);
        strata.push(hour);
    }
    if rows.is_empty() {
        return Err(TripcastError::DataError(
            "no complete rows available for regression".to_string(),
        ));
    }
    if rows.len() < n_rows {
        warn!(
            dropped = n_rows - rows.len(),
            "dropped rows with missing regression features"
        );
    }

    let mut x = Array2::zeros((rows.len(), FEATURE_NAMES.len()));
    for (i, row) in rows.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            x[[i, j]] = *value;
        }
    }
    Ok((x, y_fare, y_duration, strata))
}

fn train_fare_model(
    x_train: &Array2<f64>,
    x_test: &Array2<f64>,
    y_train: &Array1<f64>,
    y_test: &Array1<f64>,
    config: &RegressionConfig,
) -> Result<(BoostedTreesRegressor, RegressionReport)> {
    let params = BoostingConfig {
        n_estimators: config.xgboost.n_estimators,
        learning_rate: config.xgboost.learning_rate,
        max_depth: config.xgboost.max_depth,
        subsample: config.xgboost.subsample,
        colsample_bytree: config.xgboost.colsample_bytree,
        random_state: config.random_state,
        ..BoostingConfig::default()
    };
    let mut model = BoostedTreesRegressor::new(params);
    model.fit(x_train, y_train)?;
    log_importances("fare model", model.feature_importances().as_deref());

    let report = RegressionReport::compute(y_test, &model.predict(x_test)?)?;
    info!(
        mae = report.mae,
        rmse = report.rmse,
        r2 = report.r2,
        "evaluated fare model"
    );
    Ok((model, report))
}

fn train_duration_model(
    x_train: &Array2<f64>,
    x_test: &Array2<f64>,
    y_train: &Array1<f64>,
    y_test: &Array1<f64>,
    config: &RegressionConfig,
) -> Result<(RandomForestRegressor, RegressionReport)> {
    let mut model =
        RandomForestRegressor::new(config.random_forest.n_estimators, config.random_state)
            .with_max_depth(config.random_forest.max_depth)
            .with_min_samples_split(config.random_forest.min_samples_split);
    model.fit(x_train, y_train)?;
    log_importances("duration model", model.feature_importances());

    let report = RegressionReport::compute(y_test, &model.predict(x_test)?)?;
    info!(
        mae = report.mae,
        rmse = report.rmse,
        r2 = report.r2,
        "evaluated duration model"
    );
    Ok((model, report))
}

fn log_importances(model: &str, importances: Option<&[f64]>) {
    let Some(importances) = importances else {
        return;
    };
    for (name, value) in FEATURE_NAMES.iter().zip(importances) {
        info!(model, feature = name, importance = value, "feature importance");
    }
}

fn select_values(values: &[f64], indices: &[usize]) -> Array1<f64> {
    indices.iter().map(|&i| values[i]).collect()
}

fn format_hour(ts: i64) -> Result<String> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .ok_or_else(|| TripcastError::DataError(format!("timestamp {ts} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_excludes_train_end_from_evaluation() {
        let ds: Vec<Option<i64>> = (0..6).map(|h| Some(h * 3600)).collect();
        let counts: Vec<Option<f64>> = (0..6).map(|h| Some(h as f64)).collect();

        // Cutoff lands exactly on an observed hour
        let ((train_ds, _), (eval_ds, eval_y)) =
            partition_series(&ds, &counts, 2 * 3600, 4 * 3600);
        assert_eq!(train_ds, vec![0, 3600, 7200]);
        assert_eq!(eval_ds, vec![3 * 3600, 4 * 3600]);
        assert_eq!(eval_y, vec![3.0, 4.0]);
    }

    #[test]
    fn test_partition_skips_null_observations() {
        let ds = vec![Some(0i64), None, Some(7200)];
        let counts = vec![Some(1.0), Some(2.0), None];
        let ((train_ds, train_y), (eval_ds, _)) = partition_series(&ds, &counts, 3600, 7200);
        assert_eq!(train_ds, vec![0]);
        assert_eq!(train_y, vec![1.0]);
        assert!(eval_ds.is_empty());
    }

    #[test]
    fn test_format_hour() {
        assert_eq!(format_hour(0).unwrap(), "1970-01-01 00:00:00");
        assert_eq!(format_hour(3600).unwrap(), "1970-01-01 01:00:00");
    }

    #[test]
    fn test_assemble_features_drops_incomplete_rows() {
        let df = df!(
            "trip_distance" => [Some(1.0), None, Some(2.0)],
            "hour" => [8i64, 9, 10],
            "is_weekend" => [0i64, 0, 1],
            "precip_mm" => [0.0f64, 0.5, 1.0],
            "temp_c" => [10.0f64, 11.0, 12.0],
            "zone_cluster" => [0i64, 1, 2],
            "fare_amount" => [10.0f64, 11.0, 12.0],
            "trip_duration_min" => [5.0f64, 6.0, 7.0],
        )
        .unwrap();

        let (x, y_fare, y_duration, strata) = assemble_features(&df).unwrap();
        assert_eq!(x.nrows(), 2);
        assert_eq!(y_fare, vec![10.0, 12.0]);
        assert_eq!(y_duration, vec![5.0, 7.0]);
        assert_eq!(strata, vec![8, 10]);
    }

    #[test]
    fn test_assemble_features_requires_complete_rows() {
        let df = df!(
            "trip_distance" => [Option::<f64>::None],
            "hour" => [8i64],
            "is_weekend" => [0i64],
            "precip_mm" => [0.0f64],
            "temp_c" => [10.0f64],
            "zone_cluster" => [0i64],
            "fare_amount" => [10.0f64],
            "trip_duration_min" => [5.0f64],
        )
        .unwrap();
        assert!(assemble_features(&df).is_err());
    }
}
