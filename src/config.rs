//! Pipeline configuration
//!
//! The YAML configuration document is parsed exactly once at startup into an
//! immutable [`PipelineConfig`] that is passed explicitly to each stage.
//! A missing required key fails here, before any data is read.

use crate::error::{Result, TripcastError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub output_dir: String,
    /// Optional reproducible row cap applied to the trip table before cleaning
    #[serde(default)]
    pub sample_n_rows: Option<usize>,
    pub data: DataConfig,
    pub filters: FilterConfig,
    pub clustering: ClusteringConfig,
    pub prophet: ForecastConfig,
    pub regression: RegressionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub trips_parquet_path: String,
    pub weather_csv_path: String,
}

/// Trip validity thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_fare: f64,
    pub min_distance: f64,
    pub min_passengers: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub n_clusters: usize,
    pub random_state: u64,
}

/// Demand forecaster knobs. The cutoffs bound the evaluation window:
/// metrics are computed over points with `train_end < ds <= test_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub daily_seasonality: bool,
    pub weekly_seasonality: bool,
    pub train_end: String,
    pub test_end: String,
}

impl ForecastConfig {
    pub fn train_end_ts(&self) -> Result<i64> {
        parse_cutoff(&self.train_end)
    }

    pub fn test_end_ts(&self) -> Result<i64> {
        parse_cutoff(&self.test_end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    pub test_size: f64,
    pub random_state: u64,
    pub xgboost: XgboostParams,
    pub random_forest: RandomForestParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XgboostParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl PipelineConfig {
    /// Load and validate the configuration document
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            TripcastError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: PipelineConfig = serde_yaml::from_str(text)
            .map_err(|e| TripcastError::ConfigError(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0 < self.regression.test_size && self.regression.test_size < 1.0) {
            return Err(TripcastError::ConfigError(format!(
                "regression.test_size must be in (0, 1), got {}",
                self.regression.test_size
            )));
        }
        if self.clustering.n_clusters == 0 {
            return Err(TripcastError::ConfigError(
                "clustering.n_clusters must be positive".to_string(),
            ));
        }
        // Cutoffs must parse and be ordered
        let train_end = self.prophet.train_end_ts()?;
        let test_end = self.prophet.test_end_ts()?;
        if test_end <= train_end {
            return Err(TripcastError::ConfigError(format!(
                "prophet.test_end ({}) must come after prophet.train_end ({})",
                self.prophet.test_end, self.prophet.train_end
            )));
        }
        Ok(())
    }
}

/// Parse a cutoff timestamp to epoch seconds. Accepts the space-separated
/// and the `T`-separated layout.
fn parse_cutoff(text: &str) -> Result<i64> {
    const FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp());
    }
    Err(TripcastError::ConfigError(format!(
        "cannot parse timestamp '{text}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
output_dir: out/
sample_n_rows: 1000
data:
  trips_parquet_path: data/trips.parquet
  weather_csv_path: data/weather.csv
filters:
  max_fare: 200.0
  min_distance: 0.1
  min_passengers: 1
clustering:
  n_clusters: 5
  random_state: 42
prophet:
  changepoint_prior_scale: 0.05
  seasonality_prior_scale: 10.0
  daily_seasonality: true
  weekly_seasonality: true
  train_end: "2023-01-25 00:00:00"
  test_end: "2023-01-31 23:00:00"
regression:
  test_size: 0.25
  random_state: 42
  xgboost:
    n_estimators: 50
    max_depth: 4
    learning_rate: 0.1
    subsample: 0.9
    colsample_bytree: 0.9
  random_forest:
    n_estimators: 50
    max_depth: 12
    min_samples_split: 4
"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = PipelineConfig::from_yaml_str(FULL).unwrap();
        assert_eq!(cfg.sample_n_rows, Some(1000));
        assert_eq!(cfg.filters.min_passengers, 1);
        assert_eq!(cfg.clustering.n_clusters, 5);
        assert!(cfg.prophet.daily_seasonality);
        assert_eq!(cfg.regression.xgboost.n_estimators, 50);
    }

    #[test]
    fn test_missing_required_key_is_fatal() {
        // Drop the filters block entirely
        let broken = FULL.replace("filters:", "filters_gone:");
        assert!(matches!(
            PipelineConfig::from_yaml_str(&broken),
            Err(TripcastError::ConfigError(_))
        ));
    }

    #[test]
    fn test_cutoff_ordering_checked() {
        let swapped = FULL
            .replace("2023-01-25 00:00:00", "2023-02-25 00:00:00");
        assert!(PipelineConfig::from_yaml_str(&swapped).is_err());
    }

    #[test]
    fn test_cutoff_parsing() {
        assert_eq!(parse_cutoff("1970-01-01 01:00:00").unwrap(), 3600);
        assert_eq!(parse_cutoff("1970-01-01T01:00:00").unwrap(), 3600);
        assert!(parse_cutoff("not a time").is_err());
    }

    #[test]
    fn test_sample_n_rows_optional() {
        let without = FULL.replace("sample_n_rows: 1000\n", "");
        let cfg = PipelineConfig::from_yaml_str(&without).unwrap();
        assert_eq!(cfg.sample_n_rows, None);
    }
}
