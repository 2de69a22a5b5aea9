//! Tripcast - Batch taxi-demand analytics pipeline
//!
//! Turns a raw taxi-trip table and an hourly weather feed into three
//! trained models and their evaluation reports:
//! - An hourly demand forecast (additive trend + seasonality model)
//! - A fare regressor (gradient-boosted trees)
//! - A trip-duration regressor (random forest)
//!
//! # Modules
//!
//! - [`config`] - YAML configuration document
//! - [`pipeline`] - Data stages: loading, cleaning, aggregation, joins
//! - [`training`] - Model implementations and evaluation metrics
//! - [`utils`] - Parquet/CSV/JSON IO helpers

pub mod config;
pub mod error;
pub mod pipeline;
pub mod training;
pub mod utils;

pub use config::PipelineConfig;
pub use error::{Result, TripcastError};
pub use pipeline::run;
