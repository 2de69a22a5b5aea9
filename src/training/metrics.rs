//! Regression and forecast error metrics

use crate::error::{Result, TripcastError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Guard against division by values near zero in MAPE
const MAPE_EPS: f64 = 1e-8;

/// Held-out metrics for the fare and duration regressors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionReport {
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
    #[serde(rename = "R2")]
    pub r2: f64,
}

/// Test-window metrics for the demand forecaster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastReport {
    #[serde(rename = "MAPE")]
    pub mape: f64,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
}

fn check_lengths(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(TripcastError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    if y_true.is_empty() {
        return Err(TripcastError::DataError(
            "cannot compute metrics over an empty set".to_string(),
        ));
    }
    Ok(())
}

impl RegressionReport {
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Self> {
        check_lengths(y_true, y_pred)?;
        let n = y_true.len() as f64;

        let errors: Vec<f64> = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| t - p)
            .collect();

        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let mse = errors.iter().map(|e| e * e).sum::<f64>() / n;

        let y_mean = y_true.iter().sum::<f64>() / n;
        let ss_tot: f64 = y_true.iter().map(|y| (y - y_mean).powi(2)).sum();
        let ss_res: f64 = errors.iter().map(|e| e.powi(2)).sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        Ok(Self {
            mae,
            rmse: mse.sqrt(),
            r2,
        })
    }
}

impl ForecastReport {
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Self> {
        check_lengths(y_true, y_pred)?;
        let n = y_true.len() as f64;
        let mse = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| (t - p).powi(2))
            .sum::<f64>()
            / n;
        Ok(Self {
            mape: mape(y_true, y_pred),
            rmse: mse.sqrt(),
        })
    }
}

/// Mean absolute percentage error, in percent
pub fn mape(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let n = y_true.len() as f64;
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| ((t - p) / t.abs().max(MAPE_EPS)).abs())
        .sum::<f64>()
        / n
        * 100.0
}
