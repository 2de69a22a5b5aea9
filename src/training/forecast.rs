//! Hourly demand forecaster
//!
//! Additive model in the Prophet mold: a piecewise-linear trend (evenly
//! spaced changepoints, hinge basis) plus daily and weekly Fourier
//! seasonality blocks, fit jointly by ridge regression. The prior scales
//! from the configuration act as inverse L2 penalties on their blocks, so a
//! larger scale lets that block flex more.

use crate::error::{Result, TripcastError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

const SECONDS_PER_DAY: f64 = 86_400.0;
const SECONDS_PER_WEEK: f64 = 604_800.0;
/// Fourier order for both seasonality blocks
const FOURIER_ORDER: usize = 3;
const MAX_CHANGEPOINTS: usize = 20;
/// Changepoints live in the first 80% of the training range
const CHANGEPOINT_RANGE: f64 = 0.8;
/// Baseline ridge on the unpenalized trend terms, for numeric stability
const BASE_RIDGE: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalForecaster {
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub daily_seasonality: bool,
    pub weekly_seasonality: bool,
    // Fitted state
    t_start: i64,
    t_span: f64,
    changepoints: Vec<f64>,
    coefficients: Option<Vec<f64>>,
}

impl SeasonalForecaster {
    pub fn new(
        changepoint_prior_scale: f64,
        seasonality_prior_scale: f64,
        daily_seasonality: bool,
        weekly_seasonality: bool,
    ) -> Self {
        Self {
            changepoint_prior_scale,
            seasonality_prior_scale,
            daily_seasonality,
            weekly_seasonality,
            t_start: 0,
            t_span: 1.0,
            changepoints: Vec::new(),
            coefficients: None,
        }
    }

    /// Normalized trend time for an epoch-second timestamp
    fn scaled_time(&self, ts: i64) -> f64 {
        (ts - self.t_start) as f64 / self.t_span
    }

    fn design_row(&self, ts: i64) -> Vec<f64> {
        let t = self.scaled_time(ts);
        let mut row = Vec::with_capacity(self.n_terms());
        row.push(1.0);
        row.push(t);
        for &cp in &self.changepoints {
            row.push((t - cp).max(0.0));
        }
        if self.daily_seasonality {
            for k in 1..=FOURIER_ORDER {
                let angle = TAU * k as f64 * ts as f64 / SECONDS_PER_DAY;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }
        if self.weekly_seasonality {
            for k in 1..=FOURIER_ORDER {
                let angle = TAU * k as f64 * ts as f64 / SECONDS_PER_WEEK;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }
        row
    }

    fn n_terms(&self) -> usize {
        let mut n = 2 + self.changepoints.len();
        if self.daily_seasonality {
            n += 2 * FOURIER_ORDER;
        }
        if self.weekly_seasonality {
            n += 2 * FOURIER_ORDER;
        }
        n
    }

    /// Per-coefficient L2 penalties, aligned with [`Self::design_row`]
    fn penalties(&self) -> Vec<f64> {
        let cp_penalty = 1.0 / self.changepoint_prior_scale.max(1e-12);
        let seasonal_penalty = 1.0 / self.seasonality_prior_scale.max(1e-12);

        let mut p = vec![BASE_RIDGE, BASE_RIDGE];
        p.extend(std::iter::repeat(cp_penalty).take(self.changepoints.len()));
        let n_seasonal = self.n_terms() - p.len();
        p.extend(std::iter::repeat(seasonal_penalty).take(n_seasonal));
        p
    }

    /// Fit on an hourly series of (epoch-second timestamp, value) pairs
    pub fn fit(&mut self, ds: &[i64], y: &Array1<f64>) -> Result<&mut Self> {
        if ds.len() != y.len() {
            return Err(TripcastError::ShapeError {
                expected: format!("{} values", ds.len()),
                actual: format!("{} values", y.len()),
            });
        }
        if ds.len() < 3 {
            return Err(TripcastError::TrainingError(format!(
                "need at least 3 points to fit the forecaster, got {}",
                ds.len()
            )));
        }

        let min_ts = ds.iter().copied().min().unwrap_or(0);
        let max_ts = ds.iter().copied().max().unwrap_or(0);
        self.t_start = min_ts;
        self.t_span = ((max_ts - min_ts) as f64).max(1.0);

        let n_changepoints = MAX_CHANGEPOINTS.min(ds.len() / 4);
        self.changepoints = (1..=n_changepoints)
            .map(|i| CHANGEPOINT_RANGE * i as f64 / (n_changepoints + 1) as f64)
            .collect();

        let n_terms = self.n_terms();
        let mut x = Array2::zeros((ds.len(), n_terms));
        for (i, &ts) in ds.iter().enumerate() {
            for (j, v) in self.design_row(ts).into_iter().enumerate() {
                x[[i, j]] = v;
            }
        }

        // Ridge normal equations: (XᵀX + diag(penalties)) w = Xᵀy
        let mut xtx = x.t().dot(&x);
        for (j, penalty) in self.penalties().into_iter().enumerate() {
            xtx[[j, j]] += penalty;
        }
        let xty = x.t().dot(y);

        let coefficients = cholesky_solve(&xtx, &xty).ok_or_else(|| {
            TripcastError::TrainingError("normal equations are singular".to_string())
        })?;
        self.coefficients = Some(coefficients.to_vec());
        Ok(self)
    }

    /// Point predictions at arbitrary timestamps
    pub fn predict(&self, ds: &[i64]) -> Result<Array1<f64>> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or(TripcastError::ModelNotFitted)?;
        let preds: Vec<f64> = ds
            .iter()
            .map(|&ts| {
                self.design_row(ts)
                    .iter()
                    .zip(coefficients.iter())
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect();
        Ok(Array1::from_vec(preds))
    }
}

/// Solve the symmetric positive-definite system `Ax = b`
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L Lᵀ
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Lᵀ x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly(n: usize) -> Vec<i64> {
        (0..n as i64).map(|i| i * 3600).collect()
    }

    #[test]
    fn test_recovers_daily_cycle() {
        // Two weeks of a clean 24h sinusoid around a flat level
        let ds = hourly(24 * 14);
        let y: Array1<f64> = ds
            .iter()
            .map(|&ts| 100.0 + 20.0 * (TAU * ts as f64 / SECONDS_PER_DAY).sin())
            .collect();

        let mut model = SeasonalForecaster::new(0.05, 10.0, true, true);
        model.fit(&ds, &y).unwrap();
        let preds = model.predict(&ds).unwrap();

        let rmse = (preds
            .iter()
            .zip(y.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / y.len() as f64)
            .sqrt();
        assert!(rmse < 3.0, "rmse too high: {rmse}");
    }

    #[test]
    fn test_recovers_linear_trend() {
        let ds = hourly(24 * 7);
        let y: Array1<f64> = ds.iter().map(|&ts| 10.0 + ts as f64 / 3600.0).collect();

        let mut model = SeasonalForecaster::new(0.05, 10.0, false, false);
        model.fit(&ds, &y).unwrap();
        // Extrapolate one hour past the training range
        let next = *ds.last().unwrap() + 3600;
        let pred = model.predict(&[next]).unwrap();
        let expected = 10.0 + next as f64 / 3600.0;
        assert!(
            (pred[0] - expected).abs() < 5.0,
            "prediction {} far from {expected}",
            pred[0]
        );
    }

    #[test]
    fn test_deterministic() {
        let ds = hourly(100);
        let y: Array1<f64> = ds.iter().map(|&ts| (ts % 7200) as f64).collect();
        let mut a = SeasonalForecaster::new(0.05, 10.0, true, false);
        let mut b = SeasonalForecaster::new(0.05, 10.0, true, false);
        a.fit(&ds, &y).unwrap();
        b.fit(&ds, &y).unwrap();
        assert_eq!(a.predict(&ds).unwrap(), b.predict(&ds).unwrap());
    }

    #[test]
    fn test_too_few_points() {
        let mut model = SeasonalForecaster::new(0.05, 10.0, true, true);
        let y = Array1::from_vec(vec![1.0, 2.0]);
        assert!(model.fit(&[0, 3600], &y).is_err());
    }

    #[test]
    fn test_predict_before_fit() {
        let model = SeasonalForecaster::new(0.05, 10.0, true, true);
        assert!(matches!(
            model.predict(&[0]),
            Err(TripcastError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_seasonality_toggles_change_terms() {
        let with = SeasonalForecaster::new(0.05, 10.0, true, true);
        let without = SeasonalForecaster::new(0.05, 10.0, false, false);
        assert!(with.n_terms() > without.n_terms());
    }
}
