//! Gradient-boosted trees with second-order split scoring
//!
//! Trains the fare model. Split gain and leaf weights follow the
//! regularized second-order formulation:
//! gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) − (GL+GR)²/(HL+HR+λ)],
//! leaf weight w* = −G / (H + λ). With squared-error loss the gradient is
//! `pred − y` and the hessian is 1.

use crate::error::{Result, TripcastError};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub random_state: u64,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum BoostNode {
    Leaf {
        weight: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<BoostNode>,
        right: Box<BoostNode>,
    },
}

impl BoostNode {
    fn predict(&self, sample: &[f64]) -> f64 {
        match self {
            BoostNode::Leaf { weight } => *weight,
            BoostNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

fn build_tree(
    x: &Array2<f64>,
    grad: &Array1<f64>,
    hess: &Array1<f64>,
    indices: &[usize],
    features: &[usize],
    depth: usize,
    config: &BoostingConfig,
) -> BoostNode {
    let g_sum: f64 = indices.iter().map(|&i| grad[i]).sum();
    let h_sum: f64 = indices.iter().map(|&i| hess[i]).sum();
    let leaf_weight = -g_sum / (h_sum + config.reg_lambda);

    if depth >= config.max_depth || indices.len() < 2 || h_sum < config.min_child_weight {
        return BoostNode::Leaf {
            weight: leaf_weight,
        };
    }

    let best = features
        .par_iter()
        .filter_map(|&f| best_split_for_feature(x, grad, hess, indices, f, config))
        .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

    match best {
        Some((feature, threshold, gain)) if gain > 0.0 => {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
                indices.iter().partition(|&&i| x[[i, feature]] <= threshold);

            if left_idx.is_empty() || right_idx.is_empty() {
                return BoostNode::Leaf {
                    weight: leaf_weight,
                };
            }

            let left = build_tree(x, grad, hess, &left_idx, features, depth + 1, config);
            let right = build_tree(x, grad, hess, &right_idx, features, depth + 1, config);
            BoostNode::Split {
                feature,
                threshold,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => BoostNode::Leaf {
            weight: leaf_weight,
        },
    }
}

/// Exact greedy scan over one feature. Returns `(feature, threshold, gain)`.
fn best_split_for_feature(
    x: &Array2<f64>,
    grad: &Array1<f64>,
    hess: &Array1<f64>,
    indices: &[usize],
    feature: usize,
    config: &BoostingConfig,
) -> Option<(usize, f64, f64)> {
    let mut sorted: Vec<usize> = indices.to_vec();
    sorted.sort_by(|&a, &b| {
        x[[a, feature]]
            .partial_cmp(&x[[b, feature]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let g_total: f64 = sorted.iter().map(|&i| grad[i]).sum();
    let h_total: f64 = sorted.iter().map(|&i| hess[i]).sum();
    let lambda = config.reg_lambda;

    let mut g_left = 0.0;
    let mut h_left = 0.0;
    let mut best: Option<(usize, f64, f64)> = None;

    for pos in 0..sorted.len() - 1 {
        let idx = sorted[pos];
        g_left += grad[idx];
        h_left += hess[idx];

        let here = x[[idx, feature]];
        let next = x[[sorted[pos + 1], feature]];
        if (here - next).abs() < 1e-12 {
            continue;
        }

        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        if h_left < config.min_child_weight || h_right < config.min_child_weight {
            continue;
        }

        let gain = 0.5
            * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                - g_total * g_total / (h_total + lambda));

        if best.map_or(true, |(_, _, g)| gain > g) {
            best = Some((feature, (here + next) / 2.0, gain));
        }
    }

    best
}

fn subsample_indices(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = ((n as f64) * ratio).ceil().max(1.0) as usize;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k);
    indices.sort_unstable();
    indices
}

/// Boosted-trees regressor with squared-error loss
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedTreesRegressor {
    config: BoostingConfig,
    trees: Vec<BoostNode>,
    base_score: f64,
    n_features: usize,
}

impl BoostedTreesRegressor {
    pub fn new(config: BoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            n_features: 0,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(TripcastError::ShapeError {
                expected: format!("{n_samples} targets"),
                actual: format!("{} targets", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(TripcastError::TrainingError(
                "cannot fit a booster on zero samples".to_string(),
            ));
        }

        self.n_features = x.ncols();
        self.base_score = y.mean().unwrap_or(0.0);
        let mut preds = Array1::from_elem(n_samples, self.base_score);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        self.trees.clear();
        for _ in 0..self.config.n_estimators {
            let grad: Array1<f64> = &preds - y;
            let hess = Array1::from_elem(n_samples, 1.0);

            let rows = subsample_indices(&mut rng, n_samples, self.config.subsample);
            let cols = subsample_indices(&mut rng, x.ncols(), self.config.colsample_bytree);

            let tree = build_tree(x, &grad, &hess, &rows, &cols, 0, &self.config);

            // Out-of-sample rows advance too, on the shared prediction vector
            for i in 0..n_samples {
                let row = x.row(i);
                let update = match row.as_slice() {
                    Some(s) => tree.predict(s),
                    None => tree.predict(&row.to_vec()),
                };
                preds[i] += self.config.learning_rate * update;
            }

            self.trees.push(tree);
        }

        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(TripcastError::ModelNotFitted);
        }
        let preds: Vec<f64> = (0..x.nrows())
            .map(|i| {
                let row = x.row(i);
                let owned;
                let sample: &[f64] = match row.as_slice() {
                    Some(s) => s,
                    None => {
                        owned = row.to_vec();
                        &owned
                    }
                };
                self.base_score
                    + self
                        .trees
                        .iter()
                        .map(|t| self.config.learning_rate * t.predict(sample))
                        .sum::<f64>()
            })
            .collect();
        Ok(Array1::from_vec(preds))
    }

    /// Split-count importances, normalized over all trees
    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        if self.trees.is_empty() {
            return None;
        }
        let mut counts = vec![0.0; self.n_features];
        for tree in &self.trees {
            count_splits(tree, &mut counts);
        }
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            for c in &mut counts {
                *c /= total;
            }
        }
        Some(counts)
    }
}

fn count_splits(node: &BoostNode, counts: &mut [f64]) {
    if let BoostNode::Split {
        feature,
        left,
        right,
        ..
    } = node
    {
        if *feature < counts.len() {
            counts[*feature] += 1.0;
        }
        count_splits(left, counts);
        count_splits(right, counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let n = 80;
        let mut rows = Vec::with_capacity(n * 2);
        let mut targets = Vec::with_capacity(n);
        for i in 0..n {
            let a = i as f64 * 0.1;
            let b = ((i * 13) % 17) as f64;
            rows.push(a);
            rows.push(b);
            targets.push(2.0 * a + 0.5 * b + 1.0);
        }
        (
            Array2::from_shape_vec((n, 2), rows).unwrap(),
            Array1::from_vec(targets),
        )
    }

    #[test]
    fn test_fits_linear_signal() {
        let (x, y) = linear_data();
        let mut model = BoostedTreesRegressor::new(BoostingConfig {
            n_estimators: 80,
            learning_rate: 0.2,
            max_depth: 3,
            ..Default::default()
        });
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        let mse: f64 = preds
            .iter()
            .zip(y.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 1.0, "mse too high: {mse}");
    }

    #[test]
    fn test_reproducible_with_subsampling() {
        let (x, y) = linear_data();
        let config = BoostingConfig {
            n_estimators: 20,
            subsample: 0.8,
            colsample_bytree: 0.5,
            ..Default::default()
        };
        let mut a = BoostedTreesRegressor::new(config.clone());
        let mut b = BoostedTreesRegressor::new(config);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_importances_sum_to_one() {
        let (x, y) = linear_data();
        let mut model = BoostedTreesRegressor::new(BoostingConfig {
            n_estimators: 10,
            ..Default::default()
        });
        model.fit(&x, &y).unwrap();
        let imp = model.feature_importances().unwrap();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_predict_before_fit() {
        let model = BoostedTreesRegressor::new(BoostingConfig::default());
        assert!(matches!(
            model.predict(&array![[1.0]]),
            Err(TripcastError::ModelNotFitted)
        ));
    }
}
