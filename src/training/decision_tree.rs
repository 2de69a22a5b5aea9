//! Regression decision tree (CART, variance-reduction splits)
//!
//! Base learner for the random forest. Splits minimize the weighted child
//! variance; candidate features can be restricted per tree so the forest
//! can decorrelate its members.

use crate::error::{Result, TripcastError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, sample: &[f64]) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Candidate features considered per split; `None` means all
    pub feature_subset: Option<Vec<usize>>,
    root: Option<TreeNode>,
    /// Total impurity decrease accumulated per feature during fit
    importances: Vec<f64>,
    n_features: usize,
}

impl Default for RegressionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RegressionTree {
    pub fn new() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            feature_subset: None,
            root: None,
            importances: Vec::new(),
            n_features: 0,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_feature_subset(mut self, features: Vec<usize>) -> Self {
        self.feature_subset = Some(features);
        self
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        if x.nrows() != y.len() {
            return Err(TripcastError::ShapeError {
                expected: format!("{} targets", x.nrows()),
                actual: format!("{} targets", y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(TripcastError::TrainingError(
                "cannot fit a tree on zero samples".to_string(),
            ));
        }

        self.n_features = x.ncols();
        self.importances = vec![0.0; x.ncols()];
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let features: Vec<usize> = match &self.feature_subset {
            Some(f) => f.clone(),
            None => (0..x.ncols()).collect(),
        };

        let mut importances = std::mem::take(&mut self.importances);
        let root = self.build(x, y, &indices, &features, 0, &mut importances);
        self.importances = importances;
        self.root = Some(root);
        Ok(self)
    }

    fn build(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        features: &[usize],
        depth: usize,
        importances: &mut [f64],
    ) -> TreeNode {
        let n = indices.len();
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / n as f64;

        let depth_exceeded = self.max_depth.is_some_and(|d| depth >= d);
        if depth_exceeded || n < self.min_samples_split {
            return TreeNode::Leaf { value: mean };
        }

        let parent_sse = indices.iter().map(|&i| (y[i] - mean).powi(2)).sum::<f64>();
        if parent_sse <= 1e-12 {
            return TreeNode::Leaf { value: mean };
        }

        let best = features
            .iter()
            .filter_map(|&f| self.best_split_for_feature(x, y, indices, f, parent_sse))
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((feature, threshold, decrease)) if decrease > 0.0 => {
                let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
                    indices.iter().partition(|&&i| x[[i, feature]] <= threshold);

                if left_idx.len() < self.min_samples_leaf || right_idx.len() < self.min_samples_leaf
                {
                    return TreeNode::Leaf { value: mean };
                }

                importances[feature] += decrease;

                let left = self.build(x, y, &left_idx, features, depth + 1, importances);
                let right = self.build(x, y, &right_idx, features, depth + 1, importances);
                TreeNode::Split {
                    feature,
                    threshold,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            _ => TreeNode::Leaf { value: mean },
        }
    }

    /// Best threshold for one feature via a sorted prefix-sum scan.
    /// Returns `(feature, threshold, sse_decrease)`.
    fn best_split_for_feature(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        feature: usize,
        parent_sse: f64,
    ) -> Option<(usize, f64, f64)> {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_by(|&a, &b| {
            x[[a, feature]]
                .partial_cmp(&x[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let n = sorted.len();
        let total_sum: f64 = sorted.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = sorted.iter().map(|&i| y[i] * y[i]).sum();

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        let mut best: Option<(usize, f64, f64)> = None;

        for pos in 0..n - 1 {
            let idx = sorted[pos];
            left_sum += y[idx];
            left_sq += y[idx] * y[idx];

            // No valid threshold between identical feature values
            let here = x[[idx, feature]];
            let next = x[[sorted[pos + 1], feature]];
            if (here - next).abs() < 1e-12 {
                continue;
            }

            let n_left = (pos + 1) as f64;
            let n_right = (n - pos - 1) as f64;
            if (pos + 1) < self.min_samples_leaf || (n - pos - 1) < self.min_samples_leaf {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse_left = left_sq - left_sum * left_sum / n_left;
            let sse_right = right_sq - right_sum * right_sum / n_right;
            let decrease = parent_sse - sse_left - sse_right;

            if best.map_or(true, |(_, _, d)| decrease > d) {
                best = Some((feature, (here + next) / 2.0, decrease));
            }
        }

        best
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(TripcastError::ModelNotFitted)?;
        let preds: Vec<f64> = (0..x.nrows())
            .map(|i| {
                let row = x.row(i);
                match row.as_slice() {
                    Some(s) => root.predict(s),
                    None => root.predict(&row.to_vec()),
                }
            })
            .collect();
        Ok(Array1::from_vec(preds))
    }

    /// Raw (unnormalized) impurity-decrease importances
    pub fn feature_importances(&self) -> Option<&[f64]> {
        if self.root.is_some() {
            Some(&self.importances)
        } else {
            None
        }
    }
}
