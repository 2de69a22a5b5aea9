//! Random-forest regressor (bagged regression trees)
//!
//! Trains the trip-duration model. Trees grow in parallel on bootstrap
//! samples; per-tree seeds derive from the forest seed so runs are
//! reproducible.

use crate::error::{Result, TripcastError};
use crate::training::decision_tree::RegressionTree;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Fraction of features offered to each tree; 1.0 keeps them all
    pub max_features_fraction: f64,
    pub random_state: u64,
    trees: Vec<RegressionTree>,
    feature_importances: Option<Vec<f64>>,
    n_features: usize,
}

impl RandomForestRegressor {
    pub fn new(n_estimators: usize, random_state: u64) -> Self {
        Self {
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            max_features_fraction: 1.0,
            random_state,
            trees: Vec::new(),
            feature_importances: None,
            n_features: 0,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    pub fn with_max_features_fraction(mut self, fraction: f64) -> Self {
        self.max_features_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(TripcastError::ShapeError {
                expected: format!("{n_samples} targets"),
                actual: format!("{} targets", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(TripcastError::TrainingError(
                "cannot fit a forest on zero samples".to_string(),
            ));
        }

        self.n_features = n_features;
        let n_subset =
            ((n_features as f64 * self.max_features_fraction).ceil() as usize).clamp(1, n_features);

        let trees: Result<Vec<RegressionTree>> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let seed = self.random_state.wrapping_add(tree_idx as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);

                // Bootstrap sample with replacement
                let sample_indices: Vec<usize> = (0..n_samples)
                    .map(|_| (rng.next_u64() as usize) % n_samples)
                    .collect();
                let x_boot = x.select(Axis(0), &sample_indices);
                let y_boot =
                    Array1::from_vec(sample_indices.iter().map(|&i| y[i]).collect());

                let mut features: Vec<usize> = (0..n_features).collect();
                features.shuffle(&mut rng);
                features.truncate(n_subset);
                features.sort_unstable();

                let mut tree = RegressionTree::new()
                    .with_min_samples_split(self.min_samples_split)
                    .with_feature_subset(features);
                if let Some(d) = self.max_depth {
                    tree = tree.with_max_depth(d);
                }
                tree.fit(&x_boot, &y_boot)?;
                Ok(tree)
            })
            .collect();

        self.trees = trees?;
        self.compute_importances();
        Ok(self)
    }

    fn compute_importances(&mut self) {
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            if let Some(imp) = tree.feature_importances() {
                for (slot, &v) in totals.iter_mut().zip(imp.iter()) {
                    *slot += v;
                }
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            for v in &mut totals {
                *v /= sum;
            }
        }
        self.feature_importances = Some(totals);
    }

    /// Mean of the per-tree predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(TripcastError::ModelNotFitted);
        }

        let per_tree: Result<Vec<Array1<f64>>> =
            self.trees.par_iter().map(|tree| tree.predict(x)).collect();
        let per_tree = per_tree?;

        let n = x.nrows();
        let preds: Vec<f64> = (0..n)
            .map(|i| per_tree.iter().map(|p| p[i]).sum::<f64>() / per_tree.len() as f64)
            .collect();
        Ok(Array1::from_vec(preds))
    }

    /// Normalized impurity-decrease importances
    pub fn feature_importances(&self) -> Option<&[f64]> {
        self.feature_importances.as_deref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
