//! K-means clustering with k-means++ initialization
//!
//! Used by the zone-clustering stage over 1-dimensional pickup frequencies,
//! but written against `Array2` so it works for any feature count.

use crate::error::{Result, TripcastError};
use ndarray::{Array1, Array2};
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeans {
    pub n_clusters: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub random_state: u64,
    centroids: Option<Array2<f64>>,
    is_fitted: bool,
}

impl KMeans {
    pub fn new(n_clusters: usize, random_state: u64) -> Self {
        Self {
            n_clusters,
            max_iter: 300,
            tol: 1e-4,
            random_state,
            centroids: None,
            is_fitted: false,
        }
    }

    fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }

    /// K-means++ seeding: spread initial centroids apart
    fn init_centroids(x: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
        let n = x.nrows();
        let mut centroids = Array2::zeros((k, x.ncols()));
        let first = (rng.next_u64() as usize) % n;
        centroids.row_mut(0).assign(&x.row(first));

        for c in 1..k {
            let dists: Vec<f64> = (0..n)
                .map(|i| {
                    (0..c)
                        .map(|j| {
                            Self::sq_dist(
                                x.row(i).as_slice().unwrap_or(&[]),
                                centroids.row(j).as_slice().unwrap_or(&[]),
                            )
                        })
                        .fold(f64::MAX, f64::min)
                })
                .collect();

            let total: f64 = dists.iter().sum();
            if total <= 0.0 {
                let idx = (rng.next_u64() as usize) % n;
                centroids.row_mut(c).assign(&x.row(idx));
                continue;
            }

            // Weighted draw proportional to squared distance
            let r = (rng.next_u64() as f64 / u64::MAX as f64) * total;
            let mut cumulative = 0.0;
            let mut chosen = n - 1;
            for (i, &d) in dists.iter().enumerate() {
                cumulative += d;
                if cumulative >= r {
                    chosen = i;
                    break;
                }
            }
            centroids.row_mut(c).assign(&x.row(chosen));
        }

        centroids
    }

    fn nearest(centroids: &Array2<f64>, point: &[f64]) -> usize {
        let mut best = 0;
        let mut best_dist = f64::MAX;
        for (c, row) in centroids.rows().into_iter().enumerate() {
            let d = Self::sq_dist(row.as_slice().unwrap_or(&[]), point);
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        best
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        let n = x.nrows();
        if n < self.n_clusters {
            return Err(TripcastError::TrainingError(format!(
                "n_samples ({n}) < n_clusters ({})",
                self.n_clusters
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut centroids = Self::init_centroids(x, self.n_clusters, &mut rng);
        let mut labels = vec![0usize; n];

        for _ in 0..self.max_iter {
            let new_labels: Vec<usize> = (0..n)
                .into_par_iter()
                .map(|i| Self::nearest(&centroids, x.row(i).as_slice().unwrap_or(&[])))
                .collect();

            let changed = new_labels
                .iter()
                .zip(labels.iter())
                .filter(|(a, b)| a != b)
                .count();
            labels = new_labels;

            // Recompute centroids; an emptied cluster is reseeded at random
            let mut sums = Array2::<f64>::zeros(centroids.dim());
            let mut counts = vec![0usize; self.n_clusters];
            for i in 0..n {
                let c = labels[i];
                counts[c] += 1;
                for j in 0..x.ncols() {
                    sums[[c, j]] += x[[i, j]];
                }
            }
            for c in 0..self.n_clusters {
                if counts[c] > 0 {
                    for j in 0..x.ncols() {
                        sums[[c, j]] /= counts[c] as f64;
                    }
                } else {
                    let idx = (rng.next_u64() as usize) % n;
                    sums.row_mut(c).assign(&x.row(idx));
                }
            }

            let shift: f64 = centroids
                .iter()
                .zip(sums.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            centroids = sums;

            if changed == 0 || shift < self.tol {
                break;
            }
        }

        self.centroids = Some(centroids);
        self.is_fitted = true;
        Ok(self)
    }

    /// Assign each row its nearest centroid's label
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<i64>> {
        let centroids = self.centroids.as_ref().ok_or(TripcastError::ModelNotFitted)?;
        let labels: Vec<i64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| Self::nearest(centroids, x.row(i).as_slice().unwrap_or(&[])) as i64)
            .collect();
        Ok(Array1::from_vec(labels))
    }

    pub fn fit_predict(&mut self, x: &Array2<f64>) -> Result<Array1<i64>> {
        self.fit(x)?;
        self.predict(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_two_clear_clusters() {
        let x = array![[1.0], [1.2], [0.9], [100.0], [99.0], [101.0]];
        let mut km = KMeans::new(2, 42);
        let labels = km.fit_predict(&x).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let x = array![[1.0], [5.0], [9.0], [13.0], [2.0], [10.0]];
        let a = KMeans::new(2, 7).fit_predict(&x).unwrap();
        let b = KMeans::new(2, 7).fit_predict(&x).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_samples() {
        let x = array![[1.0]];
        let mut km = KMeans::new(2, 42);
        assert!(km.fit(&x).is_err());
    }

    #[test]
    fn test_predict_before_fit() {
        let km = KMeans::new(2, 42);
        assert!(matches!(
            km.predict(&array![[1.0]]),
            Err(TripcastError::ModelNotFitted)
        ));
    }
}
