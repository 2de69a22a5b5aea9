//! Pickup-zone clustering
//!
//! Groups pickup locations by aggregate trip frequency (not geography) and
//! attaches the cluster label as a categorical feature.

use crate::config::ClusteringConfig;
use crate::error::{Result, TripcastError};
use crate::pipeline::schema::column_i64;
use crate::training::clustering::KMeans;
use ndarray::Array2;
use polars::prelude::*;
use std::collections::HashMap;
use tracing::{info, warn};

/// Sentinel for rows whose location id is unknown or unassigned
pub const UNASSIGNED: i64 = -1;

/// Attach a `zone_cluster` column derived from pickup frequency.
///
/// A missing `PULocationID` column collapses every row onto the sentinel id,
/// which then forms a single-location frequency table. When there are fewer
/// distinct locations than requested clusters the cluster count is clamped
/// so a tiny table still gets labels instead of failing.
pub fn add_zone_clusters(df: &DataFrame, config: &ClusteringConfig) -> Result<DataFrame> {
    let has_location = df
        .get_column_names()
        .iter()
        .any(|c| c.as_str() == "PULocationID");

    let locations: Vec<i64> = if has_location {
        column_i64(df, "PULocationID")?
            .into_iter()
            .map(|v| v.unwrap_or(UNASSIGNED))
            .collect()
    } else {
        warn!("no PULocationID column; all rows share one sentinel zone");
        vec![UNASSIGNED; df.height()]
    };

    // Pickup frequency per distinct location id
    let mut frequency: HashMap<i64, f64> = HashMap::new();
    for &loc in &locations {
        *frequency.entry(loc).or_insert(0.0) += 1.0;
    }

    // Fixed iteration order so centroid seeding is reproducible
    let mut ids: Vec<i64> = frequency.keys().copied().collect();
    ids.sort_unstable();

    let n_clusters = config.n_clusters.min(ids.len());
    if n_clusters < config.n_clusters {
        warn!(
            requested = config.n_clusters,
            effective = n_clusters,
            "fewer distinct locations than clusters; clamping"
        );
    }

    let counts =
        Array2::from_shape_vec((ids.len(), 1), ids.iter().map(|id| frequency[id]).collect())
            .map_err(|e| TripcastError::TrainingError(e.to_string()))?;

    let labels = KMeans::new(n_clusters, config.random_state).fit_predict(&counts)?;
    let by_location: HashMap<i64, i64> = ids
        .iter()
        .zip(labels.iter())
        .map(|(&id, &label)| (id, label))
        .collect();

    let cluster_column: Vec<i64> = locations
        .iter()
        .map(|loc| by_location.get(loc).copied().unwrap_or(UNASSIGNED))
        .collect();

    info!(
        locations = ids.len(),
        clusters = n_clusters,
        "assigned zone clusters"
    );

    let mut out = df.clone();
    out.with_column(Column::new("zone_cluster".into(), cluster_column))
        .map_err(|e| TripcastError::DataError(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n_clusters: usize) -> ClusteringConfig {
        ClusteringConfig {
            n_clusters,
            random_state: 42,
        }
    }

    #[test]
    fn test_frequency_clusters() {
        // Location A appears 100 times, B once, C 99 times. With two
        // clusters, A and C must share one and B gets the other.
        let mut locs = Vec::new();
        locs.extend(std::iter::repeat(10i64).take(100)); // A
        locs.push(20); // B
        locs.extend(std::iter::repeat(30i64).take(99)); // C
        let df = df!("PULocationID" => &locs).unwrap();

        let clustered = add_zone_clusters(&df, &config(2)).unwrap();
        let labels = column_i64(&clustered, "zone_cluster").unwrap();

        let label_a = labels[0].unwrap();
        let label_b = labels[100].unwrap();
        let label_c = labels[101].unwrap();
        assert_eq!(label_a, label_c);
        assert_ne!(label_a, label_b);
    }

    #[test]
    fn test_missing_location_column_uses_sentinel() {
        let df = df!("fare_amount" => &[10.0, 20.0]).unwrap();
        let clustered = add_zone_clusters(&df, &config(5)).unwrap();
        let labels = column_i64(&clustered, "zone_cluster").unwrap();
        // One sentinel location, one (clamped) cluster: both rows share it
        assert_eq!(labels[0], labels[1]);
        assert!(labels[0].is_some());
    }

    #[test]
    fn test_null_location_gets_sentinel_id() {
        let df = df!("PULocationID" => &[Some(5i64), None, Some(5)]).unwrap();
        let clustered = add_zone_clusters(&df, &config(2)).unwrap();
        let labels = column_i64(&clustered, "zone_cluster").unwrap();
        assert_eq!(labels[0], labels[2]);
        // The null row maps through the sentinel id and still gets a label
        assert!(labels[1].is_some());
    }

    #[test]
    fn test_deterministic_given_seed() {
        let df = df!("PULocationID" => &[1i64, 1, 2, 3, 3, 3, 4, 4]).unwrap();
        let a = add_zone_clusters(&df, &config(2)).unwrap();
        let b = add_zone_clusters(&df, &config(2)).unwrap();
        assert!(a.equals(&b));
    }
}
