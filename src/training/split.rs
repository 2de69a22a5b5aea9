//! Seeded train/test splitting, stratified by a categorical value

use crate::error::{Result, TripcastError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Partition `0..strata.len()` into (train, test) index sets.
///
/// Each stratum contributes its own `test_size` share, so the categorical
/// distribution (here: hour-of-day) is preserved in both partitions.
/// Strata are visited in sorted order and shuffled with a seeded generator,
/// so identical inputs always produce identical splits.
pub fn stratified_split(
    strata: &[i64],
    test_size: f64,
    random_state: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(0.0..1.0).contains(&test_size) || test_size <= 0.0 {
        return Err(TripcastError::TrainingError(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    if strata.is_empty() {
        return Err(TripcastError::TrainingError(
            "cannot split an empty dataset".to_string(),
        ));
    }

    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &s) in strata.iter().enumerate() {
        groups.entry(s).or_default().push(i);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(random_state);
    let mut train = Vec::with_capacity(strata.len());
    let mut test = Vec::with_capacity(strata.len());

    for indices in groups.values() {
        let mut shuffled = indices.clone();
        shuffled.shuffle(&mut rng);

        let mut n_test = (shuffled.len() as f64 * test_size).round() as usize;
        // Keep at least one training row per stratum when possible
        if n_test >= shuffled.len() && shuffled.len() > 1 {
            n_test = shuffled.len() - 1;
        }
        test.extend_from_slice(&shuffled[..n_test]);
        train.extend_from_slice(&shuffled[n_test..]);
    }

    if train.is_empty() || test.is_empty() {
        return Err(TripcastError::TrainingError(format!(
            "split produced an empty partition ({} train / {} test); \
             dataset too small for test_size {test_size}",
            train.len(),
            test.len()
        )));
    }

    Ok((train, test))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let strata: Vec<i64> = (0..100).map(|i| i % 4).collect();
        let (train, test) = stratified_split(&strata, 0.25, 42).unwrap();
        assert_eq!(train.len() + test.len(), 100);

        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_stratum_proportions_preserved() {
        // 80 rows of stratum 0, 20 of stratum 1
        let mut strata = vec![0i64; 80];
        strata.extend(vec![1i64; 20]);
        let (_, test) = stratified_split(&strata, 0.25, 42).unwrap();

        let test_zeros = test.iter().filter(|&&i| strata[i] == 0).count();
        let test_ones = test.len() - test_zeros;
        assert_eq!(test_zeros, 20);
        assert_eq!(test_ones, 5);
    }

    #[test]
    fn test_deterministic() {
        let strata: Vec<i64> = (0..50).map(|i| i % 3).collect();
        let a = stratified_split(&strata, 0.3, 7).unwrap();
        let b = stratified_split(&strata, 0.3, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bad_test_size() {
        assert!(stratified_split(&[0, 1], 0.0, 42).is_err());
        assert!(stratified_split(&[0, 1], 1.0, 42).is_err());
    }
}
