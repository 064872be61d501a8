//! Train/test partitioning and cross-validation fold assignment.
//!
//! All routines are driven by an explicit seed so the same configuration
//! always produces the same partition.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SplitError {
    #[error("The training fraction must lie strictly between 0 and 1, got {0}.")]
    InvalidFraction(f64),
    #[error("At least two rows are needed to form a train/test split, got {0}.")]
    TooFewRows(usize),
    #[error("Cannot build {folds} folds from {rows} rows; need 2 <= folds <= rows.")]
    InvalidFoldCount { folds: usize, rows: usize },
}

/// Settings for the train/test partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_fraction: f64,
    /// Keep each class's share equal in both partitions.
    pub stratify: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.75,
            stratify: true,
        }
    }
}

/// Row indices of the two partitions. Both are sorted, disjoint, and together
/// cover every row.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partitions rows into a training and a test set.
pub fn train_test_split(
    labels: &[usize],
    train_fraction: f64,
    stratify: bool,
    seed: u64,
) -> Result<Split, SplitError> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(train_fraction));
    }
    let n = labels.len();
    if n < 2 {
        return Err(SplitError::TooFewRows(n));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let groups: Vec<Vec<usize>> = if stratify {
        group_by_label(labels).into_values().collect()
    } else {
        vec![(0..n).collect()]
    };

    let mut train = Vec::with_capacity(n);
    let mut test = Vec::with_capacity(n);
    for mut group in groups {
        group.shuffle(&mut rng);
        let take = train_count(group.len(), train_fraction);
        train.extend_from_slice(&group[..take]);
        test.extend_from_slice(&group[take..]);
    }

    // A tiny class can leave one side empty; borrow a row from the other side.
    if test.is_empty() {
        if let Some(row) = train.pop() {
            test.push(row);
        }
    }
    if train.is_empty() {
        if let Some(row) = test.pop() {
            train.push(row);
        }
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok(Split { train, test })
}

/// Rows of a group that go to training: rounded share, but never the whole
/// group or none of it once the group has two or more rows.
fn train_count(len: usize, fraction: f64) -> usize {
    let share = (fraction * len as f64).round() as usize;
    if len >= 2 { share.clamp(1, len - 1) } else { len }
}

fn group_by_label(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(row);
    }
    groups
}

/// Random, balanced fold labels in `0..folds` for `n` rows.
pub fn kfold_assignment(n: usize, folds: usize, seed: u64) -> Result<Vec<usize>, SplitError> {
    check_folds(n, folds)?;
    let mut assignment: Vec<usize> = (0..n).map(|i| i % folds).collect();
    assignment.shuffle(&mut StdRng::seed_from_u64(seed));
    Ok(assignment)
}

/// Fold labels balanced within every class, so each fold sees roughly the
/// overall class mix.
pub fn stratified_folds(labels: &[usize], folds: usize, seed: u64) -> Result<Vec<usize>, SplitError> {
    check_folds(labels.len(), folds)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment = vec![0usize; labels.len()];
    let mut offset = 0usize;
    for (_, mut rows) in group_by_label(labels) {
        rows.shuffle(&mut rng);
        for (position, row) in rows.iter().enumerate() {
            assignment[*row] = (offset + position) % folds;
        }
        offset += rows.len();
    }
    Ok(assignment)
}

fn check_folds(n: usize, folds: usize) -> Result<(), SplitError> {
    if folds < 2 || folds > n {
        return Err(SplitError::InvalidFoldCount { folds, rows: n });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(benign: usize, malignant: usize) -> Vec<usize> {
        let mut v = vec![0; benign];
        v.extend(std::iter::repeat(1).take(malignant));
        v
    }

    #[test]
    fn split_is_disjoint_and_exhaustive() {
        let y = labels(60, 40);
        let split = train_test_split(&y, 0.75, false, 3).unwrap();
        assert_eq!(split.train.len() + split.test.len(), 100);
        assert_eq!(split.train.len(), 75);
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn stratified_split_keeps_class_shares() {
        let y = labels(60, 40);
        let split = train_test_split(&y, 0.75, true, 11).unwrap();
        let train_malignant = split.train.iter().filter(|&&i| y[i] == 1).count();
        let test_malignant = split.test.iter().filter(|&&i| y[i] == 1).count();
        assert_eq!(train_malignant, 30);
        assert_eq!(test_malignant, 10);
        assert_eq!(split.test.len(), 25);
    }

    #[test]
    fn split_is_reproducible_for_a_seed() {
        let y = labels(30, 30);
        let a = train_test_split(&y, 0.7, true, 5).unwrap();
        let b = train_test_split(&y, 0.7, true, 5).unwrap();
        let c = train_test_split(&y, 0.7, true, 6).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn split_rejects_bad_fraction_and_tiny_inputs() {
        assert_eq!(
            train_test_split(&[0, 1, 0], 1.0, false, 0),
            Err(SplitError::InvalidFraction(1.0))
        );
        assert_eq!(
            train_test_split(&[0], 0.5, false, 0),
            Err(SplitError::TooFewRows(1))
        );
    }

    #[test]
    fn both_sides_non_empty_even_for_singleton_classes() {
        let split = train_test_split(&[0, 1], 0.9, true, 1).unwrap();
        assert_eq!(split.train.len(), 1);
        assert_eq!(split.test.len(), 1);
    }

    #[test]
    fn kfold_assignment_is_balanced() {
        let folds = kfold_assignment(23, 5, 9).unwrap();
        let mut sizes = [0usize; 5];
        for f in folds {
            sizes[f] += 1;
        }
        assert!(sizes.iter().all(|&s| s == 4 || s == 5));
        assert_eq!(sizes.iter().sum::<usize>(), 23);
    }

    #[test]
    fn stratified_folds_spread_each_class() {
        let y = labels(50, 20);
        let folds = stratified_folds(&y, 10, 4).unwrap();
        for fold in 0..10 {
            let malignant = (0..y.len())
                .filter(|&i| folds[i] == fold && y[i] == 1)
                .count();
            assert_eq!(malignant, 2);
        }
    }

    #[test]
    fn fold_count_is_validated() {
        assert!(kfold_assignment(5, 1, 0).is_err());
        assert!(kfold_assignment(5, 6, 0).is_err());
        assert!(stratified_folds(&[0, 1, 0], 4, 0).is_err());
    }
}
