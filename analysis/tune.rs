//! Cross-validated grid search over the complexity parameter.
//!
//! Accuracy and Cohen's kappa of every candidate cp are estimated by repeated
//! stratified k-fold cross-validation. Within one fold a single tree is grown
//! at the smallest candidate and then viewed at each larger one, since pruning
//! at a higher cp only ever removes splits.

use crate::metrics::{ConfusionMatrix, MetricsError};
use crate::progress::create_progress_bar;
use crate::split::{SplitError, stratified_folds};
use crate::tree::{Response, TreeControl, TreeError, grow};
use itertools::Itertools;
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    pub folds: usize,
    pub repeats: usize,
    /// Size of the automatically derived grid.
    pub tune_length: usize,
    /// Explicit candidate cps; derived from the data when absent.
    pub grid: Option<Vec<f64>>,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            folds: 10,
            repeats: 3,
            tune_length: 10,
            grid: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum TuneError {
    #[error("The cp grid is empty.")]
    EmptyGrid,
    #[error("Grid value {0} is not a valid cp; every cp must lie in [0, 1].")]
    InvalidGridValue(f64),
    #[error("Invalid tuning settings: {0}")]
    InvalidConfig(String),
    #[error("Tree fitting failed during tuning: {0}")]
    Tree(#[from] TreeError),
    #[error("Fold assignment failed: {0}")]
    Split(#[from] SplitError),
    #[error("Scoring a fold failed: {0}")]
    Metrics(#[from] MetricsError),
}

/// Resampled performance of one candidate cp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuneRow {
    pub cp: f64,
    pub accuracy: f64,
    pub accuracy_sd: f64,
    pub kappa: f64,
    pub kappa_sd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneResult {
    /// One row per candidate, in increasing cp order.
    pub rows: Vec<TuneRow>,
    pub best_cp: f64,
    pub folds: usize,
    pub repeats: usize,
}

impl TuneResult {
    pub fn best(&self) -> Option<&TuneRow> {
        self.rows.iter().find(|r| r.cp == self.best_cp)
    }
}

/// Candidate cps from a fully grown tree: its cp table values when there are
/// at most `tune_length` of them, otherwise `tune_length` evenly spaced values
/// between their extremes. Returned in increasing order.
pub fn default_cp_grid(
    x: ArrayView2<f64>,
    labels: &[usize],
    feature_names: &[String],
    control: &TreeControl,
    tune_length: usize,
) -> Result<Vec<f64>, TuneError> {
    if tune_length == 0 {
        return Err(TuneError::InvalidConfig(
            "tune_length must be at least 1".to_string(),
        ));
    }
    let full_control = TreeControl {
        cp: 0.0,
        xval: 0,
        ..*control
    };
    let tree = grow(x, &class_response(labels), feature_names, &full_control)?;
    let cps: Vec<f64> = tree
        .cp_table()
        .into_iter()
        .map(|row| row.cp)
        .sorted_by(f64::total_cmp)
        .collect();
    if cps.len() <= tune_length {
        return Ok(cps);
    }
    let (lo, hi) = (cps[0], cps[cps.len() - 1]);
    if tune_length == 1 {
        return Ok(vec![lo]);
    }
    let step = (hi - lo) / (tune_length - 1) as f64;
    Ok((0..tune_length).map(|i| lo + step * i as f64).collect())
}

/// Scores every cp of the grid by repeated stratified cross-validation and
/// picks the one with the highest mean accuracy; ties go to the larger cp.
pub fn grid_search(
    x: ArrayView2<f64>,
    labels: &[usize],
    feature_names: &[String],
    control: &TreeControl,
    config: &TuneConfig,
    seed: u64,
) -> Result<TuneResult, TuneError> {
    if config.folds < 2 || config.repeats == 0 {
        return Err(TuneError::InvalidConfig(format!(
            "need at least 2 folds and 1 repeat, got {} folds and {} repeats",
            config.folds, config.repeats
        )));
    }
    let mut grid = match &config.grid {
        Some(grid) => grid.clone(),
        None => default_cp_grid(x, labels, feature_names, control, config.tune_length)?,
    };
    if let Some(&bad) = grid.iter().find(|cp| !(0.0..=1.0).contains(*cp)) {
        return Err(TuneError::InvalidGridValue(bad));
    }
    grid.sort_by(f64::total_cmp);
    grid.dedup();
    let min_cp = *grid.first().ok_or(TuneError::EmptyGrid)?;

    let class_labels: Vec<String> = (0..class_count(labels)).map(|c| c.to_string()).collect();
    let mut tasks = Vec::with_capacity(config.repeats * config.folds);
    for repeat in 0..config.repeats {
        let assignment = stratified_folds(labels, config.folds, seed.wrapping_add(repeat as u64))?;
        for fold in 0..config.folds {
            let (held_out, training): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&r| assignment[r] == fold);
            tasks.push((training, held_out));
        }
    }

    log::info!(
        "Tuning cp over {} candidates with {}x{}-fold cross-validation",
        grid.len(),
        config.repeats,
        config.folds
    );
    let fold_control = TreeControl {
        cp: min_cp,
        xval: 0,
        ..*control
    };
    let pb = create_progress_bar(tasks.len() as u64, "Tuning cp");
    let scores: Vec<Vec<(f64, f64)>> = tasks
        .par_iter()
        .map(|(training, held_out)| -> Result<Vec<(f64, f64)>, TuneError> {
            let train_labels: Vec<usize> = training.iter().map(|&r| labels[r]).collect();
            let tree = grow(
                x.select(Axis(0), training).view(),
                &Response::Class {
                    labels: train_labels,
                    class_count: class_labels.len(),
                },
                feature_names,
                &fold_control,
            )?;
            let truth: Vec<usize> = held_out.iter().map(|&r| labels[r]).collect();
            let per_cp = grid
                .iter()
                .map(|&cp| {
                    let predicted: Vec<usize> = held_out
                        .iter()
                        .map(|&r| tree.predict_row_at(x.row(r), cp) as usize)
                        .collect();
                    let cm = ConfusionMatrix::from_predictions(&truth, &predicted, &class_labels)?;
                    Ok((cm.accuracy(), cm.kappa()))
                })
                .collect::<Result<Vec<_>, TuneError>>()?;
            pb.inc(1);
            Ok(per_cp)
        })
        .collect::<Result<_, TuneError>>()?;
    pb.finish_and_clear();

    let rows: Vec<TuneRow> = grid
        .iter()
        .enumerate()
        .map(|(j, &cp)| {
            let accuracies: Vec<f64> = scores.iter().map(|s| s[j].0).collect();
            let kappas: Vec<f64> = scores.iter().map(|s| s[j].1).collect();
            let (accuracy, accuracy_sd) = mean_sd(&accuracies);
            let (kappa, kappa_sd) = mean_sd(&kappas);
            TuneRow {
                cp,
                accuracy,
                accuracy_sd,
                kappa,
                kappa_sd,
            }
        })
        .collect();

    let mut best = rows[0];
    for row in &rows[1..] {
        if row.accuracy >= best.accuracy - 1e-12 {
            best = *row;
        }
    }
    log::info!(
        "Best cp {:.5} with resampled accuracy {:.4}",
        best.cp,
        best.accuracy
    );
    Ok(TuneResult {
        rows,
        best_cp: best.cp,
        folds: config.folds,
        repeats: config.repeats,
    })
}

fn class_count(labels: &[usize]) -> usize {
    labels.iter().max().map_or(2, |&m| (m + 1).max(2))
}

fn class_response(labels: &[usize]) -> Response {
    Response::Class {
        labels: labels.to_vec(),
        class_count: class_count(labels),
    }
}

/// Mean and sample standard deviation.
fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Attribute;
    use crate::fixtures::SyntheticMasses;
    use approx::assert_abs_diff_eq;

    fn fixture() -> (ndarray::Array2<f64>, Vec<usize>, Vec<String>) {
        let table = SyntheticMasses::new(300).seed(9).build();
        let x = table.feature_matrix(&Attribute::PREDICTORS);
        let labels = table.severity_labels().unwrap();
        let names = Attribute::PREDICTORS
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        (x, labels, names)
    }

    #[test]
    fn default_grid_is_increasing_and_bounded() {
        let (x, y, names) = fixture();
        let grid = default_cp_grid(x.view(), &y, &names, &TreeControl::default(), 5).unwrap();
        assert!(!grid.is_empty() && grid.len() <= 5);
        assert!(grid.windows(2).all(|w| w[0] < w[1]));
        assert!(grid.iter().all(|cp| (0.0..=1.0).contains(cp)));
        assert_abs_diff_eq!(grid[0], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn grid_search_prefers_useful_trees() {
        let (x, y, names) = fixture();
        let config = TuneConfig {
            folds: 5,
            repeats: 1,
            grid: Some(vec![0.01, 0.05, 1.0]),
            ..TuneConfig::default()
        };
        let result = grid_search(x.view(), &y, &names, &TreeControl::default(), &config, 4).unwrap();
        assert_eq!(result.rows.len(), 3);
        // cp = 1 leaves only the root, which cannot beat a real split on this signal.
        assert!(result.best_cp < 1.0);
        let best = result.best().unwrap();
        assert!(best.accuracy > 0.8, "accuracy {}", best.accuracy);
        let stump = result.rows[2];
        assert_abs_diff_eq!(stump.kappa, 0.0, epsilon = 1e-12);
        assert!(result.rows.iter().all(|r| r.accuracy_sd >= 0.0));
    }

    #[test]
    fn grid_search_is_reproducible() {
        let (x, y, names) = fixture();
        let config = TuneConfig {
            folds: 4,
            repeats: 2,
            grid: Some(vec![0.0, 0.02]),
            ..TuneConfig::default()
        };
        let a = grid_search(x.view(), &y, &names, &TreeControl::default(), &config, 7).unwrap();
        let b = grid_search(x.view(), &y, &names, &TreeControl::default(), &config, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ties_go_to_the_larger_cp() {
        let (x, y, names) = fixture();
        // Two cps that both exceed the root complexity give identical stumps.
        let config = TuneConfig {
            folds: 3,
            repeats: 1,
            grid: Some(vec![1.0, 0.999]),
            ..TuneConfig::default()
        };
        let result = grid_search(x.view(), &y, &names, &TreeControl::default(), &config, 1).unwrap();
        assert_abs_diff_eq!(result.best_cp, 1.0, epsilon = 1e-15);
    }

    #[test]
    fn bad_grids_and_settings_are_rejected() {
        let (x, y, names) = fixture();
        let control = TreeControl::default();
        let empty = TuneConfig {
            grid: Some(Vec::new()),
            ..TuneConfig::default()
        };
        assert!(matches!(
            grid_search(x.view(), &y, &names, &control, &empty, 0),
            Err(TuneError::EmptyGrid)
        ));
        let negative = TuneConfig {
            grid: Some(vec![-0.1]),
            ..TuneConfig::default()
        };
        assert!(matches!(
            grid_search(x.view(), &y, &names, &control, &negative, 0),
            Err(TuneError::InvalidGridValue(_))
        ));
        let one_fold = TuneConfig {
            folds: 1,
            ..TuneConfig::default()
        };
        assert!(matches!(
            grid_search(x.view(), &y, &names, &control, &one_fold, 0),
            Err(TuneError::InvalidConfig(_))
        ));
    }
}
