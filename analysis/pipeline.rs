//! # The Analysis Flow
//!
//! Load → explore → impute → explore again → split → fit → cross-validate and
//! prune → tune → package the final model. Every intermediate artefact is kept
//! in the returned [`AnalysisReport`] so the caller can render or inspect it.

use crate::config::{AnalysisConfig, ConfigError};
use crate::data::{DataError, LoadSummary, MassTable, load_mass_table, severity_class_labels};
use crate::explore::{Exploration, explore};
use crate::impute::{Imputation, ImputeError, impute};
use crate::metrics::{Evaluation, MetricsError, evaluate};
use crate::model::TrainedModel;
use crate::split::{Split, SplitError, train_test_split};
use crate::tree::{CpRow, DecisionTree, Response, TreeControl, TreeError, cross_validate, grow, select_cp};
use crate::tune::{TuneError, TuneResult, grid_search};
use ndarray::{Array2, ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Imputation failed: {0}")]
    Impute(#[from] ImputeError),
    #[error("Train/test split failed: {0}")]
    Split(#[from] SplitError),
    #[error("Tree fitting failed: {0}")]
    Tree(#[from] TreeError),
    #[error("cp tuning failed: {0}")]
    Tune(#[from] TuneError),
    #[error("Evaluation failed: {0}")]
    Metrics(#[from] MetricsError),
}

/// A fitted tree and its performance on the held-out rows.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub tree: DecisionTree,
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub load: LoadSummary,
    pub raw_exploration: Exploration,
    pub imputation: Imputation,
    pub completed_exploration: Exploration,
    pub split: Split,
    /// Tree grown with the configured control.
    pub initial: FitOutcome,
    /// Cross-validated cp table of the initial tree.
    pub cp_table: Vec<CpRow>,
    pub selected: CpRow,
    /// The initial tree pruned at the selected cp.
    pub pruned: FitOutcome,
    pub tuning: TuneResult,
    /// Tree grown at the cp chosen by the grid search.
    pub tuned: FitOutcome,
    pub model: TrainedModel,
}

/// Training and test partitions of the design matrix and labels.
struct Partitions {
    x_train: Array2<f64>,
    y_train: Vec<usize>,
    x_test: Array2<f64>,
    y_test: Vec<usize>,
}

/// Runs the whole analysis on the file at `path`.
pub fn run_analysis(path: &str, config: &AnalysisConfig) -> Result<AnalysisReport, PipelineError> {
    config.validate()?;
    let (raw, load) = load_mass_table(path, &config.data)?;
    let raw_exploration = explore(&raw);

    let imputation = impute(&raw, &config.impute, config.seed)?;
    let completed = imputation.select(config.impute.use_completed)?;
    let completed_exploration = explore(&completed);

    let (split, parts) = partition(&completed, config)?;
    log::info!(
        "Split {} rows into {} training and {} test rows",
        completed.n_rows(),
        split.train.len(),
        split.test.len()
    );

    let class_labels = severity_class_labels();
    let names: Vec<String> = config
        .predictors
        .iter()
        .map(|a| a.name().to_string())
        .collect();
    let train_response = Response::Class {
        labels: parts.y_train.clone(),
        class_count: class_labels.len(),
    };

    let initial_tree = grow(parts.x_train.view(), &train_response, &names, &config.tree)?;
    let initial = assess(initial_tree, parts.x_test.view(), &parts.y_test, &class_labels)?;

    let cp_table = cross_validate(
        &initial.tree,
        parts.x_train.view(),
        &train_response,
        &config.tree,
        config.seed,
    )?;
    let selected = *select_cp(&cp_table, config.cp_rule)?;
    log::info!(
        "Selected cp {:.5} ({} splits) by the {} rule",
        selected.cp,
        selected.nsplit,
        config.cp_rule
    );
    let pruned = assess(
        initial.tree.prune(selected.cp),
        parts.x_test.view(),
        &parts.y_test,
        &class_labels,
    )?;

    let tuning = grid_search(
        parts.x_train.view(),
        &parts.y_train,
        &names,
        &config.tree,
        &config.tuning,
        config.seed,
    )?;
    let tuned_control = TreeControl {
        cp: tuning.best_cp,
        ..config.tree
    };
    let tuned_tree = grow(parts.x_train.view(), &train_response, &names, &tuned_control)?;
    let tuned = assess(tuned_tree, parts.x_test.view(), &parts.y_test, &class_labels)?;

    let model = TrainedModel {
        predictors: config.predictors.clone(),
        class_labels,
        selected_cp: selected.cp,
        rule: config.cp_rule,
        training_rows: parts.y_train.len(),
        cp_table: cp_table.clone(),
        tree: pruned.tree.clone(),
    };

    Ok(AnalysisReport {
        load,
        raw_exploration,
        imputation,
        completed_exploration,
        split,
        initial,
        cp_table,
        selected,
        pruned,
        tuning,
        tuned,
        model,
    })
}

fn partition(table: &MassTable, config: &AnalysisConfig) -> Result<(Split, Partitions), PipelineError> {
    let labels = table.severity_labels()?;
    let split = train_test_split(
        &labels,
        config.split.train_fraction,
        config.split.stratify,
        config.seed,
    )?;
    let x = table.feature_matrix(&config.predictors);
    let pick = |rows: &[usize]| rows.iter().map(|&r| labels[r]).collect::<Vec<_>>();
    let parts = Partitions {
        x_train: x.select(Axis(0), &split.train),
        y_train: pick(&split.train),
        x_test: x.select(Axis(0), &split.test),
        y_test: pick(&split.test),
    };
    Ok((split, parts))
}

/// Scores `tree` on the test rows.
fn assess(
    tree: DecisionTree,
    x_test: ArrayView2<f64>,
    y_test: &[usize],
    class_labels: &[String],
) -> Result<FitOutcome, PipelineError> {
    let predicted: Vec<usize> = tree
        .predict(x_test)?
        .iter()
        .map(|&v| v as usize)
        .collect();
    let prob_malignant: Vec<f64> = x_test
        .rows()
        .into_iter()
        .map(|row| tree.class_probabilities(row).get(1).copied().unwrap_or(0.0))
        .collect();
    let evaluation = evaluate(y_test, &predicted, Some(&prob_malignant), class_labels)?;
    log::debug!(
        "Tree with {} splits: test accuracy {:.4}",
        tree.split_count(),
        evaluation.accuracy
    );
    Ok(FitOutcome { tree, evaluation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{SyntheticMasses, render_csv};
    use crate::impute::ImputeConfig;
    use crate::tune::TuneConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn quick_config() -> AnalysisConfig {
        AnalysisConfig {
            impute: ImputeConfig {
                imputations: 2,
                iterations: 2,
                ..ImputeConfig::default()
            },
            tuning: TuneConfig {
                folds: 5,
                repeats: 1,
                tune_length: 4,
                grid: None,
            },
            ..AnalysisConfig::default()
        }
    }

    fn write_fixture(rows: usize, missing_rate: f64) -> NamedTempFile {
        let table = SyntheticMasses::new(rows).missing_rate(missing_rate).seed(31).build();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", render_csv(&table, false)).unwrap();
        file
    }

    #[test]
    fn analysis_produces_every_artefact() {
        let file = write_fixture(300, 0.05);
        let report = run_analysis(file.path().to_str().unwrap(), &quick_config()).unwrap();

        assert_eq!(report.load.rows_kept, 300);
        assert_eq!(report.split.train.len() + report.split.test.len(), 300);
        assert_eq!(report.imputation.completed.len(), 2);
        assert_eq!(report.completed_exploration.missing_patterns.len(), 1);
        assert!(report.cp_table.iter().all(|r| r.xerror.is_some()));
        assert!(report.pruned.tree.split_count() <= report.initial.tree.split_count());
        assert_eq!(report.model.tree, report.pruned.tree);
        assert!(report.pruned.evaluation.accuracy > 0.75);
        assert!(!report.tuning.rows.is_empty() && report.tuning.rows.len() <= 4);
        assert!(report.tuning.best().is_some());
    }

    #[test]
    fn analysis_is_deterministic_for_a_seed() {
        let file = write_fixture(200, 0.1);
        let path = file.path().to_str().unwrap();
        let a = run_analysis(path, &quick_config()).unwrap();
        let b = run_analysis(path, &quick_config()).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.cp_table, b.cp_table);
        assert_eq!(a.tuning, b.tuning);
    }

    #[test]
    fn invalid_config_is_reported_before_loading() {
        let mut config = quick_config();
        config.predictors.clear();
        assert!(matches!(
            run_analysis("does-not-exist.csv", &config),
            Err(PipelineError::Config(_))
        ));
    }
}
