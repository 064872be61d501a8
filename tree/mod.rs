//! # Classification and Regression Trees
//!
//! A binary recursive-partitioning tree in the CART tradition:
//!
//! - Growth: every node tries each predictor and each midpoint between
//!   consecutive distinct values, keeping the split with the largest impurity
//!   improvement (Gini for classification, sum of squares for regression).
//! - Pruning: after growth, weakest-link cost-complexity pruning records for
//!   every internal node the complexity at which it collapses. Complexities are
//!   expressed relative to the root risk, so a `cp` of 0.01 removes every split
//!   that does not buy at least 1% of the root's loss.
//! - Selection: k-fold cross-validation estimates the error of each nested
//!   subtree, from which a `cp` is chosen.
//!
//! Nodes live in a flat arena (`DecisionTree::nodes`, root at index 0), which
//! keeps the structure trivially serializable.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod grow;
mod prune;
mod xval;

pub use grow::grow;
pub use xval::{CpRule, cross_validate, select_cp};

use crate::split::SplitError;

/// The fitting method, which fixes the node value, risk and split criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Classification: Gini splits, majority-class value, misclassification risk.
    Class,
    /// Regression: sum-of-squares splits, mean value, residual sum of squares risk.
    Anova,
}

/// The outcome a tree is grown against.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Class indices in `0..class_count`.
    Class {
        labels: Vec<usize>,
        class_count: usize,
    },
    /// Real-valued outcomes.
    Continuous(Vec<f64>),
}

impl Response {
    pub fn len(&self) -> usize {
        match self {
            Response::Class { labels, .. } => labels.len(),
            Response::Continuous(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn method(&self) -> Method {
        match self {
            Response::Class { .. } => Method::Class,
            Response::Continuous(_) => Method::Anova,
        }
    }

    /// The response restricted to `rows`, in that order.
    pub fn select(&self, rows: &[usize]) -> Response {
        match self {
            Response::Class {
                labels,
                class_count,
            } => Response::Class {
                labels: rows.iter().map(|&r| labels[r]).collect(),
                class_count: *class_count,
            },
            Response::Continuous(values) => {
                Response::Continuous(rows.iter().map(|&r| values[r]).collect())
            }
        }
    }

    /// Loss of predicting `prediction` for row `row`: 0/1 for classes,
    /// squared error for continuous outcomes.
    pub fn loss(&self, row: usize, prediction: f64) -> f64 {
        match self {
            Response::Class { labels, .. } => {
                if labels[row] as f64 == prediction {
                    0.0
                } else {
                    1.0
                }
            }
            Response::Continuous(values) => (values[row] - prediction).powi(2),
        }
    }
}

/// Growth and pruning controls. Defaults follow the classic CART settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeControl {
    /// Fewest observations a node must hold before a split is attempted.
    pub min_split: usize,
    /// Fewest observations allowed in any leaf. Defaults to `round(min_split / 3)`.
    pub min_bucket: Option<usize>,
    /// Deepest level a node may sit at; the root is depth 0.
    pub max_depth: usize,
    /// Complexity threshold applied to the grown tree.
    pub cp: f64,
    /// Number of cross-validation folds; 0 disables cross-validation.
    pub xval: usize,
}

impl Default for TreeControl {
    fn default() -> Self {
        Self {
            min_split: 20,
            min_bucket: None,
            max_depth: 30,
            cp: 0.01,
            xval: 10,
        }
    }
}

impl TreeControl {
    pub fn effective_min_bucket(&self) -> usize {
        self.min_bucket
            .unwrap_or_else(|| (self.min_split as f64 / 3.0).round() as usize)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        if self.min_split < 2 {
            return Err(TreeError::InvalidControl(format!(
                "min_split must be at least 2, got {}",
                self.min_split
            )));
        }
        if self.min_bucket == Some(0) {
            return Err(TreeError::InvalidControl(
                "min_bucket must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 || self.max_depth > 30 {
            return Err(TreeError::InvalidControl(format!(
                "max_depth must lie in 1..=30, got {}",
                self.max_depth
            )));
        }
        if !(0.0..=1.0).contains(&self.cp) {
            return Err(TreeError::InvalidControl(format!(
                "cp must lie in [0, 1], got {}",
                self.cp
            )));
        }
        if self.xval == 1 {
            return Err(TreeError::InvalidControl(
                "xval must be 0 (disabled) or at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Cannot grow a tree on an empty dataset.")]
    EmptyData,
    #[error("The predictor matrix has {rows} rows but the response has {response} values.")]
    RowMismatch { rows: usize, response: usize },
    #[error("Expected {expected} predictor columns, found {found}.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Predictor '{feature}' has a non-finite value at row {row}; impute missing values first.")]
    NonFiniteFeature { feature: String, row: usize },
    #[error("The response has a non-finite value at row {0}.")]
    NonFiniteResponse(usize),
    #[error("Class label {label} at row {row} is not below the class count {class_count}.")]
    LabelOutOfRange {
        label: usize,
        row: usize,
        class_count: usize,
    },
    #[error("Invalid tree control: {0}")]
    InvalidControl(String),
    #[error("The cp table carries no cross-validated error; run cross-validation first.")]
    NotCrossValidated,
    #[error("Fold assignment failed: {0}")]
    Split(#[from] SplitError),
}

/// A split of an internal node: rows with `x[feature] < threshold` go left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeSplit {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Reduction in impurity achieved by the split.
    pub improvement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub n_obs: usize,
    pub depth: usize,
    /// Majority class index (classification) or mean (regression).
    pub value: f64,
    /// Observations per class; empty for regression trees.
    pub class_counts: Vec<usize>,
    /// Misclassified count or residual sum of squares if the node were a leaf.
    pub risk: f64,
    /// Relative complexity at which this node's split is pruned away; 0 for leaves.
    pub complexity: f64,
    pub split: Option<NodeSplit>,
}

/// One row of a complexity-parameter table, in the classic `printcp` layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpRow {
    pub cp: f64,
    pub nsplit: usize,
    /// Risk of the pruned tree relative to the root risk.
    pub rel_error: f64,
    /// Cross-validated relative error.
    pub xerror: Option<f64>,
    /// Standard error of `xerror`.
    pub xstd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub method: Method,
    pub feature_names: Vec<String>,
    /// Number of classes; 0 for regression trees.
    pub class_count: usize,
    pub root_risk: f64,
    /// The complexity threshold this tree has been pruned at.
    pub cp: f64,
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn split_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.split.is_some()).count()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.len() - self.split_count()
    }

    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Index of the leaf a row lands in.
    pub fn leaf_index(&self, row: ArrayView1<f64>) -> usize {
        self.leaf_index_at(row, f64::NEG_INFINITY)
    }

    /// Index of the node a row stops at when the tree is viewed as pruned at
    /// `cp`. A missing value follows the child that saw more training rows.
    pub fn leaf_index_at(&self, row: ArrayView1<f64>, cp: f64) -> usize {
        let mut id = 0;
        loop {
            let node = &self.nodes[id];
            let Some(split) = node.split else {
                return id;
            };
            if node.complexity <= cp {
                return id;
            }
            let v = row[split.feature];
            id = if v.is_nan() {
                if self.nodes[split.left].n_obs >= self.nodes[split.right].n_obs {
                    split.left
                } else {
                    split.right
                }
            } else if v < split.threshold {
                split.left
            } else {
                split.right
            };
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.nodes[self.leaf_index(row)].value
    }

    /// Prediction for a row under the subtree pruned at `cp`.
    pub fn predict_row_at(&self, row: ArrayView1<f64>, cp: f64) -> f64 {
        self.nodes[self.leaf_index_at(row, cp)].value
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, TreeError> {
        self.check_width(x.ncols())?;
        Ok(x.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    /// Class shares in the leaf a row lands in. Empty for regression trees.
    pub fn class_probabilities(&self, row: ArrayView1<f64>) -> Vec<f64> {
        let leaf = &self.nodes[self.leaf_index(row)];
        let total = leaf.n_obs.max(1) as f64;
        leaf.class_counts
            .iter()
            .map(|&c| c as f64 / total)
            .collect()
    }

    /// Sum of split improvements per predictor, scaled to sum to 100, largest
    /// first. Predictors never used in a split are omitted.
    pub fn variable_importance(&self) -> Vec<(String, f64)> {
        let mut totals = vec![0.0; self.feature_names.len()];
        for split in self.nodes.iter().filter_map(|n| n.split) {
            totals[split.feature] += split.improvement;
        }
        let sum: f64 = totals.iter().sum();
        if sum <= 0.0 {
            return Vec::new();
        }
        let mut importance: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .zip(totals)
            .filter(|(_, t)| *t > 0.0)
            .map(|(name, t)| (name.clone(), 100.0 * t / sum))
            .collect();
        importance.sort_by(|a, b| b.1.total_cmp(&a.1));
        importance
    }

    fn check_width(&self, found: usize) -> Result<(), TreeError> {
        if found != self.feature_names.len() {
            return Err(TreeError::FeatureCountMismatch {
                expected: self.feature_names.len(),
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    /// Two clean groups on feature 0, noise on feature 1.
    pub(crate) fn separable() -> (Array2<f64>, Response) {
        let n = 40;
        let mut x = Array2::zeros((n, 2));
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            x[[i, 0]] = i as f64;
            x[[i, 1]] = ((i * 7) % 5) as f64;
            labels.push(usize::from(i >= 20));
        }
        (
            x,
            Response::Class {
                labels,
                class_count: 2,
            },
        )
    }

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn control_defaults_match_classic_cart() {
        let control = TreeControl::default();
        assert_eq!(control.min_split, 20);
        assert_eq!(control.effective_min_bucket(), 7);
        assert_abs_diff_eq!(control.cp, 0.01, epsilon = 1e-15);
        assert!(control.validate().is_ok());
        let bad = TreeControl {
            xval: 1,
            ..TreeControl::default()
        };
        assert!(matches!(bad.validate(), Err(TreeError::InvalidControl(_))));
    }

    #[test]
    fn separable_data_splits_once_at_the_midpoint() {
        let (x, y) = separable();
        let tree = grow(x.view(), &y, &names(), &TreeControl::default()).unwrap();
        assert_eq!(tree.split_count(), 1);
        let split = tree.root().split.unwrap();
        assert_eq!(split.feature, 0);
        assert_abs_diff_eq!(split.threshold, 19.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tree.root_risk, 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tree.root().complexity, 1.0, epsilon = 1e-12);

        let predictions = tree.predict(x.view()).unwrap();
        for (i, &p) in predictions.iter().enumerate() {
            assert_abs_diff_eq!(p, if i >= 20 { 1.0 } else { 0.0 }, epsilon = 1e-12);
        }
    }

    #[test]
    fn missing_values_follow_the_larger_child() {
        let (x, y) = separable();
        let mut rows: Vec<usize> = (0..40).collect();
        rows.extend(0..10);
        let x_skewed = x.select(ndarray::Axis(0), &rows);
        let y_skewed = y.select(&rows);
        let tree = grow(x_skewed.view(), &y_skewed, &names(), &TreeControl::default()).unwrap();
        let row = array![f64::NAN, 0.0];
        assert_abs_diff_eq!(tree.predict_row(row.view()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn probabilities_come_from_leaf_counts() {
        let (x, y) = separable();
        let tree = grow(x.view(), &y, &names(), &TreeControl::default()).unwrap();
        let probs = tree.class_probabilities(array![30.0, 1.0].view());
        assert_eq!(probs.len(), 2);
        assert_abs_diff_eq!(probs[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn importance_credits_the_splitting_feature() {
        let (x, y) = separable();
        let tree = grow(x.view(), &y, &names(), &TreeControl::default()).unwrap();
        let importance = tree.variable_importance();
        assert_eq!(importance.len(), 1);
        assert_eq!(importance[0].0, "a");
        assert_abs_diff_eq!(importance[0].1, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn predict_rejects_wrong_width() {
        let (x, y) = separable();
        let tree = grow(x.view(), &y, &names(), &TreeControl::default()).unwrap();
        let narrow = Array2::<f64>::zeros((3, 1));
        assert!(matches!(
            tree.predict(narrow.view()),
            Err(TreeError::FeatureCountMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn response_loss_and_selection() {
        let y = Response::Continuous(vec![1.0, 2.0, 4.0]);
        assert_abs_diff_eq!(y.loss(2, 1.0), 9.0, epsilon = 1e-12);
        assert_eq!(y.select(&[2, 0]), Response::Continuous(vec![4.0, 1.0]));
        let c = Response::Class {
            labels: vec![0, 1],
            class_count: 2,
        };
        assert_abs_diff_eq!(c.loss(1, 0.0), 1.0, epsilon = 1e-12);
        assert_eq!(c.method(), Method::Class);
    }
}
