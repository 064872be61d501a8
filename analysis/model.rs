use crate::data::{Attribute, MassTable};
use crate::tree::{CpRow, CpRule, DecisionTree, Method, TreeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// The trained model is written to disk as TOML, so everything needed for
// prediction and for reading the fit back lives in these serde types.

/// The top-level, self-contained severity classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Predictor attributes, in the column order the tree was grown on.
    pub predictors: Vec<Attribute>,
    /// Class names indexed by class code.
    pub class_labels: Vec<String>,
    /// The cp the tree was pruned at.
    pub selected_cp: f64,
    /// How `selected_cp` was chosen from the cross-validated cp table.
    pub rule: CpRule,
    pub training_rows: usize,
    pub cp_table: Vec<CpRow>,
    pub tree: DecisionTree,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to write predictions: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The model lists {predictors} predictors but its tree uses {tree} features. The model file is inconsistent.")]
    PredictorMismatch { predictors: usize, tree: usize },
    #[error("The stored tree is a regression tree; a severity model must be a classification tree.")]
    NotAClassifier,
    #[error("The stored tree is corrupt at node {node}: {reason}")]
    CorruptTree { node: usize, reason: String },
    #[error("Tree evaluation failed: {0}")]
    Tree(#[from] TreeError),
}

/// The model's answer for one input row.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub row: usize,
    /// Predicted class code.
    pub class: usize,
    pub label: String,
    /// Share of malignant training rows in the leaf the row reached.
    pub prob_malignant: f64,
}

impl TrainedModel {
    /// Predicts severity for every row of `table`. Missing predictor values
    /// are allowed and follow the majority direction at each split.
    pub fn predict(&self, table: &MassTable) -> Result<Vec<Prediction>, ModelError> {
        self.check_consistency()?;
        let x = table.feature_matrix(&self.predictors);
        let predictions = x
            .rows()
            .into_iter()
            .enumerate()
            .map(|(row, values)| {
                let class = self.tree.predict_row(values) as usize;
                let probabilities = self.tree.class_probabilities(values);
                Prediction {
                    row,
                    class,
                    label: self
                        .class_labels
                        .get(class)
                        .cloned()
                        .unwrap_or_else(|| class.to_string()),
                    prob_malignant: probabilities.get(1).copied().unwrap_or(0.0),
                }
            })
            .collect();
        Ok(predictions)
    }

    fn check_consistency(&self) -> Result<(), ModelError> {
        if self.tree.method != Method::Class {
            return Err(ModelError::NotAClassifier);
        }
        if self.predictors.len() != self.tree.feature_names.len() {
            return Err(ModelError::PredictorMismatch {
                predictors: self.predictors.len(),
                tree: self.tree.feature_names.len(),
            });
        }
        self.check_nodes()
    }

    /// Every child index must point forward into the arena, so prediction
    /// always terminates inside it.
    fn check_nodes(&self) -> Result<(), ModelError> {
        let tree = &self.tree;
        let corrupt = |node: usize, reason: String| ModelError::CorruptTree { node, reason };
        if tree.nodes.is_empty() {
            return Err(corrupt(0, "the tree has no nodes".to_string()));
        }
        let n_nodes = tree.nodes.len();
        for (id, node) in tree.nodes.iter().enumerate() {
            if node.class_counts.len() != tree.class_count {
                return Err(corrupt(
                    id,
                    format!(
                        "{} class counts for {} classes",
                        node.class_counts.len(),
                        tree.class_count
                    ),
                ));
            }
            let Some(split) = node.split else {
                continue;
            };
            if split.feature >= tree.feature_names.len() {
                return Err(corrupt(
                    id,
                    format!(
                        "split feature {} but only {} features",
                        split.feature,
                        tree.feature_names.len()
                    ),
                ));
            }
            for child in [split.left, split.right] {
                if child <= id || child >= n_nodes {
                    return Err(corrupt(
                        id,
                        format!("child index {child} is outside {}..{n_nodes}", id + 1),
                    ));
                }
            }
            if !split.threshold.is_finite() {
                return Err(corrupt(id, "split threshold is not finite".to_string()));
            }
        }
        Ok(())
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a trained model from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: TrainedModel = toml::from_str(&toml_string)?;
        model.check_consistency()?;
        Ok(model)
    }
}

/// Writes predictions as a tab-separated file with columns `row`,
/// `prediction` and `prob_malignant`. Rows are numbered from 1.
pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<(), ModelError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["row", "prediction", "prob_malignant"])?;
    for p in predictions {
        writer.write_record([
            (p.row + 1).to_string(),
            p.label.clone(),
            format!("{:.6}", p.prob_malignant),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
