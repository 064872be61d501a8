//! Analysis settings, read from an optional TOML file. Every section and
//! field has a default, so an empty file (or no file) runs the standard
//! analysis.
//!
//! ```toml
//! seed = 7
//! predictors = ["bi_rads", "age", "shape", "margin", "density"]
//! cp_rule = "one-standard-error"
//!
//! [impute]
//! method = "cart"
//! imputations = 5
//! use_completed = "pooled"
//!
//! [tree]
//! cp = 0.01
//! xval = 10
//! ```

use crate::data::{Attribute, DataOptions};
use crate::impute::ImputeConfig;
use crate::split::SplitConfig;
use crate::tree::{CpRule, TreeControl};
use crate::tune::TuneConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Seeds the split, imputation chains, cross-validation folds and tuning.
    pub seed: u64,
    /// Attributes used to predict severity.
    pub predictors: Vec<Attribute>,
    pub cp_rule: CpRule,
    pub data: DataOptions,
    pub impute: ImputeConfig,
    pub split: SplitConfig,
    pub tree: TreeControl,
    pub tuning: TuneConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            predictors: Attribute::PREDICTORS.to_vec(),
            cp_rule: CpRule::default(),
            data: DataOptions::default(),
            impute: ImputeConfig::default(),
            split: SplitConfig::default(),
            tree: TreeControl::default(),
            tuning: TuneConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.predictors.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one predictor is required".to_string(),
            ));
        }
        if self.predictors.contains(&Attribute::Severity) {
            return Err(ConfigError::Invalid(
                "severity is the outcome and cannot be a predictor".to_string(),
            ));
        }
        let mut seen = self.predictors.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.predictors.len() {
            return Err(ConfigError::Invalid(
                "predictors must not repeat".to_string(),
            ));
        }
        if !self.data.separator.is_ascii() {
            return Err(ConfigError::Invalid(format!(
                "separator {:?} is not a single ASCII character",
                self.data.separator
            )));
        }
        if self.data.missing_token.is_empty() {
            return Err(ConfigError::Invalid(
                "missing_token must not be empty".to_string(),
            ));
        }
        if !(self.split.train_fraction > 0.0 && self.split.train_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "train_fraction must lie strictly between 0 and 1, got {}",
                self.split.train_fraction
            )));
        }
        self.impute
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.tree
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.tree.xval < 2 {
            return Err(ConfigError::Invalid(
                "tree.xval must be at least 2; the analysis selects cp by cross-validation"
                    .to_string(),
            ));
        }
        if self.tuning.folds < 2 || self.tuning.repeats == 0 || self.tuning.tune_length == 0 {
            return Err(ConfigError::Invalid(
                "tuning needs folds >= 2, repeats >= 1 and tune_length >= 1".to_string(),
            ));
        }
        if let Some(grid) = &self.tuning.grid {
            if grid.is_empty() || grid.iter().any(|cp| !(0.0..=1.0).contains(cp)) {
                return Err(ConfigError::Invalid(
                    "tuning.grid must be non-empty with every cp in [0, 1]".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impute::{CompletedSelection, ImputeMethod};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.predictors.len(), 5);
        assert_eq!(config.impute.imputations, 5);
        assert_eq!(config.tree.min_split, 20);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
seed = 7
predictors = ["shape", "margin"]
cp_rule = "one-standard-error"

[impute]
method = "sample"
use_completed = "pooled"

[tree]
cp = 0.02

[tuning]
grid = [0.0, 0.01, 0.1]
"#
        )
        .unwrap();
        let config = AnalysisConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.predictors, vec![Attribute::Shape, Attribute::Margin]);
        assert_eq!(config.cp_rule, CpRule::OneStandardError);
        assert_eq!(config.impute.method, ImputeMethod::Sample);
        assert_eq!(config.impute.use_completed, CompletedSelection::Pooled);
        assert_eq!(config.impute.iterations, 5);
        assert_eq!(config.tree.xval, 10);
        assert_eq!(config.tuning.grid, Some(vec![0.0, 0.01, 0.1]));
    }

    #[test]
    fn chain_selection_parses_as_a_table() {
        let config: AnalysisConfig = toml::from_str("[impute]\nuse_completed = { chain = 3 }\n").unwrap();
        assert_eq!(config.impute.use_completed, CompletedSelection::Chain(3));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let config = AnalysisConfig {
            predictors: vec![Attribute::Severity],
            ..AnalysisConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AnalysisConfig::default();
        config.tree.xval = 0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.predictors = vec![Attribute::Age, Attribute::Age];
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.impute.use_completed = CompletedSelection::Chain(9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_attribute_names_fail_to_parse() {
        assert!(toml::from_str::<AnalysisConfig>("predictors = [\"height\"]").is_err());
    }
}
