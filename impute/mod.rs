//! # Multiple Imputation by Chained Equations
//!
//! Fills the missing cells of a `MassTable` several times over, producing a set
//! of completed tables whose spread reflects the uncertainty of the fill.
//!
//! Each chain starts by drawing every missing cell from the observed values of
//! its column, then sweeps the incomplete attributes left to right for a fixed
//! number of iterations, re-imputing one attribute at a time from all the
//! others. With the tree method, an attribute is re-imputed by growing a tree
//! on the rows where it is observed and giving each missing cell the value of a
//! random observed donor from the same leaf.
//!
//! Chains are independent and run in parallel. Chain `k` is seeded with
//! `seed + k`, so results do not depend on scheduling.

use crate::data::{Attribute, AttributeKind, MassTable};
use crate::progress::create_progress_bar;
use crate::tree::{TreeControl, TreeError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod cart;

/// How a missing cell is re-imputed on each sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeMethod {
    /// Donor draw from the leaf of a tree fitted on the observed rows.
    #[default]
    Cart,
    /// Random draw from the observed values of the column.
    Sample,
    /// Most frequent code, or the median for age.
    Mode,
}

impl fmt::Display for ImputeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImputeMethod::Cart => "cart",
            ImputeMethod::Sample => "sample",
            ImputeMethod::Mode => "mode",
        };
        f.write_str(name)
    }
}

/// Which completed table feeds the rest of the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedSelection {
    /// Cellwise majority vote across chains.
    Pooled,
    /// One chain, numbered from 1.
    Chain(usize),
}

impl Default for CompletedSelection {
    fn default() -> Self {
        CompletedSelection::Chain(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputeConfig {
    pub method: ImputeMethod,
    /// Number of independent chains (completed tables).
    pub imputations: usize,
    /// Sweeps over the incomplete attributes per chain.
    pub iterations: usize,
    /// Smallest leaf of the imputation trees.
    pub min_bucket: usize,
    /// Complexity threshold of the imputation trees.
    pub cp: f64,
    /// Use severity as a predictor when imputing the other attributes.
    pub include_outcome: bool,
    pub use_completed: CompletedSelection,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self {
            method: ImputeMethod::Cart,
            imputations: 5,
            iterations: 5,
            min_bucket: 5,
            cp: 1e-4,
            include_outcome: true,
            use_completed: CompletedSelection::default(),
        }
    }
}

impl ImputeConfig {
    pub fn validate(&self) -> Result<(), ImputeError> {
        if self.imputations == 0 {
            return Err(ImputeError::InvalidConfig(
                "at least one imputation is required".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(ImputeError::InvalidConfig(
                "at least one iteration is required".to_string(),
            ));
        }
        if self.min_bucket == 0 {
            return Err(ImputeError::InvalidConfig(
                "min_bucket must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cp) {
            return Err(ImputeError::InvalidConfig(format!(
                "cp must lie in [0, 1], got {}",
                self.cp
            )));
        }
        if let CompletedSelection::Chain(k) = self.use_completed {
            if k == 0 || k > self.imputations {
                return Err(ImputeError::InvalidConfig(format!(
                    "use_completed chain {k} is outside 1..={}",
                    self.imputations
                )));
            }
        }
        Ok(())
    }

    /// Control for the per-attribute trees. Only `min_bucket` is set, so
    /// `min_split` follows as three times the bucket size.
    fn tree_control(&self) -> TreeControl {
        TreeControl {
            min_split: self.min_bucket * 3,
            min_bucket: Some(self.min_bucket),
            cp: self.cp,
            xval: 0,
            ..TreeControl::default()
        }
    }

    fn effective_iterations(&self) -> usize {
        match self.method {
            ImputeMethod::Cart => self.iterations,
            // Neither depends on the other columns, so one sweep is final.
            ImputeMethod::Sample | ImputeMethod::Mode => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ImputeError {
    #[error("Invalid imputation settings: {0}")]
    InvalidConfig(String),
    #[error("The attribute '{0}' has no observed values, so there is nothing to impute from.")]
    NothingObserved(Attribute),
    #[error(
        "{0} rows have no severity label. Labels are never imputed; drop these rows before imputation."
    )]
    MissingLabels(usize),
    #[error("Completed dataset {requested} was requested, but only {available} exist (numbered from 1).")]
    NoSuchImputation { requested: usize, available: usize },
    #[error("Failed to fit an imputation tree: {0}")]
    Tree(#[from] TreeError),
}

/// Mean of the imputed cells of each attribute after every sweep of one chain.
/// Flat traces across iterations indicate the chain has settled.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTrace {
    pub chain: usize,
    /// `iterations[i]` holds `(attribute, mean imputed value)` after sweep `i`.
    pub iterations: Vec<Vec<(Attribute, f64)>>,
}

/// The result of multiple imputation.
#[derive(Debug, Clone)]
pub struct Imputation {
    pub method: ImputeMethod,
    pub completed: Vec<MassTable>,
    pub traces: Vec<ChainTrace>,
    /// `(row, attribute)` of every cell that was filled.
    pub imputed_cells: Vec<(usize, Attribute)>,
}

impl Imputation {
    /// Completed table `k`, numbered from 1.
    pub fn complete(&self, k: usize) -> Result<&MassTable, ImputeError> {
        if k == 0 || k > self.completed.len() {
            return Err(ImputeError::NoSuchImputation {
                requested: k,
                available: self.completed.len(),
            });
        }
        Ok(&self.completed[k - 1])
    }

    /// One table combining all chains: each imputed cell takes the most
    /// frequent value across chains (the lower code on ties), or the median
    /// for age. Observed cells are shared by every chain.
    pub fn pooled(&self) -> MassTable {
        let Some(first) = self.completed.first() else {
            return MassTable::empty();
        };
        let mut pooled = first.clone();
        for &(row, attribute) in &self.imputed_cells {
            let mut votes: Vec<f64> = self
                .completed
                .iter()
                .filter_map(|t| t.value(row, attribute))
                .collect();
            if votes.is_empty() {
                continue;
            }
            let value = if attribute.domain().kind == AttributeKind::Continuous {
                median(&mut votes)
            } else {
                mode(&votes)
            };
            pooled.set(row, attribute, value);
        }
        pooled
    }

    pub fn select(&self, selection: CompletedSelection) -> Result<MassTable, ImputeError> {
        match selection {
            CompletedSelection::Pooled => Ok(self.pooled()),
            CompletedSelection::Chain(k) => self.complete(k).cloned(),
        }
    }
}

/// Runs `config.imputations` chains over `table`.
///
/// Observed cells are never altered. Severity must be complete; the other
/// attributes may each be missing anywhere as long as at least one value of
/// each is observed.
pub fn impute(table: &MassTable, config: &ImputeConfig, seed: u64) -> Result<Imputation, ImputeError> {
    config.validate()?;
    let unlabelled = table.missing_count(Attribute::Severity);
    if unlabelled > 0 {
        return Err(ImputeError::MissingLabels(unlabelled));
    }

    let targets = table.incomplete_attributes();
    let mut plans = Vec::with_capacity(targets.len());
    for &attribute in &targets {
        let (observed_rows, missing_rows): (Vec<usize>, Vec<usize>) =
            (0..table.n_rows()).partition(|&r| !table.is_missing(r, attribute));
        if observed_rows.is_empty() {
            return Err(ImputeError::NothingObserved(attribute));
        }
        let observed_values = observed_rows
            .iter()
            .filter_map(|&r| table.value(r, attribute))
            .collect();
        plans.push(ColumnPlan {
            attribute,
            observed_rows,
            missing_rows,
            observed_values,
        });
    }
    let imputed_cells: Vec<(usize, Attribute)> = plans
        .iter()
        .flat_map(|p| p.missing_rows.iter().map(move |&r| (r, p.attribute)))
        .collect();

    log::info!(
        "Imputing {} cells across {} attributes with method '{}' ({} chains, {} iterations)",
        imputed_cells.len(),
        plans.len(),
        config.method,
        config.imputations,
        config.effective_iterations()
    );

    let pb = create_progress_bar(config.imputations as u64, "Imputation chains");
    let chains: Vec<(MassTable, ChainTrace)> = (0..config.imputations)
        .into_par_iter()
        .map(|chain| {
            let result = run_chain(table, &plans, config, chain, seed.wrapping_add(chain as u64));
            pb.inc(1);
            result
        })
        .collect::<Result<_, ImputeError>>()?;
    pb.finish_and_clear();

    let (completed, traces) = chains.into_iter().unzip();
    Ok(Imputation {
        method: config.method,
        completed,
        traces,
        imputed_cells,
    })
}

/// The fixed facts about one incomplete attribute.
struct ColumnPlan {
    attribute: Attribute,
    observed_rows: Vec<usize>,
    missing_rows: Vec<usize>,
    observed_values: Vec<f64>,
}

fn run_chain(
    table: &MassTable,
    plans: &[ColumnPlan],
    config: &ImputeConfig,
    chain: usize,
    seed: u64,
) -> Result<(MassTable, ChainTrace), ImputeError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut work = table.clone();

    for plan in plans {
        for &row in &plan.missing_rows {
            if let Some(&v) = plan.observed_values.choose(&mut rng) {
                work.set(row, plan.attribute, v);
            }
        }
    }

    let control = config.tree_control();
    let mut trace = ChainTrace {
        chain: chain + 1,
        iterations: Vec::with_capacity(config.effective_iterations()),
    };
    for iteration in 0..config.effective_iterations() {
        let mut sweep = Vec::with_capacity(plans.len());
        for plan in plans {
            let fills: Vec<f64> = match config.method {
                ImputeMethod::Cart => {
                    let predictors: Vec<Attribute> = Attribute::ALL
                        .into_iter()
                        .filter(|&a| a != plan.attribute)
                        .filter(|&a| config.include_outcome || a != Attribute::Severity)
                        .collect();
                    cart::leaf_donors(&work, plan, &predictors, &control, &mut rng)?
                }
                ImputeMethod::Sample => plan
                    .missing_rows
                    .iter()
                    .filter_map(|_| plan.observed_values.choose(&mut rng).copied())
                    .collect(),
                ImputeMethod::Mode => {
                    let mut values = plan.observed_values.clone();
                    let fill = if plan.attribute.domain().kind == AttributeKind::Continuous {
                        median(&mut values)
                    } else {
                        mode(&values)
                    };
                    vec![fill; plan.missing_rows.len()]
                }
            };
            for (&row, &value) in plan.missing_rows.iter().zip(&fills) {
                work.set(row, plan.attribute, value);
            }
            let mean = fills.iter().sum::<f64>() / fills.len().max(1) as f64;
            sweep.push((plan.attribute, mean));
        }
        log::debug!("Chain {} iteration {}: {:?}", chain + 1, iteration + 1, sweep);
        trace.iterations.push(sweep);
    }
    Ok((work, trace))
}

/// Most frequent value; the smallest value wins ties.
fn mode(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut best = (f64::NAN, 0usize);
    for group in sorted.chunk_by(|a, b| a == b) {
        if group.len() > best.1 {
            best = (group[0], group.len());
        }
    }
    best.0
}

/// Median with the midpoint of the two central values for even counts.
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SyntheticMasses;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn small_config(method: ImputeMethod) -> ImputeConfig {
        ImputeConfig {
            method,
            imputations: 3,
            iterations: 2,
            ..ImputeConfig::default()
        }
    }

    #[test]
    fn every_chain_is_complete_and_keeps_observed_cells() {
        let table = SyntheticMasses::new(150).missing_rate(0.1).seed(5).build();
        assert!(!table.is_complete());
        let result = impute(&table, &small_config(ImputeMethod::Cart), 11).unwrap();
        assert_eq!(result.completed.len(), 3);
        for completed in &result.completed {
            assert!(completed.is_complete());
            for row in 0..table.n_rows() {
                for attribute in Attribute::ALL {
                    if let Some(v) = table.value(row, attribute) {
                        assert_eq!(completed.value(row, attribute), Some(v));
                    }
                }
            }
        }
    }

    #[test]
    fn imputed_values_are_observed_codes() {
        let table = SyntheticMasses::new(120).missing_rate(0.15).seed(8).build();
        let result = impute(&table, &small_config(ImputeMethod::Cart), 2).unwrap();
        for &(row, attribute) in &result.imputed_cells {
            let observed = table.observed(attribute);
            for completed in &result.completed {
                let v = completed.value(row, attribute).unwrap();
                assert!(observed.contains(&v), "{attribute} filled with unseen {v}");
            }
        }
    }

    #[test]
    fn traces_cover_every_iteration_and_attribute() {
        let table = SyntheticMasses::new(100).missing_rate(0.1).seed(3).build();
        let config = small_config(ImputeMethod::Cart);
        let result = impute(&table, &config, 1).unwrap();
        assert_eq!(result.traces.len(), 3);
        let incomplete = table.incomplete_attributes();
        for (k, trace) in result.traces.iter().enumerate() {
            assert_eq!(trace.chain, k + 1);
            assert_eq!(trace.iterations.len(), config.iterations);
            for sweep in &trace.iterations {
                let attributes: Vec<Attribute> = sweep.iter().map(|(a, _)| *a).collect();
                assert_eq!(attributes, incomplete);
            }
        }
    }

    #[test]
    fn same_seed_gives_same_tables() {
        let table = SyntheticMasses::new(90).missing_rate(0.1).seed(4).build();
        let config = small_config(ImputeMethod::Cart);
        let a = impute(&table, &config, 21).unwrap();
        let b = impute(&table, &config, 21).unwrap();
        assert_eq!(a.completed, b.completed);
    }

    #[test]
    fn mode_fills_most_frequent_code_and_median_age() {
        let values = array![
            [4.0, 40.0, 1.0, 1.0, 3.0, 0.0],
            [4.0, 50.0, 1.0, 2.0, 3.0, 0.0],
            [5.0, 60.0, 4.0, 2.0, 3.0, 1.0],
            [5.0, 70.0, 4.0, 5.0, 3.0, 1.0],
            [5.0, f64::NAN, f64::NAN, 5.0, 3.0, 1.0],
        ];
        let table = MassTable::from_array(values).unwrap();
        let result = impute(&table, &small_config(ImputeMethod::Mode), 0).unwrap();
        let completed = result.complete(1).unwrap();
        assert_abs_diff_eq!(completed.value(4, Attribute::Age).unwrap(), 55.0, epsilon = 1e-12);
        // Shape codes 1 and 4 tie; the lower code wins.
        assert_abs_diff_eq!(completed.value(4, Attribute::Shape).unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(result.completed[0], result.completed[2]);
    }

    #[test]
    fn pooled_votes_across_chains() {
        let table = SyntheticMasses::new(80).missing_rate(0.2).seed(6).build();
        let result = impute(&table, &small_config(ImputeMethod::Sample), 9).unwrap();
        let pooled = result.pooled();
        assert!(pooled.is_complete());
        for &(row, attribute) in &result.imputed_cells {
            let v = pooled.value(row, attribute).unwrap();
            assert!(
                result
                    .completed
                    .iter()
                    .any(|t| t.value(row, attribute) == Some(v))
                    || attribute == Attribute::Age
            );
        }
    }

    #[test]
    fn chain_numbers_start_at_one() {
        let table = SyntheticMasses::new(60).missing_rate(0.1).build();
        let result = impute(&table, &small_config(ImputeMethod::Sample), 0).unwrap();
        assert!(result.complete(1).is_ok());
        assert!(result.complete(3).is_ok());
        assert!(matches!(
            result.complete(0),
            Err(ImputeError::NoSuchImputation { requested: 0, available: 3 })
        ));
        assert!(result.select(CompletedSelection::Chain(4)).is_err());
        assert!(result.select(CompletedSelection::Pooled).is_ok());
    }

    #[test]
    fn unlabelled_rows_and_empty_columns_are_rejected() {
        let mut table = SyntheticMasses::new(30).build();
        table.set_missing(2, Attribute::Severity);
        assert!(matches!(
            impute(&table, &ImputeConfig::default(), 0),
            Err(ImputeError::MissingLabels(1))
        ));

        let mut table = SyntheticMasses::new(30).build();
        for row in 0..30 {
            table.set_missing(row, Attribute::Density);
        }
        assert!(matches!(
            impute(&table, &ImputeConfig::default(), 0),
            Err(ImputeError::NothingObserved(Attribute::Density))
        ));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let config = ImputeConfig {
            use_completed: CompletedSelection::Chain(6),
            ..ImputeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ImputeError::InvalidConfig(_))));
        let config = ImputeConfig {
            imputations: 0,
            ..ImputeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn complete_tables_pass_through_untouched() {
        let table = SyntheticMasses::new(40).build();
        let result = impute(&table, &ImputeConfig::default(), 0).unwrap();
        assert!(result.imputed_cells.is_empty());
        assert!(result.completed.iter().all(|t| *t == table));
    }
}
