use super::{CpRow, DecisionTree, Response, TreeControl, TreeError, grow};
use crate::split::kfold_assignment;
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a cp is read off a cross-validated cp table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CpRule {
    /// The smallest tree attaining the minimal cross-validated error.
    #[default]
    MinXerror,
    /// The smallest tree within one standard error of the minimum.
    OneStandardError,
}

impl fmt::Display for CpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpRule::MinXerror => write!(f, "minimum xerror"),
            CpRule::OneStandardError => write!(f, "1-SE"),
        }
    }
}

/// Fills the `xerror` and `xstd` columns of `tree`'s cp table by k-fold
/// cross-validation with `control.xval` folds.
///
/// Each fold grows a tree with `control` on the remaining rows; the held-out
/// rows are predicted by that tree viewed at the geometric mean of each pair
/// of adjacent table cps, so every table row is scored by a comparable
/// subtree size. Folds run in parallel; the fold assignment is fixed by
/// `seed` beforehand.
pub fn cross_validate(
    tree: &DecisionTree,
    x: ArrayView2<f64>,
    response: &Response,
    control: &TreeControl,
    seed: u64,
) -> Result<Vec<CpRow>, TreeError> {
    if control.xval < 2 {
        return Err(TreeError::InvalidControl(format!(
            "cross-validation needs at least 2 folds, got {}",
            control.xval
        )));
    }
    if x.nrows() != response.len() {
        return Err(TreeError::RowMismatch {
            rows: x.nrows(),
            response: response.len(),
        });
    }

    let mut table = tree.cp_table();
    let cp_points: Vec<f64> = table
        .iter()
        .enumerate()
        .map(|(j, row)| {
            if j == 0 {
                f64::INFINITY
            } else {
                (row.cp * table[j - 1].cp).sqrt()
            }
        })
        .collect();

    let n = x.nrows();
    let folds = kfold_assignment(n, control.xval, seed)?;
    log::debug!(
        "Cross-validating {} cp values over {} folds of {} rows",
        cp_points.len(),
        control.xval,
        n
    );

    let per_fold: Vec<Vec<(usize, Vec<f64>)>> = (0..control.xval)
        .into_par_iter()
        .map(|fold| -> Result<Vec<(usize, Vec<f64>)>, TreeError> {
            let (held_out, training): (Vec<usize>, Vec<usize>) =
                (0..n).partition(|&row| folds[row] == fold);
            let fold_tree = grow(
                x.select(Axis(0), &training).view(),
                &response.select(&training),
                &tree.feature_names,
                control,
            )?;
            Ok(held_out
                .into_iter()
                .map(|row| {
                    let losses = cp_points
                        .iter()
                        .map(|&cp| response.loss(row, fold_tree.predict_row_at(x.row(row), cp)))
                        .collect();
                    (row, losses)
                })
                .collect())
        })
        .collect::<Result<_, TreeError>>()?;

    let scale = if tree.root_risk > 0.0 { tree.root_risk } else { 1.0 };
    let losses: Vec<Vec<f64>> = per_fold
        .into_iter()
        .flatten()
        .map(|(_, losses)| losses)
        .collect();
    for (j, row) in table.iter_mut().enumerate() {
        let total: f64 = losses.iter().map(|l| l[j]).sum();
        let mean = total / n as f64;
        let spread: f64 = losses.iter().map(|l| (l[j] - mean).powi(2)).sum();
        row.xerror = Some(total / scale);
        row.xstd = Some(spread.sqrt() / scale);
    }
    Ok(table)
}

/// Picks the row of a cross-validated cp table according to `rule`. Rows are
/// ordered from the smallest tree, so the first qualifying row is the
/// simplest.
pub fn select_cp(table: &[CpRow], rule: CpRule) -> Result<&CpRow, TreeError> {
    let scored: Vec<(usize, f64, f64)> = table
        .iter()
        .enumerate()
        .map(|(i, row)| match (row.xerror, row.xstd) {
            (Some(xerror), Some(xstd)) => Ok((i, xerror, xstd)),
            _ => Err(TreeError::NotCrossValidated),
        })
        .collect::<Result<_, _>>()?;

    let mut best = *scored.first().ok_or(TreeError::NotCrossValidated)?;
    for &candidate in &scored[1..] {
        if candidate.1 < best.1 {
            best = candidate;
        }
    }
    let threshold = match rule {
        CpRule::MinXerror => best.1,
        CpRule::OneStandardError => best.1 + best.2,
    };
    let chosen = scored
        .iter()
        .find(|(_, xerror, _)| *xerror <= threshold + 1e-12)
        .map_or(best.0, |(i, _, _)| *i);
    Ok(&table[chosen])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::separable;
    use approx::assert_abs_diff_eq;

    fn row(cp: f64, nsplit: usize, xerror: f64, xstd: f64) -> CpRow {
        CpRow {
            cp,
            nsplit,
            rel_error: 0.0,
            xerror: Some(xerror),
            xstd: Some(xstd),
        }
    }

    #[test]
    fn separable_data_cross_validates_to_the_split() {
        let (x, y) = separable();
        let names = vec!["a".to_string(), "b".to_string()];
        let control = TreeControl::default();
        let tree = grow(x.view(), &y, &names, &control).unwrap();
        let table = cross_validate(&tree, x.view(), &y, &control, 17).unwrap();
        assert_eq!(table.len(), 2);
        let root_error = table[0].xerror.unwrap();
        let split_error = table[1].xerror.unwrap();
        assert!(root_error > 0.5, "root xerror {root_error}");
        assert!(split_error < 0.3, "split xerror {split_error}");
        assert!(table.iter().all(|r| r.xstd.unwrap() >= 0.0));

        let chosen = select_cp(&table, CpRule::MinXerror).unwrap();
        assert_eq!(chosen.nsplit, 1);
    }

    #[test]
    fn cross_validation_is_reproducible_for_a_seed() {
        let (x, y) = separable();
        let names = vec!["a".to_string(), "b".to_string()];
        let control = TreeControl::default();
        let tree = grow(x.view(), &y, &names, &control).unwrap();
        let a = cross_validate(&tree, x.view(), &y, &control, 3).unwrap();
        let b = cross_validate(&tree, x.view(), &y, &control, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn disabled_folds_are_rejected() {
        let (x, y) = separable();
        let names = vec!["a".to_string(), "b".to_string()];
        let control = TreeControl {
            xval: 0,
            ..TreeControl::default()
        };
        let tree = grow(x.view(), &y, &names, &control).unwrap();
        assert!(matches!(
            cross_validate(&tree, x.view(), &y, &control, 0),
            Err(TreeError::InvalidControl(_))
        ));
    }

    #[test]
    fn min_xerror_prefers_the_smallest_tree_on_ties() {
        let table = vec![
            row(0.5, 0, 1.0, 0.05),
            row(0.1, 1, 0.4, 0.05),
            row(0.02, 3, 0.4, 0.05),
            row(0.01, 5, 0.45, 0.05),
        ];
        let chosen = select_cp(&table, CpRule::MinXerror).unwrap();
        assert_eq!(chosen.nsplit, 1);
        assert_abs_diff_eq!(chosen.cp, 0.1, epsilon = 1e-15);
    }

    #[test]
    fn one_standard_error_picks_a_simpler_tree() {
        let table = vec![
            row(0.5, 0, 1.0, 0.05),
            row(0.1, 1, 0.44, 0.05),
            row(0.02, 3, 0.40, 0.05),
            row(0.01, 5, 0.42, 0.05),
        ];
        assert_eq!(select_cp(&table, CpRule::MinXerror).unwrap().nsplit, 3);
        assert_eq!(
            select_cp(&table, CpRule::OneStandardError).unwrap().nsplit,
            1
        );
    }

    #[test]
    fn tables_without_cross_validation_are_rejected() {
        let (x, y) = separable();
        let names = vec!["a".to_string(), "b".to_string()];
        let tree = grow(x.view(), &y, &names, &TreeControl::default()).unwrap();
        assert!(matches!(
            select_cp(&tree.cp_table(), CpRule::MinXerror),
            Err(TreeError::NotCrossValidated)
        ));
        assert!(matches!(
            select_cp(&[], CpRule::OneStandardError),
            Err(TreeError::NotCrossValidated)
        ));
    }
}
