use super::ColumnPlan;
use crate::data::{Attribute, MassTable};
use crate::tree::{Response, TreeControl, TreeError, grow};
use ahash::AHashMap;
use rand::Rng;
use rand::seq::SliceRandom;

/// Re-imputes one attribute: grows a tree on the rows where it is observed,
/// drops every missing row down that tree, and returns, per missing row, the
/// value of a uniformly drawn observed donor from the same leaf.
pub(super) fn leaf_donors<R: Rng>(
    work: &MassTable,
    plan: &ColumnPlan,
    predictors: &[Attribute],
    control: &TreeControl,
    rng: &mut R,
) -> Result<Vec<f64>, TreeError> {
    let target = plan.attribute;
    let names: Vec<String> = predictors.iter().map(|a| a.name().to_string()).collect();
    let x_observed = work.select_rows(&plan.observed_rows).feature_matrix(predictors);
    let response = response_for(target, &plan.observed_values);
    let tree = grow(x_observed.view(), &response, &names, control)?;

    let mut donors: AHashMap<usize, Vec<f64>> = AHashMap::new();
    for (row, &value) in x_observed.rows().into_iter().zip(&plan.observed_values) {
        donors.entry(tree.leaf_index(row)).or_default().push(value);
    }

    let x_missing = work.select_rows(&plan.missing_rows).feature_matrix(predictors);
    let fills = x_missing
        .rows()
        .into_iter()
        .map(|row| {
            let pool = donors
                .get(&tree.leaf_index(row))
                .map_or(plan.observed_values.as_slice(), Vec::as_slice);
            pool.choose(&mut *rng).copied().unwrap_or(f64::NAN)
        })
        .collect();
    Ok(fills)
}

/// Codes become class indices offset from the domain minimum; age stays continuous.
fn response_for(target: Attribute, observed: &[f64]) -> Response {
    let domain = target.domain();
    if target.is_categorical() {
        Response::Class {
            labels: observed.iter().map(|&v| (v - domain.min) as usize).collect(),
            class_count: (domain.max - domain.min) as usize + 1,
        }
    } else {
        Response::Continuous(observed.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SyntheticMasses;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn categorical_targets_become_offset_classes() {
        match response_for(Attribute::Shape, &[1.0, 4.0, 2.0]) {
            Response::Class {
                labels,
                class_count,
            } => {
                assert_eq!(labels, vec![0, 3, 1]);
                assert_eq!(class_count, 4);
            }
            Response::Continuous(_) => panic!("shape should be categorical"),
        }
        assert!(matches!(
            response_for(Attribute::Age, &[33.0]),
            Response::Continuous(_)
        ));
    }

    #[test]
    fn donors_share_the_leaf_of_the_missing_row() {
        let mut table = SyntheticMasses::new(200).label_noise(0.0).seed(12).build();
        let missing_rows = vec![0, 1, 2, 3];
        for &r in &missing_rows {
            table.set_missing(r, Attribute::BiRads);
        }
        let observed_rows: Vec<usize> = (4..200).collect();
        let observed_values: Vec<f64> = observed_rows
            .iter()
            .filter_map(|&r| table.value(r, Attribute::BiRads))
            .collect();
        // Placeholder codes; the target column is not a predictor of itself.
        let mut work = table.clone();
        for &r in &missing_rows {
            work.set(r, Attribute::BiRads, 4.0);
        }
        let plan = ColumnPlan {
            attribute: Attribute::BiRads,
            observed_rows,
            missing_rows,
            observed_values,
        };
        let predictors = [
            Attribute::Age,
            Attribute::Shape,
            Attribute::Margin,
            Attribute::Density,
            Attribute::Severity,
        ];
        let control = TreeControl {
            min_split: 15,
            min_bucket: Some(5),
            cp: 1e-4,
            xval: 0,
            ..TreeControl::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let fills = leaf_donors(&work, &plan, &predictors, &control, &mut rng).unwrap();
        assert_eq!(fills.len(), 4);
        assert!(fills.iter().all(|v| [3.0, 4.0, 5.0].contains(v)));
    }
}
