use super::{DecisionTree, NodeSplit, Response, TreeControl, TreeError, TreeNode, prune};
use ndarray::ArrayView2;

/// Improvements at or below this fraction of the parent impurity are treated as ties with zero.
const RELATIVE_IMPROVEMENT_FLOOR: f64 = 1e-10;

/// Grows a tree on `x` against `response` and prunes it at `control.cp`.
///
/// # Arguments
/// * `x`: predictor matrix of shape `[n_samples, n_features]`, all values finite.
/// * `response`: class labels or continuous outcomes, one per row of `x`.
/// * `feature_names`: one name per column of `x`, kept for reporting.
/// * `control`: growth limits and the final complexity threshold.
pub fn grow(
    x: ArrayView2<f64>,
    response: &Response,
    feature_names: &[String],
    control: &TreeControl,
) -> Result<DecisionTree, TreeError> {
    control.validate()?;
    validate_inputs(x, response, feature_names)?;

    let mut grower = Grower {
        x,
        response,
        control,
        min_bucket: control.effective_min_bucket(),
        nodes: Vec::new(),
    };
    grower.build((0..x.nrows()).collect(), 0);

    let mut nodes = grower.nodes;
    let root_risk = nodes[0].risk;
    prune::assign_complexity(&mut nodes, root_risk);

    let class_count = match response {
        Response::Class { class_count, .. } => *class_count,
        Response::Continuous(_) => 0,
    };
    let full = DecisionTree {
        method: response.method(),
        feature_names: feature_names.to_vec(),
        class_count,
        root_risk,
        cp: 0.0,
        nodes,
    };
    log::debug!(
        "Grew {:?} tree on {} rows: {} splits before pruning at cp={}",
        full.method,
        x.nrows(),
        full.split_count(),
        control.cp
    );
    Ok(full.prune(control.cp))
}

fn validate_inputs(
    x: ArrayView2<f64>,
    response: &Response,
    feature_names: &[String],
) -> Result<(), TreeError> {
    if x.nrows() == 0 {
        return Err(TreeError::EmptyData);
    }
    if response.len() != x.nrows() {
        return Err(TreeError::RowMismatch {
            rows: x.nrows(),
            response: response.len(),
        });
    }
    if feature_names.len() != x.ncols() {
        return Err(TreeError::FeatureCountMismatch {
            expected: feature_names.len(),
            found: x.ncols(),
        });
    }
    if let Some(((row, feature), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(TreeError::NonFiniteFeature {
            feature: feature_names[feature].clone(),
            row,
        });
    }
    match response {
        Response::Class {
            labels,
            class_count,
        } => {
            if let Some((row, &label)) = labels.iter().enumerate().find(|(_, l)| **l >= *class_count) {
                return Err(TreeError::LabelOutOfRange {
                    label,
                    row,
                    class_count: *class_count,
                });
            }
        }
        Response::Continuous(values) => {
            if let Some(row) = values.iter().position(|v| !v.is_finite()) {
                return Err(TreeError::NonFiniteResponse(row));
            }
        }
    }
    Ok(())
}

/// Summary of the rows in one node.
struct NodeFit {
    value: f64,
    class_counts: Vec<usize>,
    risk: f64,
}

fn fit_node(response: &Response, rows: &[usize]) -> NodeFit {
    match response {
        Response::Class {
            labels,
            class_count,
        } => {
            let mut counts = vec![0usize; *class_count];
            for &r in rows {
                counts[labels[r]] += 1;
            }
            // Ties go to the lowest class index.
            let mut majority = 0;
            for (class, &count) in counts.iter().enumerate() {
                if count > counts[majority] {
                    majority = class;
                }
            }
            NodeFit {
                value: majority as f64,
                risk: (rows.len() - counts[majority]) as f64,
                class_counts: counts,
            }
        }
        Response::Continuous(values) => {
            let n = rows.len() as f64;
            let mean = rows.iter().map(|&r| values[r]).sum::<f64>() / n;
            let sse = rows.iter().map(|&r| (values[r] - mean).powi(2)).sum();
            NodeFit {
                value: mean,
                class_counts: Vec::new(),
                risk: sse,
            }
        }
    }
}

/// A winning split proposal for one node.
struct Candidate {
    feature: usize,
    threshold: f64,
    improvement: f64,
}

struct Grower<'a, 'r, 'c> {
    x: ArrayView2<'a, f64>,
    response: &'r Response,
    control: &'c TreeControl,
    min_bucket: usize,
    nodes: Vec<TreeNode>,
}

impl Grower<'_, '_, '_> {
    /// Appends the subtree for `rows` and returns the index of its root.
    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let fit = fit_node(self.response, &rows);
        let id = self.nodes.len();
        let risk = fit.risk;
        self.nodes.push(TreeNode {
            n_obs: rows.len(),
            depth,
            value: fit.value,
            class_counts: fit.class_counts,
            risk,
            complexity: 0.0,
            split: None,
        });

        if rows.len() < self.control.min_split || depth >= self.control.max_depth || risk <= 0.0 {
            return id;
        }
        let Some(candidate) = self.best_split(&rows) else {
            return id;
        };

        let x = self.x;
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| x[[r, candidate.feature]] < candidate.threshold);
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[id].split = Some(NodeSplit {
            feature: candidate.feature,
            threshold: candidate.threshold,
            left,
            right,
            improvement: candidate.improvement,
        });
        id
    }

    fn best_split(&self, rows: &[usize]) -> Option<Candidate> {
        let mut order = rows.to_vec();
        let mut best: Option<Candidate> = None;
        for feature in 0..self.x.ncols() {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let found = match self.response {
                Response::Class {
                    labels,
                    class_count,
                } => self.scan_gini(&order, feature, labels, *class_count),
                Response::Continuous(values) => self.scan_anova(&order, feature, values),
            };
            if let Some(candidate) = found {
                if best
                    .as_ref()
                    .is_none_or(|b| candidate.improvement > b.improvement)
                {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Walks the sorted rows once, moving one row at a time to the left child.
    /// Yields `(position, threshold)` for every admissible cut; `position` is
    /// the size of the left child.
    fn admissible_cuts<'b>(
        &'b self,
        order: &'b [usize],
        feature: usize,
    ) -> impl Iterator<Item = (usize, f64)> + 'b {
        let n = order.len();
        (self.min_bucket..=n.saturating_sub(self.min_bucket)).filter_map(move |n_left| {
            if n_left == 0 || n_left >= n {
                return None;
            }
            let below = self.x[[order[n_left - 1], feature]];
            let above = self.x[[order[n_left], feature]];
            (below < above).then(|| (n_left, 0.5 * (below + above)))
        })
    }

    fn scan_gini(
        &self,
        order: &[usize],
        feature: usize,
        labels: &[usize],
        class_count: usize,
    ) -> Option<Candidate> {
        let n = order.len();
        let mut total = vec![0.0f64; class_count];
        for &r in order {
            total[labels[r]] += 1.0;
        }
        let weighted_gini = |counts: &[f64], size: f64| -> f64 {
            if size <= 0.0 {
                return 0.0;
            }
            size - counts.iter().map(|c| c * c).sum::<f64>() / size
        };
        let parent = weighted_gini(&total, n as f64);

        // Prefix class counts: left[k] after moving order[..k] left.
        let mut prefix = vec![vec![0.0f64; class_count]; n + 1];
        for (k, &r) in order.iter().enumerate() {
            let (done, rest) = prefix.split_at_mut(k + 1);
            rest[0].copy_from_slice(&done[k]);
            rest[0][labels[r]] += 1.0;
        }

        let mut best: Option<Candidate> = None;
        for (n_left, threshold) in self.admissible_cuts(order, feature) {
            let left = &prefix[n_left];
            let right: Vec<f64> = total.iter().zip(left).map(|(t, l)| t - l).collect();
            let improvement = parent
                - weighted_gini(left, n_left as f64)
                - weighted_gini(&right, (n - n_left) as f64);
            if improvement > parent * RELATIVE_IMPROVEMENT_FLOOR
                && best.as_ref().is_none_or(|b| improvement > b.improvement)
            {
                best = Some(Candidate {
                    feature,
                    threshold,
                    improvement,
                });
            }
        }
        best
    }

    fn scan_anova(&self, order: &[usize], feature: usize, values: &[f64]) -> Option<Candidate> {
        let n = order.len();
        let mut sum = vec![0.0f64; n + 1];
        let mut sum_sq = vec![0.0f64; n + 1];
        for (k, &r) in order.iter().enumerate() {
            sum[k + 1] = sum[k] + values[r];
            sum_sq[k + 1] = sum_sq[k] + values[r] * values[r];
        }
        let sse = |s: f64, s2: f64, size: f64| -> f64 {
            if size <= 0.0 {
                return 0.0;
            }
            (s2 - s * s / size).max(0.0)
        };
        let parent = sse(sum[n], sum_sq[n], n as f64);

        let mut best: Option<Candidate> = None;
        for (n_left, threshold) in self.admissible_cuts(order, feature) {
            let left = sse(sum[n_left], sum_sq[n_left], n_left as f64);
            let right = sse(
                sum[n] - sum[n_left],
                sum_sq[n] - sum_sq[n_left],
                (n - n_left) as f64,
            );
            let improvement = parent - left - right;
            if improvement > parent * RELATIVE_IMPROVEMENT_FLOOR
                && best.as_ref().is_none_or(|b| improvement > b.improvement)
            {
                best = Some(Candidate {
                    feature,
                    threshold,
                    improvement,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Method;
    use crate::tree::tests::separable;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn names(k: usize) -> Vec<String> {
        (0..k).map(|i| format!("x{i}")).collect()
    }

    #[test]
    fn regression_tree_separates_two_levels() {
        let n = 30;
        let mut x = Array2::zeros((n, 1));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            x[[i, 0]] = i as f64;
            y.push(if i < 15 { 10.0 } else { 50.0 });
        }
        let tree = grow(
            x.view(),
            &Response::Continuous(y),
            &names(1),
            &TreeControl::default(),
        )
        .unwrap();
        assert_eq!(tree.method, Method::Anova);
        assert_eq!(tree.split_count(), 1);
        assert_abs_diff_eq!(tree.root().value, 30.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tree.root_risk, 30.0 * 400.0, epsilon = 1e-6);
        let split = tree.root().split.unwrap();
        assert_abs_diff_eq!(split.threshold, 14.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tree.nodes[split.left].value, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tree.nodes[split.right].value, 50.0, epsilon = 1e-12);
    }

    #[test]
    fn small_nodes_are_not_split() {
        let (x, y) = separable();
        let control = TreeControl {
            min_split: 41,
            ..TreeControl::default()
        };
        let tree = grow(x.view(), &y, &names(2), &control).unwrap();
        assert_eq!(tree.split_count(), 0);
        assert_eq!(tree.nodes.len(), 1);
    }

    #[test]
    fn leaves_respect_min_bucket() {
        let n = 60;
        let mut x = Array2::zeros((n, 1));
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            x[[i, 0]] = i as f64;
            // Only the first three rows are malignant; a pure cut would leave a leaf of 3.
            labels.push(usize::from(i < 3));
        }
        let control = TreeControl {
            cp: 0.0,
            ..TreeControl::default()
        };
        let tree = grow(
            x.view(),
            &Response::Class {
                labels,
                class_count: 2,
            },
            &names(1),
            &control,
        )
        .unwrap();
        for node in tree.nodes.iter().filter(|n| n.split.is_none()) {
            assert!(node.n_obs >= control.effective_min_bucket());
        }
    }

    #[test]
    fn depth_limit_is_honoured() {
        let n = 200;
        let mut x = Array2::zeros((n, 1));
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            x[[i, 0]] = i as f64;
            labels.push((i / 25) % 2);
        }
        let control = TreeControl {
            cp: 0.0,
            max_depth: 2,
            ..TreeControl::default()
        };
        let tree = grow(
            x.view(),
            &Response::Class {
                labels,
                class_count: 2,
            },
            &names(1),
            &control,
        )
        .unwrap();
        assert!(tree.depth() <= 2);
        assert!(tree.split_count() >= 1);
    }

    #[test]
    fn invalid_inputs_are_reported() {
        let mut x = Array2::zeros((25, 1));
        let labels = vec![0usize; 25];
        x[[4, 0]] = f64::NAN;
        let response = Response::Class {
            labels: labels.clone(),
            class_count: 2,
        };
        assert!(matches!(
            grow(x.view(), &response, &names(1), &TreeControl::default()),
            Err(TreeError::NonFiniteFeature { row: 4, .. })
        ));

        let x = Array2::zeros((25, 1));
        let short = Response::Class {
            labels: vec![0; 3],
            class_count: 2,
        };
        assert!(matches!(
            grow(x.view(), &short, &names(1), &TreeControl::default()),
            Err(TreeError::RowMismatch { rows: 25, response: 3 })
        ));

        let out_of_range = Response::Class {
            labels: vec![2; 25],
            class_count: 2,
        };
        assert!(matches!(
            grow(x.view(), &out_of_range, &names(1), &TreeControl::default()),
            Err(TreeError::LabelOutOfRange { label: 2, row: 0, .. })
        ));

        let empty = Array2::<f64>::zeros((0, 1));
        let none = Response::Continuous(Vec::new());
        assert!(matches!(
            grow(empty.view(), &none, &names(1), &TreeControl::default()),
            Err(TreeError::EmptyData)
        ));
    }

    #[test]
    fn inputs_with_unrelated_borrows_grow_a_tree() {
        let (x, y) = separable();
        let view = x.view();
        let tree = {
            let control = TreeControl {
                cp: 0.0,
                ..TreeControl::default()
            };
            let response = y.clone();
            grow(view, &response, &names(2), &control).unwrap()
        };
        assert_eq!(tree.split_count(), 1);
        assert_eq!(tree.predict(view).unwrap().len(), 40);
    }
}
