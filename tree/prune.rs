//! Weakest-link cost-complexity pruning.

use super::{CpRow, DecisionTree, TreeNode};

/// Complexities closer than this (relative to the root risk) collapse together.
const TIE_TOLERANCE: f64 = 1e-9;

/// Records on every internal node the complexity, in units of `root_risk`, at
/// which the weakest-link sequence collapses it. Leaves get 0.
///
/// A node never outlives its parent: when a subtree collapses, every internal
/// node still standing below it takes the same complexity.
pub(super) fn assign_complexity(nodes: &mut [TreeNode], root_risk: f64) {
    let scale = if root_risk > 0.0 { root_risk } else { 1.0 };
    let mut standing: Vec<bool> = nodes.iter().map(|n| n.split.is_some()).collect();
    for node in nodes.iter_mut() {
        node.complexity = 0.0;
    }

    let mut floor = 0.0f64;
    let mut totals = vec![(0.0f64, 0usize); nodes.len()];
    while standing[0] {
        subtree_totals(nodes, &standing, 0, &mut totals);

        // g(t) = (R(t) - R(T_t)) / (|leaves(T_t)| - 1) for each standing node.
        let link = |id: usize| -> f64 {
            let (leaf_risk, leaves) = totals[id];
            ((nodes[id].risk - leaf_risk) / (leaves - 1) as f64).max(0.0)
        };
        let reachable = reachable_standing(nodes, &standing);
        let weakest = reachable
            .iter()
            .map(|&id| link(id))
            .fold(f64::INFINITY, f64::min);
        let alpha = weakest.max(floor);
        floor = alpha;

        let collapsing: Vec<usize> = reachable
            .into_iter()
            .filter(|&id| link(id) <= weakest + TIE_TOLERANCE * scale)
            .collect();
        for id in collapsing {
            collapse(nodes, &mut standing, id, alpha / scale);
        }
    }
}

/// Sums leaf risk and counts leaves of the subtree at `id`, treating nodes
/// that are no longer standing as leaves.
fn subtree_totals(
    nodes: &[TreeNode],
    standing: &[bool],
    id: usize,
    totals: &mut [(f64, usize)],
) -> (f64, usize) {
    let result = match nodes[id].split {
        Some(split) if standing[id] => {
            let (lr, ll) = subtree_totals(nodes, standing, split.left, totals);
            let (rr, rl) = subtree_totals(nodes, standing, split.right, totals);
            (lr + rr, ll + rl)
        }
        _ => (nodes[id].risk, 1),
    };
    totals[id] = result;
    result
}

fn reachable_standing(nodes: &[TreeNode], standing: &[bool]) -> Vec<usize> {
    let mut found = Vec::new();
    let mut stack = vec![0usize];
    while let Some(id) = stack.pop() {
        if let (Some(split), true) = (nodes[id].split, standing[id]) {
            found.push(id);
            stack.push(split.right);
            stack.push(split.left);
        }
    }
    found
}

fn collapse(nodes: &mut [TreeNode], standing: &mut [bool], id: usize, complexity: f64) {
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        if !standing[current] {
            continue;
        }
        standing[current] = false;
        nodes[current].complexity = complexity;
        if let Some(split) = nodes[current].split {
            stack.push(split.left);
            stack.push(split.right);
        }
    }
}

impl DecisionTree {
    /// The subtree that survives at complexity `cp`: every internal node with
    /// complexity at or below `cp` becomes a leaf and its descendants are
    /// dropped. Node indices are renumbered depth-first.
    pub fn prune(&self, cp: f64) -> DecisionTree {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        self.copy_pruned(0, cp, &mut nodes);
        DecisionTree {
            method: self.method,
            feature_names: self.feature_names.clone(),
            class_count: self.class_count,
            root_risk: self.root_risk,
            cp: self.cp.max(cp),
            nodes,
        }
    }

    fn copy_pruned(&self, id: usize, cp: f64, out: &mut Vec<TreeNode>) -> usize {
        let mut node = self.nodes[id].clone();
        let new_id = out.len();
        let kept = node.split.filter(|_| node.complexity > cp);
        node.split = None;
        if kept.is_none() {
            node.complexity = 0.0;
        }
        out.push(node);
        if let Some(mut split) = kept {
            split.left = self.copy_pruned(split.left, cp, out);
            split.right = self.copy_pruned(split.right, cp, out);
            out[new_id].split = Some(split);
        }
        new_id
    }

    /// Sum of leaf risks of the subtree pruned at `cp`.
    pub fn risk_at(&self, cp: f64) -> f64 {
        let mut risk = 0.0;
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            match node.split {
                Some(split) if node.complexity > cp => {
                    stack.push(split.left);
                    stack.push(split.right);
                }
                _ => risk += node.risk,
            }
        }
        risk
    }

    fn splits_at(&self, cp: f64) -> usize {
        let mut count = 0;
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if let Some(split) = node.split {
                if node.complexity > cp {
                    count += 1;
                    stack.push(split.left);
                    stack.push(split.right);
                }
            }
        }
        count
    }

    /// The nested subtree sequence as a cp table, smallest tree first.
    ///
    /// Row `i` holds the cp above which the tree of row `i` is obtained; the
    /// last row sits at the cp this tree was pruned at. Cross-validation
    /// columns are empty until [`cross_validate`](super::cross_validate)
    /// fills them.
    pub fn cp_table(&self) -> Vec<CpRow> {
        let mut cps: Vec<f64> = self
            .nodes
            .iter()
            .filter(|n| n.split.is_some() && n.complexity > self.cp)
            .map(|n| n.complexity)
            .collect();
        cps.sort_by(|a, b| b.total_cmp(a));
        cps.dedup_by(|a, b| (*a - *b).abs() <= TIE_TOLERANCE);
        cps.push(self.cp);

        let scale = if self.root_risk > 0.0 { self.root_risk } else { 1.0 };
        cps.into_iter()
            .map(|cp| CpRow {
                cp,
                nsplit: self.splits_at(cp),
                rel_error: self.risk_at(cp) / scale,
                xerror: None,
                xstd: None,
            })
            .collect()
    }
}
