//! Plain-text rendering of every analysis artefact. Each function returns a
//! `String` ready to print; nothing here writes to stdout directly.

use crate::data::{Attribute, LoadSummary};
use crate::explore::{CrossTab, Exploration, FrequencyTable, Histogram, MissingPattern, NumericSummary};
use crate::impute::Imputation;
use crate::metrics::Evaluation;
use crate::pipeline::{AnalysisReport, FitOutcome};
use crate::tree::{CpRow, DecisionTree, Method};
use crate::tune::TuneResult;
use std::fmt::{self, Write};

const BAR_WIDTH: usize = 40;

/// Renders a code without a trailing `.0` when it is integral.
fn code(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn heading(out: &mut String, title: &str) -> fmt::Result {
    writeln!(out, "\n{title}\n{}", "=".repeat(title.chars().count()))
}

pub fn render_load_summary(summary: &LoadSummary) -> Result<String, fmt::Error> {
    let mut out = String::new();
    heading(&mut out, "Input")?;
    writeln!(
        out,
        "rows read: {}  kept: {}  dropped without severity: {}",
        summary.rows_read, summary.rows_kept, summary.dropped_unlabelled
    )?;
    for (attribute, count) in &summary.out_of_domain {
        writeln!(out, "  {attribute}: {count} out-of-range value(s) recoded as missing")?;
    }
    let missing: Vec<String> = summary
        .missing
        .iter()
        .map(|(a, c)| format!("{a}={c}"))
        .collect();
    writeln!(out, "missing cells: {}", missing.join(" "))?;
    Ok(out)
}

pub fn render_summaries(summaries: &[NumericSummary]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "{:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
        "", "Min.", "1st Qu.", "Median", "Mean", "3rd Qu.", "Max.", "NA's"
    )?;
    for s in summaries {
        writeln!(
            out,
            "{:<10} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>6}",
            s.attribute.name(),
            s.min,
            s.first_quartile,
            s.median,
            s.mean,
            s.third_quartile,
            s.max,
            s.missing
        )?;
    }
    Ok(out)
}

pub fn render_frequency_table(table: &FrequencyTable) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "{}:", table.attribute)?;
    for row in &table.rows {
        let label = row.label.map(|l| format!(" ({l})")).unwrap_or_default();
        writeln!(
            out,
            "  {:>4}{:<18} {:>5}  {:>5.1}%",
            code(row.code),
            label,
            row.count,
            100.0 * row.share
        )?;
    }
    if table.missing > 0 {
        writeln!(out, "  {:>4}{:<18} {:>5}", "NA", "", table.missing)?;
    }
    Ok(out)
}

pub fn render_crosstab(tab: &CrossTab) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "{:<22} {:>7} {:>9} {:>10}",
        tab.attribute.name(),
        "benign",
        "malignant",
        "%malignant"
    )?;
    let missing = (tab.missing.benign + tab.missing.malignant > 0).then_some(&tab.missing);
    for row in tab.rows.iter().chain(missing) {
        let name = if row.code.is_nan() {
            "NA".to_string()
        } else {
            match row.label {
                Some(label) => format!("{} ({label})", code(row.code)),
                None => code(row.code),
            }
        };
        writeln!(
            out,
            "{:<22} {:>7} {:>9} {:>9.1}%",
            name,
            row.benign,
            row.malignant,
            100.0 * row.malignant_share()
        )?;
    }
    Ok(out)
}

/// Missingness patterns in the layout of `md.pattern`: one line per pattern,
/// `1` observed and `0` missing, with the row count on the left.
pub fn render_missing_patterns(patterns: &[MissingPattern]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let names: Vec<String> = Attribute::ALL.iter().map(|a| format!("{:>9}", a.name())).collect();
    writeln!(out, "{:>6} {}", "rows", names.join(""))?;
    for pattern in patterns {
        let cells: Vec<String> = Attribute::ALL
            .iter()
            .map(|a| format!("{:>9}", if pattern.missing.contains(a) { 0 } else { 1 }))
            .collect();
        writeln!(
            out,
            "{:>6} {} {:>4}",
            pattern.rows,
            cells.join(""),
            pattern.missing.len()
        )?;
    }
    Ok(out)
}

pub fn render_histogram(histogram: &Histogram) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let peak = histogram.bins.iter().map(|b| b.count).max().unwrap_or(0).max(1);
    writeln!(out, "{} (# malignant, . benign)", histogram.attribute)?;
    for bin in &histogram.bins {
        let total = bin.count * BAR_WIDTH / peak;
        let malignant = bin.malignant * BAR_WIDTH / peak;
        writeln!(
            out,
            "  [{:>6.1}, {:>6.1}) {:>5} {}{}",
            bin.lower,
            bin.upper,
            bin.count,
            "#".repeat(malignant),
            ".".repeat(total.saturating_sub(malignant))
        )?;
    }
    Ok(out)
}

pub fn render_exploration(title: &str, exploration: &Exploration) -> Result<String, fmt::Error> {
    let mut out = String::new();
    heading(&mut out, title)?;
    writeln!(out, "{} rows\n", exploration.rows)?;
    out.push_str(&render_summaries(&exploration.summaries)?);
    out.push('\n');
    for table in &exploration.frequencies {
        out.push_str(&render_frequency_table(table)?);
    }
    out.push('\n');
    for tab in &exploration.crosstabs {
        out.push_str(&render_crosstab(tab)?);
        out.push('\n');
    }
    out.push_str("Missing-data patterns\n");
    out.push_str(&render_missing_patterns(&exploration.missing_patterns)?);
    if let Some(histogram) = &exploration.age_histogram {
        out.push('\n');
        out.push_str(&render_histogram(histogram)?);
    }
    Ok(out)
}

/// Per chain, the mean imputed value of each attribute after every iteration.
pub fn render_imputation(imputation: &Imputation) -> Result<String, fmt::Error> {
    let mut out = String::new();
    heading(&mut out, "Imputation")?;
    writeln!(
        out,
        "method: {}  chains: {}  cells filled per chain: {}",
        imputation.method,
        imputation.completed.len(),
        imputation.imputed_cells.len()
    )?;
    for trace in &imputation.traces {
        writeln!(out, "chain {}", trace.chain)?;
        for (i, sweep) in trace.iterations.iter().enumerate() {
            let means: Vec<String> = sweep
                .iter()
                .map(|(a, mean)| format!("{a}={mean:.3}"))
                .collect();
            writeln!(out, "  iter {:>2}: {}", i + 1, means.join("  "))?;
        }
    }
    Ok(out)
}

/// The tree in the classic CART print layout: nodes numbered so that node `k` has
/// children `2k` and `2k + 1`, leaves marked with `*`.
pub fn render_tree(tree: &DecisionTree, class_labels: &[String]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "n= {}\n", tree.root().n_obs)?;
    match tree.method {
        Method::Class => {
            writeln!(out, "node), split, n, loss, yval, (yprob)")?;
        }
        Method::Anova => {
            writeln!(out, "node), split, n, deviance, yval")?;
        }
    }
    writeln!(out, "      * denotes terminal node\n")?;

    // (arena index, printed node number, split description)
    let mut stack = vec![(0usize, 1u64, "root".to_string())];
    while let Some((id, number, description)) = stack.pop() {
        let node = &tree.nodes[id];
        let yval = match tree.method {
            Method::Class => class_labels
                .get(node.value as usize)
                .cloned()
                .unwrap_or_else(|| code(node.value)),
            Method::Anova => format!("{:.4}", node.value),
        };
        let probs = if tree.method == Method::Class {
            let total = node.n_obs.max(1) as f64;
            let shares: Vec<String> = node
                .class_counts
                .iter()
                .map(|&c| format!("{:.7}", c as f64 / total))
                .collect();
            format!(" ({})", shares.join(" "))
        } else {
            String::new()
        };
        let leaf = if node.split.is_none() { " *" } else { "" };
        writeln!(
            out,
            "{}{number}) {description} {} {} {yval}{probs}{leaf}",
            "  ".repeat(node.depth),
            node.n_obs,
            code(node.risk),
        )?;
        if let Some(split) = node.split {
            let name = &tree.feature_names[split.feature];
            let threshold = code(split.threshold);
            stack.push((split.right, 2 * number + 1, format!("{name}>={threshold}")));
            stack.push((split.left, 2 * number, format!("{name}< {threshold}")));
        }
    }
    Ok(out)
}

/// The cp table in the layout of `printcp`.
pub fn render_cp_table(table: &[CpRow]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "{:>4} {:>10} {:>6} {:>9} {:>8} {:>8}",
        "", "CP", "nsplit", "rel error", "xerror", "xstd"
    )?;
    for (i, row) in table.iter().enumerate() {
        let xerror = row.xerror.map_or("-".to_string(), |v| format!("{v:.5}"));
        let xstd = row.xstd.map_or("-".to_string(), |v| format!("{v:.5}"));
        writeln!(
            out,
            "{:>4} {:>10.6} {:>6} {:>9.5} {:>8} {:>8}",
            i + 1,
            row.cp,
            row.nsplit,
            row.rel_error,
            xerror,
            xstd
        )?;
    }
    Ok(out)
}

pub fn render_importance(tree: &DecisionTree) -> Result<String, fmt::Error> {
    let importance = tree.variable_importance();
    if importance.is_empty() {
        return Ok("Variable importance: no splits\n".to_string());
    }
    let mut out = String::from("Variable importance\n");
    for (name, score) in importance {
        writeln!(out, "  {name:<10} {:>3}", score.round() as i64)?;
    }
    Ok(out)
}

fn optional(v: Option<f64>) -> String {
    v.map_or("NA".to_string(), |v| format!("{v:.4}"))
}

/// Confusion matrix (rows are predictions, columns the truth)
/// followed by the derived statistics.
pub fn render_evaluation(evaluation: &Evaluation) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let labels = &evaluation.confusion.class_labels;
    let width = labels.iter().map(|l| l.len()).max().unwrap_or(0).max(10);
    write!(out, "{:>width$}", "Prediction")?;
    for label in labels {
        write!(out, " {label:>width$}")?;
    }
    out.push('\n');
    for (p, label) in labels.iter().enumerate() {
        write!(out, "{label:>width$}")?;
        for t in 0..labels.len() {
            write!(out, " {:>width$}", evaluation.confusion.counts[t][p])?;
        }
        out.push('\n');
    }
    writeln!(out, "\n  Accuracy : {:.4}", evaluation.accuracy)?;
    writeln!(out, "     Kappa : {:.4}", evaluation.kappa)?;
    writeln!(out, "Sensitivity : {}", optional(evaluation.sensitivity))?;
    writeln!(out, "Specificity : {}", optional(evaluation.specificity))?;
    writeln!(out, "  Precision : {}", optional(evaluation.precision))?;
    writeln!(out, "    Neg Pred : {}", optional(evaluation.negative_predictive_value))?;
    writeln!(out, "Balanced Acc : {}", optional(evaluation.balanced_accuracy))?;
    writeln!(out, "        AUC : {}", optional(evaluation.auc))?;
    writeln!(out, "      Brier : {}", optional(evaluation.brier))?;
    Ok(out)
}

pub fn render_tuning(result: &TuneResult) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "Resampling: cross-validated ({} fold, repeated {} times)\n",
        result.folds, result.repeats
    )?;
    writeln!(
        out,
        "{:>10} {:>9} {:>9} {:>9} {:>9}",
        "cp", "Accuracy", "Kappa", "AccSD", "KappaSD"
    )?;
    for row in &result.rows {
        let marker = if row.cp == result.best_cp { " <" } else { "" };
        writeln!(
            out,
            "{:>10.6} {:>9.4} {:>9.4} {:>9.4} {:>9.4}{marker}",
            row.cp, row.accuracy, row.kappa, row.accuracy_sd, row.kappa_sd
        )?;
    }
    writeln!(out, "\nAccuracy was used to select the optimal model; cp = {:.6}.", result.best_cp)?;
    Ok(out)
}

fn render_fit(
    out: &mut String,
    title: &str,
    fit: &FitOutcome,
    class_labels: &[String],
) -> fmt::Result {
    heading(out, title)?;
    out.push_str(&render_tree(&fit.tree, class_labels)?);
    out.push('\n');
    out.push_str(&render_importance(&fit.tree)?);
    out.push('\n');
    out.push_str(&render_evaluation(&fit.evaluation)?);
    Ok(())
}

/// The whole analysis, in the order it was carried out.
pub fn render_report(report: &AnalysisReport) -> Result<String, fmt::Error> {
    let labels = &report.model.class_labels;
    let mut out = render_load_summary(&report.load)?;
    out.push_str(&render_exploration("Raw data", &report.raw_exploration)?);
    out.push_str(&render_imputation(&report.imputation)?);
    out.push_str(&render_exploration("Completed data", &report.completed_exploration)?);

    heading(&mut out, "Train/test split")?;
    writeln!(
        out,
        "training rows: {}  test rows: {}",
        report.split.train.len(),
        report.split.test.len()
    )?;

    render_fit(&mut out, "Initial tree", &report.initial, labels)?;
    heading(&mut out, "Cross-validated cp table")?;
    out.push_str(&render_cp_table(&report.cp_table)?);
    writeln!(
        out,
        "\nselected cp {:.6} ({} splits, {})",
        report.selected.cp, report.selected.nsplit, report.model.rule
    )?;
    render_fit(&mut out, "Pruned tree", &report.pruned, labels)?;
    heading(&mut out, "cp grid search")?;
    out.push_str(&render_tuning(&report.tuning)?);
    render_fit(&mut out, "Tuned tree", &report.tuned, labels)?;
    Ok(out)
}
