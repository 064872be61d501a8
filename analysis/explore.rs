//! Descriptive views of a mass table: level frequencies, five-number
//! summaries, cross tabulations against severity, missingness patterns and
//! histograms. Everything here is computed; rendering lives in `report`.

use crate::data::{Attribute, MassTable};
use itertools::Itertools;

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyRow {
    pub code: f64,
    pub label: Option<&'static str>,
    pub count: usize,
    /// Share of the observed values.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    pub attribute: Attribute,
    pub rows: Vec<FrequencyRow>,
    pub missing: usize,
}

/// Count per observed code, in increasing code order.
pub fn frequency_table(table: &MassTable, attribute: Attribute) -> FrequencyTable {
    let observed = table.observed(attribute);
    let total = observed.len().max(1) as f64;
    let rows = observed
        .into_iter()
        .sorted_by(f64::total_cmp)
        .dedup_with_count()
        .map(|(count, code)| FrequencyRow {
            code,
            label: attribute.level_label(code),
            count,
            share: count as f64 / total,
        })
        .collect();
    FrequencyTable {
        attribute,
        rows,
        missing: table.missing_count(attribute),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericSummary {
    pub attribute: Attribute,
    pub min: f64,
    pub first_quartile: f64,
    pub median: f64,
    pub mean: f64,
    pub third_quartile: f64,
    pub max: f64,
    pub missing: usize,
}

/// Min, quartiles, mean and max of the observed values, or `None` when the
/// column has none. Quartiles interpolate linearly between order statistics.
pub fn numeric_summary(table: &MassTable, attribute: Attribute) -> Option<NumericSummary> {
    let mut values = table.observed(attribute);
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(NumericSummary {
        attribute,
        min: values[0],
        first_quartile: quantile(&values, 0.25),
        median: quantile(&values, 0.5),
        mean: values.iter().sum::<f64>() / values.len() as f64,
        third_quartile: quantile(&values, 0.75),
        max: values[values.len() - 1],
        missing: table.missing_count(attribute),
    })
}

/// Quantile of sorted, non-empty data: `h = (n - 1) p`, interpolating between
/// the order statistics either side of `h`.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossTabRow {
    pub code: f64,
    pub label: Option<&'static str>,
    pub benign: usize,
    pub malignant: usize,
}

impl CrossTabRow {
    pub fn malignant_share(&self) -> f64 {
        let total = self.benign + self.malignant;
        if total == 0 {
            0.0
        } else {
            self.malignant as f64 / total as f64
        }
    }
}

/// Severity counts per code of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossTab {
    pub attribute: Attribute,
    pub rows: Vec<CrossTabRow>,
    /// Severity counts of rows where the attribute is missing.
    pub missing: CrossTabRow,
}

/// Cross-tabulates `attribute` against severity. Rows without a label are skipped.
pub fn severity_crosstab(table: &MassTable, attribute: Attribute) -> CrossTab {
    let mut rows: Vec<CrossTabRow> = Vec::new();
    let mut missing = CrossTabRow {
        code: f64::NAN,
        label: None,
        benign: 0,
        malignant: 0,
    };
    let labelled = (0..table.n_rows())
        .filter_map(|r| table.value(r, Attribute::Severity).map(|s| (r, s >= 0.5)))
        .map(|(r, malignant)| (table.value(r, attribute), malignant))
        .sorted_by(|a, b| match (a.0, b.0) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, None) => std::cmp::Ordering::Equal,
        });
    for (code, malignant) in labelled {
        let slot = match code {
            None => &mut missing,
            Some(code) => {
                if rows.last().is_none_or(|row| row.code != code) {
                    rows.push(CrossTabRow {
                        code,
                        label: attribute.level_label(code),
                        benign: 0,
                        malignant: 0,
                    });
                }
                let last = rows.len() - 1;
                &mut rows[last]
            }
        };
        if malignant {
            slot.malignant += 1;
        } else {
            slot.benign += 1;
        }
    }
    CrossTab {
        attribute,
        rows,
        missing,
    }
}

/// One distinct combination of missing attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingPattern {
    pub missing: Vec<Attribute>,
    pub rows: usize,
}

/// Distinct missingness patterns with their row counts, most frequent first;
/// equally frequent patterns are ordered by how few attributes they miss.
pub fn missing_patterns(table: &MassTable) -> Vec<MissingPattern> {
    (0..table.n_rows())
        .map(|r| {
            Attribute::ALL
                .into_iter()
                .filter(|&a| table.is_missing(r, a))
                .collect::<Vec<_>>()
        })
        .counts()
        .into_iter()
        .map(|(missing, rows)| MissingPattern { missing, rows })
        .sorted_by(|a, b| {
            b.rows
                .cmp(&a.rows)
                .then(a.missing.len().cmp(&b.missing.len()))
                .then_with(|| a.missing.cmp(&b.missing))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    /// Of `count`, how many rows are labelled malignant.
    pub malignant: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub attribute: Attribute,
    pub bins: Vec<HistogramBin>,
}

/// Equal-width histogram over the observed range; the last bin is closed on
/// the right. `None` without observed values or with zero bins.
pub fn histogram(table: &MassTable, attribute: Attribute, bins: usize) -> Option<Histogram> {
    let observed = table.observed(attribute);
    if observed.is_empty() || bins == 0 {
        return None;
    }
    let (min, max) = match observed.iter().copied().minmax_by(f64::total_cmp) {
        itertools::MinMaxResult::OneElement(v) => (v, v),
        itertools::MinMaxResult::MinMax(lo, hi) => (lo, hi),
        itertools::MinMaxResult::NoElements => return None,
    };
    let width = (max - min) / bins as f64;
    let mut result: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
            malignant: 0,
        })
        .collect();
    for r in 0..table.n_rows() {
        let Some(v) = table.value(r, attribute) else {
            continue;
        };
        let index = if width > 0.0 {
            (((v - min) / width).floor() as usize).min(bins - 1)
        } else {
            0
        };
        result[index].count += 1;
        if table.value(r, Attribute::Severity) == Some(1.0) {
            result[index].malignant += 1;
        }
    }
    Some(Histogram {
        attribute,
        bins: result,
    })
}

/// Every exploration view of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Exploration {
    pub rows: usize,
    pub summaries: Vec<NumericSummary>,
    /// Frequency tables of the categorical attributes.
    pub frequencies: Vec<FrequencyTable>,
    /// Severity cross tabulations of the categorical predictors.
    pub crosstabs: Vec<CrossTab>,
    pub missing_patterns: Vec<MissingPattern>,
    pub age_histogram: Option<Histogram>,
}

pub fn explore(table: &MassTable) -> Exploration {
    let categorical: Vec<Attribute> = Attribute::ALL
        .into_iter()
        .filter(|a| a.is_categorical())
        .collect();
    Exploration {
        rows: table.n_rows(),
        summaries: Attribute::ALL
            .into_iter()
            .filter_map(|a| numeric_summary(table, a))
            .collect(),
        frequencies: categorical
            .iter()
            .map(|&a| frequency_table(table, a))
            .collect(),
        crosstabs: categorical
            .iter()
            .filter(|&&a| a != Attribute::Severity)
            .map(|&a| severity_crosstab(table, a))
            .collect(),
        missing_patterns: missing_patterns(table),
        age_histogram: histogram(table, Attribute::Age, 10),
    }
}
