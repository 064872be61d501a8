//! Classification metrics: confusion matrix, accuracy, Cohen's kappa, the
//! binary rates with malignant as the positive class, AUC and Brier score.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MetricsError {
    #[error("Truth has {truth} labels but {predicted} predictions were given.")]
    LengthMismatch { truth: usize, predicted: usize },
    #[error("Label {label} is outside the {classes} known classes.")]
    UnknownLabel { label: usize, classes: usize },
    #[error("Cannot evaluate an empty set of predictions.")]
    Empty,
}

/// Counts indexed `[truth][predicted]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    pub class_labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(
        truth: &[usize],
        predicted: &[usize],
        class_labels: &[String],
    ) -> Result<Self, MetricsError> {
        if truth.len() != predicted.len() {
            return Err(MetricsError::LengthMismatch {
                truth: truth.len(),
                predicted: predicted.len(),
            });
        }
        if truth.is_empty() {
            return Err(MetricsError::Empty);
        }
        let k = class_labels.len();
        let mut counts = vec![vec![0usize; k]; k];
        for (&t, &p) in truth.iter().zip(predicted) {
            if let Some(&label) = [t, p].iter().find(|&&l| l >= k) {
                return Err(MetricsError::UnknownLabel { label, classes: k });
            }
            counts[t][p] += 1;
        }
        Ok(Self {
            class_labels: class_labels.to_vec(),
            counts,
        })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn correct(&self) -> usize {
        (0..self.counts.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        self.correct() as f64 / self.total() as f64
    }

    /// Cohen's kappa: agreement beyond what the marginals give by chance.
    /// Zero when chance agreement is already perfect.
    pub fn kappa(&self) -> f64 {
        let n = self.total() as f64;
        let observed = self.accuracy();
        let expected: f64 = (0..self.counts.len())
            .map(|i| {
                let truth_total: usize = self.counts[i].iter().sum();
                let predicted_total: usize = self.counts.iter().map(|row| row[i]).sum();
                truth_total as f64 * predicted_total as f64
            })
            .sum::<f64>()
            / (n * n);
        if (1.0 - expected).abs() < f64::EPSILON {
            0.0
        } else {
            (observed - expected) / (1.0 - expected)
        }
    }

    /// `(tp, fp, tn, fn)` with class 1 positive; `None` unless binary.
    fn binary_cells(&self) -> Option<(f64, f64, f64, f64)> {
        if self.counts.len() != 2 {
            return None;
        }
        let c = &self.counts;
        Some((c[1][1] as f64, c[0][1] as f64, c[0][0] as f64, c[1][0] as f64))
    }

    pub fn sensitivity(&self) -> Option<f64> {
        let (tp, _, _, fneg) = self.binary_cells()?;
        ratio(tp, tp + fneg)
    }

    pub fn specificity(&self) -> Option<f64> {
        let (_, fp, tn, _) = self.binary_cells()?;
        ratio(tn, tn + fp)
    }

    pub fn precision(&self) -> Option<f64> {
        let (tp, fp, _, _) = self.binary_cells()?;
        ratio(tp, tp + fp)
    }

    pub fn negative_predictive_value(&self) -> Option<f64> {
        let (_, _, tn, fneg) = self.binary_cells()?;
        ratio(tn, tn + fneg)
    }

    pub fn balanced_accuracy(&self) -> Option<f64> {
        Some(0.5 * (self.sensitivity()? + self.specificity()?))
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}

/// Area under the ROC curve via the Mann-Whitney statistic, ties sharing the
/// average rank. 0.5 when either class is absent.
pub fn auc(truth: &[usize], scores: &[f64]) -> f64 {
    let n = truth.len().min(scores.len());
    let n_pos = truth[..n].iter().filter(|&&t| t == 1).count() as f64;
    let n_neg = n as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| scores[i].total_cmp(&scores[j]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && (scores[idx[j]] - scores[idx[i]]).abs() < 1e-10 {
            j += 1;
        }
        let avg_rank = (i + j - 1) as f64 / 2.0 + 1.0;
        for &k in &idx[i..j] {
            ranks[k] = avg_rank;
        }
        i = j;
    }

    let sum_ranks_pos: f64 = (0..n).filter(|&i| truth[i] == 1).map(|i| ranks[i]).sum();
    (sum_ranks_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Mean squared difference between the malignant probability and the label.
pub fn brier(truth: &[usize], scores: &[f64]) -> f64 {
    let n = truth.len().min(scores.len());
    if n == 0 {
        return 0.0;
    }
    truth
        .iter()
        .zip(scores)
        .map(|(&t, &p)| (p - t as f64).powi(2))
        .sum::<f64>()
        / n as f64
}

/// Everything reported for one set of predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    pub kappa: f64,
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
    pub precision: Option<f64>,
    pub negative_predictive_value: Option<f64>,
    pub balanced_accuracy: Option<f64>,
    /// Present when malignant probabilities were supplied.
    pub auc: Option<f64>,
    pub brier: Option<f64>,
}

pub fn evaluate(
    truth: &[usize],
    predicted: &[usize],
    prob_malignant: Option<&[f64]>,
    class_labels: &[String],
) -> Result<Evaluation, MetricsError> {
    let confusion = ConfusionMatrix::from_predictions(truth, predicted, class_labels)?;
    if let Some(scores) = prob_malignant {
        if scores.len() != truth.len() {
            return Err(MetricsError::LengthMismatch {
                truth: truth.len(),
                predicted: scores.len(),
            });
        }
    }
    Ok(Evaluation {
        accuracy: confusion.accuracy(),
        kappa: confusion.kappa(),
        sensitivity: confusion.sensitivity(),
        specificity: confusion.specificity(),
        precision: confusion.precision(),
        negative_predictive_value: confusion.negative_predictive_value(),
        balanced_accuracy: confusion.balanced_accuracy(),
        auc: prob_malignant.map(|s| auc(truth, s)),
        brier: prob_malignant.map(|s| brier(truth, s)),
        confusion,
    })
}
