//! Synthetic mammography tables for tests and benchmarks.
//!
//! The generated severity follows a known rule (irregular shape or a
//! spiculated/ill-defined margin is malignant) with a configurable amount of
//! label noise, so a correctly working tree must recover it.

use crate::data::{ATTRIBUTE_COUNT, Attribute, MassTable};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Builder for synthetic mass tables.
#[derive(Debug, Clone)]
pub struct SyntheticMasses {
    n_rows: usize,
    missing_rate: f64,
    label_noise: f64,
    seed: u64,
}

impl SyntheticMasses {
    pub fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            missing_rate: 0.0,
            label_noise: 0.05,
            seed: 42,
        }
    }

    /// Probability that any predictor cell is blanked. Severity is never blanked.
    pub fn missing_rate(mut self, rate: f64) -> Self {
        self.missing_rate = rate;
        self
    }

    /// Probability that a label is flipped away from the rule.
    pub fn label_noise(mut self, noise: f64) -> Self {
        self.label_noise = noise;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(&self) -> MassTable {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut values = Array2::zeros((self.n_rows, ATTRIBUTE_COUNT));

        for row in 0..self.n_rows {
            let shape = rng.gen_range(1..=4) as f64;
            let margin = rng.gen_range(1..=5) as f64;
            let density = if rng.gen_bool(0.8) {
                3.0
            } else {
                rng.gen_range(1..=4) as f64
            };
            let malignant_by_rule = shape == 4.0 || margin >= 4.0;
            let malignant = malignant_by_rule ^ rng.gen_bool(self.label_noise);
            let age: i32 = if malignant {
                rng.gen_range(45..=85)
            } else {
                rng.gen_range(25..=75)
            };
            let bi_rads = match (malignant, rng.gen_bool(0.7)) {
                (true, true) => 5.0,
                (true, false) | (false, false) => 4.0,
                (false, true) => 3.0,
            };

            values[[row, Attribute::BiRads.index()]] = bi_rads;
            values[[row, Attribute::Age.index()]] = f64::from(age);
            values[[row, Attribute::Shape.index()]] = shape;
            values[[row, Attribute::Margin.index()]] = margin;
            values[[row, Attribute::Density.index()]] = density;
            values[[row, Attribute::Severity.index()]] = if malignant { 1.0 } else { 0.0 };

            for attribute in Attribute::PREDICTORS {
                if self.missing_rate > 0.0 && rng.gen_bool(self.missing_rate) {
                    values[[row, attribute.index()]] = f64::NAN;
                }
            }
        }

        // Always six columns wide, so the conversion cannot fail.
        MassTable::from_array(values).unwrap_or_else(|_| MassTable::empty())
    }
}

/// Renders a table as comma-separated text using `?` for missing cells.
pub fn render_csv(table: &MassTable, with_header: bool) -> String {
    let mut lines = Vec::with_capacity(table.n_rows() + 1);
    if with_header {
        lines.push(
            Attribute::ALL
                .iter()
                .map(|a| a.name())
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    for row in table.values().rows() {
        lines.push(
            row.iter()
                .map(|&v| {
                    if v.is_nan() {
                        "?".to_string()
                    } else {
                        format!("{}", v as i64)
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}
