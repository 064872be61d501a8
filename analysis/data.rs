//! # Mass Table Loading and Validation
//!
//! This module is the exclusive entry point for user-provided mammography records.
//! It reads delimited text files, validates them against the fixed six-attribute
//! schema, and produces a `MassTable`: an `ndarray` matrix in which every missing
//! or unusable cell is `NaN`.
//!
//! - Fixed Schema: the attributes are `bi_rads`, `age`, `shape`, `margin`,
//!   `density` and `severity`. Files with a header are matched by name; files
//!   without one are read positionally in that order.
//! - Cleaning, Not Rejection: codes outside an attribute's domain (the infamous
//!   BI-RADS value 55, a shape of 7) are recoded as missing and counted, so the
//!   imputation stage can fill them. Structural problems (text in a numeric
//!   column, too few rows) are errors.
//! - Performance: parsing goes through the `polars` CSV reader, which handles
//!   the missing-value sentinel natively.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Number of attributes in a mass record.
pub const ATTRIBUTE_COUNT: usize = 6;

/// One column of the mammographic mass schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// BI-RADS assessment category, ordinal 0 to 6.
    BiRads,
    /// Patient age in years.
    Age,
    /// Mass shape: round, oval, lobular, irregular.
    Shape,
    /// Mass margin: circumscribed, microlobulated, obscured, ill-defined, spiculated.
    Margin,
    /// Mass density: high, iso, low, fat-containing.
    Density,
    /// Outcome label: benign (0) or malignant (1).
    Severity,
}

/// How the codes of an attribute are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    Ordinal,
    Nominal,
    Continuous,
    Binary,
}

/// The admissible values of an attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Domain {
    pub kind: AttributeKind,
    pub min: f64,
    pub max: f64,
}

impl Domain {
    /// Whether `value` is a legal code. Categorical codes must be integral.
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() || value < self.min || value > self.max {
            return false;
        }
        self.kind == AttributeKind::Continuous || value.fract() == 0.0
    }
}

const SHAPE_LEVELS: [&str; 4] = ["round", "oval", "lobular", "irregular"];
const MARGIN_LEVELS: [&str; 5] = [
    "circumscribed",
    "microlobulated",
    "obscured",
    "ill-defined",
    "spiculated",
];
const DENSITY_LEVELS: [&str; 4] = ["high", "iso", "low", "fat-containing"];
const SEVERITY_LEVELS: [&str; 2] = ["benign", "malignant"];

impl Attribute {
    /// All attributes in canonical column order.
    pub const ALL: [Attribute; ATTRIBUTE_COUNT] = [
        Attribute::BiRads,
        Attribute::Age,
        Attribute::Shape,
        Attribute::Margin,
        Attribute::Density,
        Attribute::Severity,
    ];

    /// Every attribute that may act as a predictor of severity.
    pub const PREDICTORS: [Attribute; ATTRIBUTE_COUNT - 1] = [
        Attribute::BiRads,
        Attribute::Age,
        Attribute::Shape,
        Attribute::Margin,
        Attribute::Density,
    ];

    /// Column position in a `MassTable` and in headerless files.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Canonical column name.
    pub fn name(self) -> &'static str {
        match self {
            Attribute::BiRads => "bi_rads",
            Attribute::Age => "age",
            Attribute::Shape => "shape",
            Attribute::Margin => "margin",
            Attribute::Density => "density",
            Attribute::Severity => "severity",
        }
    }

    pub fn domain(self) -> Domain {
        let (kind, min, max) = match self {
            Attribute::BiRads => (AttributeKind::Ordinal, 0.0, 6.0),
            Attribute::Age => (AttributeKind::Continuous, 0.0, 120.0),
            Attribute::Shape => (AttributeKind::Nominal, 1.0, 4.0),
            Attribute::Margin => (AttributeKind::Nominal, 1.0, 5.0),
            Attribute::Density => (AttributeKind::Ordinal, 1.0, 4.0),
            Attribute::Severity => (AttributeKind::Binary, 0.0, 1.0),
        };
        Domain { kind, min, max }
    }

    /// True for every attribute whose values are codes rather than measurements.
    pub fn is_categorical(self) -> bool {
        self.domain().kind != AttributeKind::Continuous
    }

    /// Human-readable label of a code, where the schema defines one.
    pub fn level_label(self, code: f64) -> Option<&'static str> {
        let levels: &[&'static str] = match self {
            Attribute::Shape => &SHAPE_LEVELS,
            Attribute::Margin => &MARGIN_LEVELS,
            Attribute::Density => &DENSITY_LEVELS,
            Attribute::Severity => &SEVERITY_LEVELS,
            Attribute::BiRads | Attribute::Age => return None,
        };
        if !self.domain().contains(code) {
            return None;
        }
        let offset = (code - self.domain().min) as usize;
        levels.get(offset).copied()
    }

    /// Resolves a header cell to an attribute. Matching ignores case and
    /// punctuation, so `BI-RADS`, `bi_rads` and `BiRads` are equivalent.
    pub fn from_column_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "birads" | "biradsassessment" => Some(Attribute::BiRads),
            "age" => Some(Attribute::Age),
            "shape" => Some(Attribute::Shape),
            "margin" => Some(Attribute::Margin),
            "density" => Some(Attribute::Density),
            "severity" => Some(Attribute::Severity),
            _ => None,
        }
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Class names of the severity outcome, indexed by code.
pub fn severity_class_labels() -> Vec<String> {
    SEVERITY_LEVELS.iter().map(|s| s.to_string()).collect()
}

/// Options controlling how an input file is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataOptions {
    /// Field separator. Must be a single ASCII character.
    pub separator: char,
    /// Token marking a missing value.
    pub missing_token: String,
    /// Whether the first line is a header. `None` sniffs the first line.
    pub has_header: Option<bool>,
    /// Minimum number of labelled rows required for training.
    pub min_rows: usize,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            separator: ',',
            missing_token: "?".to_string(),
            has_header: None,
            min_rows: 20,
        }
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV writing error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The input file '{0}' is empty.")]
    EmptyFile(String),
    #[error("The separator {0:?} is not a single ASCII character.")]
    InvalidSeparator(char),
    #[error(
        "The required column '{0}' was not found in the input header. Expected columns: bi_rads, age, shape, margin, density, severity."
    )]
    ColumnNotFound(String),
    #[error(
        "The input file has {found} columns, but a headerless file needs at least {required} (bi_rads, age, shape, margin, density[, severity])."
    )]
    TooFewColumns { found: usize, required: usize },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. Use the missing-value token instead."
    )]
    NonFiniteValuesFound(String),
    #[error("Missing values were found in the column '{0}', which must be complete here.")]
    MissingValuesFound(String),
    #[error(
        "Input file contains only {found} labelled rows, but at least {required} are required for a stable model."
    )]
    InsufficientRows { found: usize, required: usize },
    #[error("A mass table needs exactly {expected} columns, got {found}.")]
    WrongWidth { expected: usize, found: usize },
}

/// What happened while loading a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    /// Data rows present in the file.
    pub rows_read: usize,
    /// Rows retained in the table.
    pub rows_kept: usize,
    /// Rows discarded because their severity label was missing.
    pub dropped_unlabelled: usize,
    /// Per attribute, how many present values were outside the domain and recoded as missing.
    pub out_of_domain: Vec<(Attribute, usize)>,
    /// Per attribute, missing cells in the final table.
    pub missing: Vec<(Attribute, usize)>,
}

/// The in-memory dataset. Shape `[n_rows, 6]`, columns in `Attribute::ALL`
/// order, missing cells are `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct MassTable {
    values: Array2<f64>,
}

impl MassTable {
    /// Wraps a raw matrix. Values are not domain-checked.
    pub fn from_array(values: Array2<f64>) -> Result<Self, DataError> {
        if values.ncols() != ATTRIBUTE_COUNT {
            return Err(DataError::WrongWidth {
                expected: ATTRIBUTE_COUNT,
                found: values.ncols(),
            });
        }
        Ok(Self { values })
    }

    /// A table with no rows.
    pub fn empty() -> Self {
        Self {
            values: Array2::zeros((0, ATTRIBUTE_COUNT)),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// The value of a cell, or `None` when it is missing.
    pub fn value(&self, row: usize, attribute: Attribute) -> Option<f64> {
        let v = self.values[[row, attribute.index()]];
        if v.is_nan() { None } else { Some(v) }
    }

    pub fn set(&mut self, row: usize, attribute: Attribute, value: f64) {
        self.values[[row, attribute.index()]] = value;
    }

    pub fn set_missing(&mut self, row: usize, attribute: Attribute) {
        self.values[[row, attribute.index()]] = f64::NAN;
    }

    pub fn is_missing(&self, row: usize, attribute: Attribute) -> bool {
        self.values[[row, attribute.index()]].is_nan()
    }

    pub fn column(&self, attribute: Attribute) -> ArrayView1<'_, f64> {
        self.values.column(attribute.index())
    }

    pub fn missing_count(&self, attribute: Attribute) -> usize {
        self.column(attribute).iter().filter(|v| v.is_nan()).count()
    }

    /// Observed (non-missing) values of a column, in row order.
    pub fn observed(&self, attribute: Attribute) -> Vec<f64> {
        self.column(attribute)
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect()
    }

    /// A new table holding the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> MassTable {
        MassTable {
            values: self.values.select(Axis(0), rows),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.values.iter().any(|v| v.is_nan())
    }

    /// Attributes with at least one missing cell, in column order.
    pub fn incomplete_attributes(&self) -> Vec<Attribute> {
        Attribute::ALL
            .into_iter()
            .filter(|&a| self.missing_count(a) > 0)
            .collect()
    }

    /// Severity codes as class indices (0 benign, 1 malignant).
    pub fn severity_labels(&self) -> Result<Vec<usize>, DataError> {
        self.column(Attribute::Severity)
            .iter()
            .map(|&v| {
                if v.is_nan() {
                    Err(DataError::MissingValuesFound(
                        Attribute::Severity.name().to_string(),
                    ))
                } else {
                    Ok(v as usize)
                }
            })
            .collect()
    }

    /// The predictor columns, in the order given. Shape `[n_rows, predictors.len()]`.
    pub fn feature_matrix(&self, predictors: &[Attribute]) -> Array2<f64> {
        let indices: Vec<usize> = predictors.iter().map(|a| a.index()).collect();
        self.values.select(Axis(1), &indices)
    }

    /// Writes the table with a header row. Missing cells are written as `missing_token`.
    pub fn write_csv(&self, path: &Path, missing_token: &str) -> Result<(), DataError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(Attribute::ALL.iter().map(|a| a.name()))?;
        for row in self.values.rows() {
            let record: Vec<String> = row
                .iter()
                .map(|&v| format_code(v, missing_token))
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn format_code(value: f64, missing_token: &str) -> String {
    if value.is_nan() {
        missing_token.to_string()
    } else if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Loads labelled records for training. Rows without a severity label are
/// dropped; the file must keep at least `options.min_rows` rows.
pub fn load_mass_table(
    path: &str,
    options: &DataOptions,
) -> Result<(MassTable, LoadSummary), DataError> {
    internal::load(path, options, true)
}

/// Loads records for prediction. The severity column is optional and rows are
/// never dropped; an absent label is stored as missing.
pub fn load_prediction_table(
    path: &str,
    options: &DataOptions,
) -> Result<(MassTable, LoadSummary), DataError> {
    internal::load(path, options, false)
}

/// Internal module for the shared loading logic.
mod internal {
    use super::*;

    pub(super) fn load(
        path: &str,
        options: &DataOptions,
        require_label: bool,
    ) -> Result<(MassTable, LoadSummary), DataError> {
        if !options.separator.is_ascii() {
            return Err(DataError::InvalidSeparator(options.separator));
        }
        let has_header = match options.has_header {
            Some(flag) => flag,
            None => sniff_header(path, options)?,
        };

        log::info!("Loading mass records from '{path}' (header: {has_header})");

        let null_token: PlSmallStr = options.missing_token.as_str().into();
        let df = CsvReader::new(File::open(Path::new(path))?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(has_header)
                    .with_infer_schema_length(None)
                    .with_parse_options(
                        CsvParseOptions::default()
                            .with_separator(options.separator as u8)
                            .with_null_values(Some(NullValues::AllColumnsSingle(null_token))),
                    ),
            )
            .finish()?;

        let columns = resolve_columns(&df, has_header, require_label)?;
        let n = df.height();

        // Column-major raw values; absent columns stay entirely missing.
        let mut raw: Vec<Vec<Option<f64>>> = Vec::with_capacity(ATTRIBUTE_COUNT);
        for (attribute, column) in Attribute::ALL.iter().zip(&columns) {
            match column {
                Some(name) => raw.push(extract_column(&df, name, *attribute)?),
                None => raw.push(vec![None; n]),
            }
        }

        let mut summary = LoadSummary {
            rows_read: n,
            ..Default::default()
        };

        for attribute in Attribute::ALL {
            let domain = attribute.domain();
            let mut recoded = 0usize;
            for cell in raw[attribute.index()].iter_mut() {
                if let Some(v) = *cell {
                    if !domain.contains(v) {
                        *cell = None;
                        recoded += 1;
                    }
                }
            }
            if recoded > 0 {
                log::warn!(
                    "{recoded} value(s) of '{attribute}' fall outside [{}, {}] and were recoded as missing",
                    domain.min,
                    domain.max
                );
                summary.out_of_domain.push((attribute, recoded));
            }
        }

        let severity = &raw[Attribute::Severity.index()];
        let keep: Vec<usize> = if require_label {
            (0..n).filter(|&i| severity[i].is_some()).collect()
        } else {
            (0..n).collect()
        };
        summary.dropped_unlabelled = n - keep.len();
        if summary.dropped_unlabelled > 0 {
            log::warn!(
                "Dropped {} row(s) without a severity label",
                summary.dropped_unlabelled
            );
        }

        if require_label && keep.len() < options.min_rows {
            return Err(DataError::InsufficientRows {
                found: keep.len(),
                required: options.min_rows,
            });
        }

        let mut values = Array2::from_elem((keep.len(), ATTRIBUTE_COUNT), f64::NAN);
        for (r, &i) in keep.iter().enumerate() {
            for attribute in Attribute::ALL {
                if let Some(v) = raw[attribute.index()][i] {
                    values[[r, attribute.index()]] = v;
                }
            }
        }

        let table = MassTable { values };
        summary.rows_kept = table.n_rows();
        summary.missing = Attribute::ALL
            .into_iter()
            .map(|a| (a, table.missing_count(a)))
            .collect();

        log::info!(
            "Loaded {} of {} rows; {} missing cells",
            summary.rows_kept,
            summary.rows_read,
            summary.missing.iter().map(|(_, c)| c).sum::<usize>()
        );

        Ok((table, summary))
    }

    /// The first line is a header when none of its fields is numeric or the missing token.
    fn sniff_header(path: &str, options: &DataOptions) -> Result<bool, DataError> {
        let mut first_line = String::new();
        BufReader::new(File::open(Path::new(path))?).read_line(&mut first_line)?;
        let line = first_line.trim_end();
        if line.trim().is_empty() {
            return Err(DataError::EmptyFile(path.to_string()));
        }
        let looks_like_data = line
            .split(options.separator)
            .map(str::trim)
            .any(|field| field == options.missing_token || field.parse::<f64>().is_ok());
        Ok(!looks_like_data)
    }

    /// Maps each attribute to a DataFrame column name, or `None` when an
    /// optional label column is absent.
    fn resolve_columns(
        df: &DataFrame,
        has_header: bool,
        require_label: bool,
    ) -> Result<Vec<Option<String>>, DataError> {
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        if has_header {
            Attribute::ALL
                .into_iter()
                .map(|attribute| {
                    let found = names
                        .iter()
                        .find(|name| Attribute::from_column_name(name) == Some(attribute))
                        .cloned();
                    match found {
                        Some(name) => Ok(Some(name)),
                        None if attribute == Attribute::Severity && !require_label => Ok(None),
                        None => Err(DataError::ColumnNotFound(attribute.name().to_string())),
                    }
                })
                .collect()
        } else {
            let required = if require_label {
                ATTRIBUTE_COUNT
            } else {
                ATTRIBUTE_COUNT - 1
            };
            if names.len() < required {
                return Err(DataError::TooFewColumns {
                    found: names.len(),
                    required,
                });
            }
            Ok((0..ATTRIBUTE_COUNT).map(|i| names.get(i).cloned()).collect())
        }
    }

    fn extract_column(
        df: &DataFrame,
        column_name: &str,
        attribute: Attribute,
    ) -> Result<Vec<Option<f64>>, DataError> {
        let series = df.column(column_name)?;
        let wrong_type = || DataError::ColumnWrongType {
            column_name: attribute.name().to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        };

        let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        // Any value that existed before the cast but vanished in it was not a number.
        if casted.null_count() > series.null_count() {
            return Err(wrong_type());
        }

        let values: Vec<Option<f64>> = casted.f64()?.into_iter().collect();
        if values.iter().flatten().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(attribute.name().to_string()));
        }
        Ok(values)
    }
}
