//! Column preprocessing
//!
//! Numeric columns are median-imputed then standardised; categorical columns
//! are imputed with their most frequent value and one-hot encoded. Categories
//! unseen during fitting encode as all zeros.

use crate::error::{MlError, Result};
use crate::features::{ColumnData, FeatureFrame};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fill value for a categorical column that had no observations
const MISSING_CATEGORY: &str = "missing";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericScaler {
    pub column: String,
    pub median: f64,
    pub mean: f64,
    pub scale: f64,
}

impl NumericScaler {
    fn fit(column: &str, values: &[Option<f64>]) -> Self {
        let median = median(values).unwrap_or(0.0);
        let filled: Array1<f64> = values.iter().map(|v| v.unwrap_or(median)).collect();
        let mean = filled.mean().unwrap_or(0.0);
        let std = filled.std(0.0);
        Self {
            column: column.to_string(),
            median,
            mean,
            scale: if std > 0.0 && std.is_finite() { std } else { 1.0 },
        }
    }

    fn transform(&self, value: Option<f64>) -> f64 {
        (value.unwrap_or(self.median) - self.mean) / self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    pub column: String,
    pub fill: String,
    /// Sorted known categories; one output slot each
    pub categories: Vec<String>,
}

impl CategoryEncoder {
    fn fit(column: &str, values: &[Option<String>]) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for value in values.iter().flatten() {
            *counts.entry(value.as_str()).or_default() += 1;
        }
        // most frequent, ties broken by the smallest value
        let fill = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(v, _)| v.to_string())
            .unwrap_or_else(|| MISSING_CATEGORY.to_string());

        let mut categories: Vec<String> = counts.keys().map(|k| k.to_string()).collect();
        if !categories.contains(&fill) {
            categories.push(fill.clone());
            categories.sort();
        }
        Self {
            column: column.to_string(),
            fill,
            categories,
        }
    }

    /// Slot of `value` among the known categories; `None` for unseen ones
    fn slot(&self, value: Option<&str>) -> Option<usize> {
        let value = value.unwrap_or(&self.fill);
        self.categories.binary_search_by(|c| c.as_str().cmp(value)).ok()
    }
}

/// Fitted column transformer producing a dense design matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub numeric: Vec<NumericScaler>,
    pub categorical: Vec<CategoryEncoder>,
}

impl Preprocessor {
    pub fn fit(frame: &FeatureFrame, numeric: &[String], categorical: &[String]) -> Result<Self> {
        let numeric = numeric
            .iter()
            .map(|name| Ok(NumericScaler::fit(name, &numeric_values(frame, name)?)))
            .collect::<Result<Vec<_>>>()?;
        let categorical = categorical
            .iter()
            .map(|name| Ok(CategoryEncoder::fit(name, &text_values(frame, name)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { numeric, categorical })
    }

    /// Width of the encoded matrix
    pub fn output_width(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(|c| c.categories.len()).sum::<usize>()
    }

    /// Names of the encoded columns (`column=category` for one-hot slots)
    pub fn output_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|n| n.column.clone()).collect();
        for encoder in &self.categorical {
            names.extend(encoder.categories.iter().map(|c| format!("{}={}", encoder.column, c)));
        }
        names
    }

    pub fn transform(&self, frame: &FeatureFrame) -> Result<Array2<f64>> {
        let mut matrix = Array2::<f64>::zeros((frame.len(), self.output_width()));

        for (j, scaler) in self.numeric.iter().enumerate() {
            let values = numeric_values(frame, &scaler.column)?;
            let scaled: Array1<f64> = values.iter().map(|v| scaler.transform(*v)).collect();
            matrix.column_mut(j).assign(&scaled);
        }

        let mut offset = self.numeric.len();
        for encoder in &self.categorical {
            let values = text_values(frame, &encoder.column)?;
            for (r, value) in values.iter().enumerate() {
                if let Some(slot) = encoder.slot(value.as_deref()) {
                    matrix[[r, offset + slot]] = 1.0;
                }
            }
            offset += encoder.categories.len();
        }
        Ok(matrix)
    }
}

/// Numeric view of a column; textual cells are parsed, unparsable ones are missing
fn numeric_values(frame: &FeatureFrame, name: &str) -> Result<Vec<Option<f64>>> {
    match frame.column(name) {
        Some(ColumnData::Numeric(values)) => Ok(values.clone()),
        Some(ColumnData::Categorical(values)) => Ok(values
            .iter()
            .map(|v| v.as_deref().and_then(|s| s.trim().parse::<f64>().ok()))
            .map(|v| v.filter(|x| x.is_finite()))
            .collect()),
        None => Err(MlError::SchemaMismatch(format!("missing column '{}'", name))),
    }
}

/// Textual view of a column; numbers are rendered as text
fn text_values(frame: &FeatureFrame, name: &str) -> Result<Vec<Option<String>>> {
    match frame.column(name) {
        Some(ColumnData::Categorical(values)) => Ok(values.clone()),
        Some(ColumnData::Numeric(values)) => Ok(values.iter().map(|v| v.map(|x| x.to_string())).collect()),
        None => Err(MlError::SchemaMismatch(format!("missing column '{}'", name))),
    }
}

fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut observed: Vec<f64> = values.iter().flatten().copied().collect();
    if observed.is_empty() {
        return None;
    }
    observed.sort_by(|a, b| a.total_cmp(b));
    let mid = observed.len() / 2;
    if observed.len() % 2 == 0 {
        Some((observed[mid - 1] + observed[mid]) / 2.0)
    } else {
        Some(observed[mid])
    }
}
