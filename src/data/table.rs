//! CSV tables with by-name column access

use crate::error::{MlError, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use super::timestamp::parse_timestamp;

/// A row-oriented table read from one export file
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    headers: HashMap<String, usize>,
    rows: Vec<StringRecord>,
}

impl RawTable {
    /// Read `<base>.csv`. A missing or empty file yields `None`; a
    /// `<base>.parquet` without a CSV sibling is reported and skipped.
    pub fn read(base: &Path, row_limit: Option<usize>) -> Result<Option<RawTable>> {
        let csv_path = base.with_extension("csv");
        let parquet_path = base.with_extension("parquet");

        if !csv_path.exists() {
            if parquet_path.exists() {
                warn!(path = %parquet_path.display(), "Parquet export found without CSV sibling; columnar input is not supported");
            } else {
                warn!(path = %base.display(), "Missing dataset");
            }
            return Ok(None);
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&csv_path)?;
        let headers: HashMap<String, usize> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            if row_limit.is_some_and(|limit| limit > 0 && rows.len() >= limit) {
                break;
            }
            rows.push(record?);
        }

        if headers.is_empty() || rows.is_empty() {
            warn!(path = %csv_path.display(), "CSV file is empty");
            return Ok(None);
        }

        Ok(Some(RawTable { headers, rows }))
    }

    /// Build a table from in-memory rows
    pub fn from_rows(headers: &[&str], rows: Vec<Vec<String>>) -> Result<RawTable> {
        let header_map: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_string(), i))
            .collect();
        let rows = rows
            .into_iter()
            .map(|row| {
                if row.len() != headers.len() {
                    return Err(MlError::DimensionMismatch {
                        expected: headers.len(),
                        actual: row.len(),
                    });
                }
                Ok(StringRecord::from(row))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RawTable {
            headers: header_map,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// First of `names` that exists
    pub fn first_column<'a>(&self, names: &[&'a str]) -> Option<&'a str> {
        names.iter().copied().find(|n| self.has_column(n))
    }

    /// Text cells of a column; `None` when the column is absent
    pub fn text(&self, name: &str) -> Option<Vec<Option<String>>> {
        let idx = *self.headers.get(name)?;
        Some(self.rows.iter().map(|row| row.get(idx).and_then(parse_text)).collect())
    }

    /// Numeric cells of a column, unparsable values become missing
    pub fn numeric(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = *self.headers.get(name)?;
        Some(self.rows.iter().map(|row| row.get(idx).and_then(parse_f64)).collect())
    }

    /// Timestamp cells of a column, unparsable values become missing
    pub fn timestamps(&self, name: &str) -> Option<Vec<Option<DateTime<Utc>>>> {
        let idx = *self.headers.get(name)?;
        Some(self.rows.iter().map(|row| row.get(idx).and_then(parse_timestamp)).collect())
    }

    /// Numeric column, or all-missing when absent
    pub fn numeric_or_missing(&self, name: &str) -> Vec<Option<f64>> {
        self.numeric(name).unwrap_or_else(|| vec![None; self.len()])
    }

    /// Text column, or all-missing when absent
    pub fn text_or_missing(&self, name: &str) -> Vec<Option<String>> {
        self.text(name).unwrap_or_else(|| vec![None; self.len()])
    }
}

const MISSING_MARKERS: &[&str] = &["", "nan", "NaN", "None", "null", "NULL", "NaT", "<NA>"];

fn parse_text(cell: &str) -> Option<String> {
    if MISSING_MARKERS.contains(&cell.trim()) {
        None
    } else {
        Some(cell.to_string())
    }
}

/// Numeric coercion: booleans map to 0/1; unparsable and non-finite cells are missing
pub fn parse_f64(cell: &str) -> Option<f64> {
    let value = cell.trim();
    match value {
        "True" | "true" => return Some(1.0),
        "False" | "false" => return Some(0.0),
        _ => {}
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}
