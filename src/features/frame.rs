//! Named-column feature table

use crate::error::{MlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Values of one column; `None` is a missing cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any cell holds a value
    pub fn has_observations(&self) -> bool {
        match self {
            ColumnData::Numeric(v) => v.iter().any(|x| x.is_some()),
            ColumnData::Categorical(v) => v.iter().any(|x| x.is_some()),
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, ColumnData::Categorical(_))
    }

    fn select(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Categorical(v) => {
                ColumnData::Categorical(rows.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Column-ordered table; every column has the same row count
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: usize,
}

impl FeatureFrame {
    pub fn new(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            index: HashMap::new(),
            rows,
        }
    }

    /// Append a column, replacing an existing one of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, data: ColumnData) -> Result<()> {
        if data.len() != self.rows {
            return Err(MlError::DimensionMismatch {
                expected: self.rows,
                actual: data.len(),
            });
        }
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => self.columns[i].data = data,
            None => {
                self.index.insert(name.clone(), self.columns.len());
                self.columns.push(Column { name, data });
            }
        }
        Ok(())
    }

    pub fn insert_numeric(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        self.insert(name, ColumnData::Numeric(values))
    }

    pub fn insert_categorical(&mut self, name: impl Into<String>, values: Vec<Option<String>>) -> Result<()> {
        self.insert(name, ColumnData::Categorical(values))
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.index.get(name).map(|&i| &self.columns[i].data)
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.column(name)? {
            ColumnData::Numeric(v) => Some(v),
            ColumnData::Categorical(_) => None,
        }
    }

    pub fn categorical(&self, name: &str) -> Option<&[Option<String>]> {
        match self.column(name)? {
            ColumnData::Categorical(v) => Some(v),
            ColumnData::Numeric(_) => None,
        }
    }

    /// Remove a column and return its data
    pub fn remove(&mut self, name: &str) -> Option<ColumnData> {
        let position = self.index.remove(name)?;
        let column = self.columns.remove(position);
        self.reindex();
        Some(column.data)
    }

    /// Keep only columns for which `keep` is true, preserving order
    pub fn retain_columns(&mut self, mut keep: impl FnMut(&Column) -> bool) {
        self.columns.retain(|c| keep(c));
        self.reindex();
    }

    /// New frame with the given rows, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> FeatureFrame {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                data: c.data.select(rows),
            })
            .collect();
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        FeatureFrame {
            columns,
            index,
            rows: rows.len(),
        }
    }

    /// Replace one column's values with a reordering of its own rows
    pub fn permute_column(&mut self, name: &str, order: &[usize]) -> Result<()> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| MlError::SchemaMismatch(format!("unknown column '{}'", name)))?;
        if order.len() != self.rows {
            return Err(MlError::DimensionMismatch {
                expected: self.rows,
                actual: order.len(),
            });
        }
        self.columns[i].data = self.columns[i].data.select(order);
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
    }
}
