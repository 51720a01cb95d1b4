use std::collections::{HashMap, HashSet};

use crate::error::CompendiumError;

/// A string-valued table indexed by row identifier.
///
/// Cells are `None` when a field is missing; the index and the row order are
/// always kept in lockstep.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataTable {
    index_name: String,
    index: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

/// Borrowed view of one table row, handed to row predicates.
#[derive(Debug, Clone, Copy)]
pub struct MetadataRow<'a> {
    table: &'a MetadataTable,
    position: usize,
}

impl<'a> MetadataRow<'a> {
    pub fn id(&self) -> &'a str {
        &self.table.index[self.position]
    }

    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.table.get(self.position, column)
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl MetadataTable {
    pub fn new(index_name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            index_name: index_name.into(),
            index: Vec::new(),
            columns,
            rows: Vec::new(),
        }
    }

    /// A table with identifiers only and no fields.
    pub fn from_index(index_name: impl Into<String>, ids: Vec<String>) -> Self {
        let rows = vec![Vec::new(); ids.len()];
        Self {
            index_name: index_name.into(),
            index: ids,
            columns: Vec::new(),
            rows,
        }
    }

    pub fn push_row(
        &mut self,
        id: impl Into<String>,
        values: Vec<Option<String>>,
    ) -> Result<(), CompendiumError> {
        let id = id.into();
        if values.len() != self.columns.len() {
            return Err(CompendiumError::ShapeMismatch(format!(
                "row {id} has {} fields, table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.index.push(id);
        self.rows.push(values);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_position(column).is_some()
    }

    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_position(column)?;
        self.rows.get(row)?.get(col)?.as_deref()
    }

    pub fn row(&self, position: usize) -> MetadataRow<'_> {
        MetadataRow {
            table: self,
            position,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = MetadataRow<'_>> {
        (0..self.len()).map(move |position| self.row(position))
    }

    pub fn row_values(&self, position: usize) -> &[Option<String>] {
        &self.rows[position]
    }

    pub fn column_values(&self, column: &str) -> Option<Vec<Option<&str>>> {
        let col = self.column_position(column)?;
        Some(self.rows.iter().map(|row| row[col].as_deref()).collect())
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.index.iter().position(|value| value == id)
    }

    /// First identifier that occurs more than once, if any.
    pub fn first_duplicate(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.index.len());
        self.index
            .iter()
            .find(|id| !seen.insert(id.as_str()))
            .map(String::as_str)
    }

    pub fn select(&self, positions: &[usize]) -> Self {
        Self {
            index_name: self.index_name.clone(),
            index: positions.iter().map(|&i| self.index[i].clone()).collect(),
            columns: self.columns.clone(),
            rows: positions.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Keeps the first row of every identifier, in table order.
    pub fn dedup_first(&self) -> Self {
        let mut seen = HashSet::with_capacity(self.index.len());
        let positions = self
            .index
            .iter()
            .enumerate()
            .filter(|(_, id)| seen.insert(id.as_str()))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        self.select(&positions)
    }

    pub fn restrict_to(&self, ids: &HashSet<&str>) -> Self {
        let positions = self
            .index
            .iter()
            .enumerate()
            .filter(|(_, id)| ids.contains(id.as_str()))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        self.select(&positions)
    }

    /// Rows in the order of `ids`. Identifiers without a row get all-missing
    /// fields and are returned in the second element.
    pub fn reindex(&self, ids: &[String]) -> (Self, Vec<String>) {
        let lookup = self
            .index
            .iter()
            .enumerate()
            .rev()
            .map(|(i, id)| (id.as_str(), i))
            .collect::<HashMap<_, _>>();
        let mut missing = Vec::new();
        let rows = ids
            .iter()
            .map(|id| match lookup.get(id.as_str()) {
                Some(&i) => self.rows[i].clone(),
                None => {
                    missing.push(id.clone());
                    vec![None; self.columns.len()]
                }
            })
            .collect();
        let table = Self {
            index_name: self.index_name.clone(),
            index: ids.to_vec(),
            columns: self.columns.clone(),
            rows,
        };
        (table, missing)
    }

    /// Replaces the column if it exists, appends it otherwise.
    pub fn with_column(
        mut self,
        column: &str,
        values: Vec<Option<String>>,
    ) -> Result<Self, CompendiumError> {
        if values.len() != self.len() {
            return Err(CompendiumError::ShapeMismatch(format!(
                "column {column} has {} values, table has {} rows",
                values.len(),
                self.len()
            )));
        }
        match self.column_position(column) {
            Some(col) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[col] = value;
                }
            }
            None => {
                self.columns.push(column.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(self)
    }

    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = index_name.into();
        self
    }

    /// Stacks the rows of `other` below `self`; the column set is the union,
    /// `self` first, and absent cells are missing.
    pub fn append_rows(&self, other: &MetadataTable) -> Self {
        let mut columns = self.columns.clone();
        for column in &other.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let project = |table: &MetadataTable, row: &[Option<String>]| {
            columns
                .iter()
                .map(|column| {
                    table
                        .column_position(column)
                        .and_then(|col| row[col].clone())
                })
                .collect::<Vec<_>>()
        };
        let mut rows = Vec::with_capacity(self.len() + other.len());
        rows.extend(self.rows.iter().map(|row| project(self, row)));
        rows.extend(other.rows.iter().map(|row| project(other, row)));
        let mut index = self.index.clone();
        index.extend(other.index.iter().cloned());
        Self {
            index_name: self.index_name.clone(),
            index,
            columns,
            rows,
        }
    }
}
