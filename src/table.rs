//! Columnar table model.
//!
//! A [`Table`] is an ordered sequence of named [`Column`]s of equal
//! length. Cells are logically one of the [`crate::data::Cell`] variants;
//! physically each column owns one [`ColumnData`] storage, which is where
//! the optimizer's narrowing (categorical dictionaries, small integer and
//! float widths) lives. Tables serialize with `serde` so the canonical
//! dataset can be persisted with `bincode`.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Cell, ColumnType},
    error::{EngineError, Result},
};

/// Physical storage for one column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ColumnData {
    Text(Vec<Option<String>>),
    /// Dictionary-encoded text for low-cardinality columns.
    Categorical {
        dictionary: Vec<String>,
        codes: Vec<Option<u32>>,
    },
    Int8(Vec<Option<i8>>),
    Int16(Vec<Option<i16>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float32(Vec<Option<f32>>),
    Float64(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    Date(Vec<Option<NaiveDate>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(v) => v.len(),
            ColumnData::Categorical { codes, .. } => codes.len(),
            ColumnData::Int8(v) => v.len(),
            ColumnData::Int16(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Column {
            name: name.into(),
            data,
        }
    }

    /// Build a column in its widest storage from logical cells. Cells
    /// that do not fit the declared type degrade to Missing rather than
    /// failing the whole column; the reader is responsible for choosing
    /// a type that fits the data it saw.
    pub fn from_cells(name: impl Into<String>, ty: ColumnType, cells: Vec<Cell>) -> Self {
        let data = match ty {
            ColumnType::Text => ColumnData::Text(
                cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Missing => None,
                        other => Some(other.as_display()),
                    })
                    .collect(),
            ),
            ColumnType::Integer => ColumnData::Int64(
                cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Integer(i) => Some(i),
                        _ => None,
                    })
                    .collect(),
            ),
            ColumnType::Float => ColumnData::Float64(
                cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Float(f) => Some(f),
                        Cell::Integer(i) => Some(i as f64),
                        _ => None,
                    })
                    .collect(),
            ),
            ColumnType::Boolean => ColumnData::Boolean(
                cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Boolean(b) => Some(b),
                        _ => None,
                    })
                    .collect(),
            ),
            ColumnType::Date => ColumnData::Date(
                cells
                    .into_iter()
                    .map(|c| match c {
                        Cell::Date(d) => Some(d),
                        _ => None,
                    })
                    .collect(),
            ),
        };
        Column::new(name, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn column_type(&self) -> ColumnType {
        match &self.data {
            ColumnData::Text(_) | ColumnData::Categorical { .. } => ColumnType::Text,
            ColumnData::Int8(_) | ColumnData::Int16(_) | ColumnData::Int32(_)
            | ColumnData::Int64(_) => ColumnType::Integer,
            ColumnData::Float32(_) | ColumnData::Float64(_) => ColumnType::Float,
            ColumnData::Boolean(_) => ColumnType::Boolean,
            ColumnData::Date(_) => ColumnType::Date,
        }
    }

    pub fn cell(&self, row: usize) -> Cell {
        match &self.data {
            ColumnData::Text(v) => v
                .get(row)
                .and_then(|c| c.as_ref())
                .map(|s| Cell::Text(s.clone()))
                .unwrap_or(Cell::Missing),
            ColumnData::Categorical { dictionary, codes } => codes
                .get(row)
                .and_then(|c| *c)
                .and_then(|code| dictionary.get(code as usize))
                .map(|s| Cell::Text(s.clone()))
                .unwrap_or(Cell::Missing),
            ColumnData::Int8(v) => opt_cell(v, row, |x| Cell::Integer(x as i64)),
            ColumnData::Int16(v) => opt_cell(v, row, |x| Cell::Integer(x as i64)),
            ColumnData::Int32(v) => opt_cell(v, row, |x| Cell::Integer(x as i64)),
            ColumnData::Int64(v) => opt_cell(v, row, Cell::Integer),
            ColumnData::Float32(v) => opt_cell(v, row, |x| Cell::Float(x as f64)),
            ColumnData::Float64(v) => opt_cell(v, row, Cell::Float),
            ColumnData::Boolean(v) => opt_cell(v, row, Cell::Boolean),
            ColumnData::Date(v) => opt_cell(v, row, Cell::Date),
        }
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.len()).map(|row| self.cell(row))
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match &self.data {
            ColumnData::Text(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Categorical { codes, .. } => codes.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Int8(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Int16(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Int32(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Int64(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Float32(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Float64(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Boolean(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnData::Date(v) => v.get(row).is_none_or(|c| c.is_none()),
        }
    }

    /// Display string for a present value, `None` when missing. Avoids
    /// allocating a `Cell` for the categorical fast path.
    pub fn display_value(&self, row: usize) -> Option<String> {
        match &self.data {
            ColumnData::Text(v) => v.get(row).and_then(|c| c.clone()),
            ColumnData::Categorical { dictionary, codes } => codes
                .get(row)
                .and_then(|c| *c)
                .and_then(|code| dictionary.get(code as usize))
                .cloned(),
            _ => {
                let cell = self.cell(row);
                (!cell.is_missing()).then(|| cell.as_display())
            }
        }
    }

    /// Grouping key used by the analytics engine: missing values group
    /// under "(blank)".
    pub fn group_key(&self, row: usize) -> String {
        self.display_value(row)
            .unwrap_or_else(|| "(blank)".to_string())
    }

    pub fn numeric(&self, row: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Int8(v) => v.get(row).and_then(|c| *c).map(|x| x as f64),
            ColumnData::Int16(v) => v.get(row).and_then(|c| *c).map(|x| x as f64),
            ColumnData::Int32(v) => v.get(row).and_then(|c| *c).map(|x| x as f64),
            ColumnData::Int64(v) => v.get(row).and_then(|c| *c).map(|x| x as f64),
            ColumnData::Float32(v) => v.get(row).and_then(|c| *c).map(|x| x as f64),
            ColumnData::Float64(v) => v.get(row).and_then(|c| *c),
            _ => self.display_value(row).and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn date(&self, row: usize) -> Option<NaiveDate> {
        match &self.data {
            ColumnData::Date(v) => v.get(row).and_then(|c| *c),
            _ => None,
        }
    }

    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|row| self.is_missing(*row)).count()
    }

    pub fn distinct_count(&self) -> usize {
        match &self.data {
            ColumnData::Categorical { codes, .. } => {
                codes.iter().flatten().collect::<HashSet<_>>().len()
            }
            _ => {
                let mut seen = HashSet::new();
                for row in 0..self.len() {
                    if let Some(value) = self.display_value(row) {
                        seen.insert(value);
                    }
                }
                seen.len()
            }
        }
    }

    /// Widen to the canonical (widest) storage for the logical type so
    /// heterogeneous appends are well-defined. The optimizer re-narrows.
    pub fn decay(&mut self) {
        let widened = match &self.data {
            ColumnData::Categorical { dictionary, codes } => ColumnData::Text(
                codes
                    .iter()
                    .map(|c| c.and_then(|code| dictionary.get(code as usize).cloned()))
                    .collect(),
            ),
            ColumnData::Int8(v) => {
                ColumnData::Int64(v.iter().map(|c| c.map(|x| x as i64)).collect())
            }
            ColumnData::Int16(v) => {
                ColumnData::Int64(v.iter().map(|c| c.map(|x| x as i64)).collect())
            }
            ColumnData::Int32(v) => {
                ColumnData::Int64(v.iter().map(|c| c.map(|x| x as i64)).collect())
            }
            ColumnData::Float32(v) => {
                ColumnData::Float64(v.iter().map(|c| c.map(|x| x as f64)).collect())
            }
            _ => return,
        };
        self.data = widened;
    }

    /// Append cells from another column of the same logical type. Both
    /// integer-vs-float mixes and text widening are handled by decaying
    /// first.
    pub fn append_cells<I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = Cell>,
    {
        self.decay();
        match &mut self.data {
            ColumnData::Text(v) => {
                for cell in cells {
                    v.push(match cell {
                        Cell::Missing => None,
                        other => Some(other.as_display()),
                    });
                }
            }
            ColumnData::Int64(v) => {
                for cell in cells {
                    v.push(match cell {
                        Cell::Integer(i) => Some(i),
                        _ => None,
                    });
                }
            }
            ColumnData::Float64(v) => {
                for cell in cells {
                    v.push(match cell {
                        Cell::Float(f) => Some(f),
                        Cell::Integer(i) => Some(i as f64),
                        _ => None,
                    });
                }
            }
            ColumnData::Boolean(v) => {
                for cell in cells {
                    v.push(match cell {
                        Cell::Boolean(b) => Some(b),
                        _ => None,
                    });
                }
            }
            ColumnData::Date(v) => {
                for cell in cells {
                    v.push(match cell {
                        Cell::Date(d) => Some(d),
                        _ => None,
                    });
                }
            }
            // decay() leaves only the wide variants above.
            _ => unreachable!("decayed column storage"),
        }
    }

    pub fn push_missing(&mut self, count: usize) {
        self.append_cells(std::iter::repeat_n(Cell::Missing, count));
    }

    pub fn remove_rows(&mut self, start: usize, len: usize) {
        fn drain<T>(v: &mut Vec<T>, start: usize, len: usize) {
            let end = (start + len).min(v.len());
            let start = start.min(v.len());
            v.drain(start..end);
        }
        match &mut self.data {
            ColumnData::Text(v) => drain(v, start, len),
            ColumnData::Categorical { codes, .. } => drain(codes, start, len),
            ColumnData::Int8(v) => drain(v, start, len),
            ColumnData::Int16(v) => drain(v, start, len),
            ColumnData::Int32(v) => drain(v, start, len),
            ColumnData::Int64(v) => drain(v, start, len),
            ColumnData::Float32(v) => drain(v, start, len),
            ColumnData::Float64(v) => drain(v, start, len),
            ColumnData::Boolean(v) => drain(v, start, len),
            ColumnData::Date(v) => drain(v, start, len),
        }
    }

    pub fn take_rows(&self, rows: &[usize]) -> Column {
        fn pick<T: Clone>(v: &[Option<T>], rows: &[usize]) -> Vec<Option<T>> {
            rows.iter().map(|&r| v.get(r).cloned().flatten()).collect()
        }
        let data = match &self.data {
            ColumnData::Text(v) => ColumnData::Text(pick(v, rows)),
            ColumnData::Categorical { dictionary, codes } => ColumnData::Categorical {
                dictionary: dictionary.clone(),
                codes: pick(codes, rows),
            },
            ColumnData::Int8(v) => ColumnData::Int8(pick(v, rows)),
            ColumnData::Int16(v) => ColumnData::Int16(pick(v, rows)),
            ColumnData::Int32(v) => ColumnData::Int32(pick(v, rows)),
            ColumnData::Int64(v) => ColumnData::Int64(pick(v, rows)),
            ColumnData::Float32(v) => ColumnData::Float32(pick(v, rows)),
            ColumnData::Float64(v) => ColumnData::Float64(pick(v, rows)),
            ColumnData::Boolean(v) => ColumnData::Boolean(pick(v, rows)),
            ColumnData::Date(v) => ColumnData::Date(pick(v, rows)),
        };
        Column::new(self.name.clone(), data)
    }

    /// Actual heap footprint of the column, including string payloads
    /// and dictionary storage.
    pub fn approx_byte_size(&self) -> usize {
        fn vec_size<T>(v: &Vec<Option<T>>) -> usize {
            v.capacity() * std::mem::size_of::<Option<T>>()
        }
        match &self.data {
            ColumnData::Text(v) => {
                vec_size(v) + v.iter().flatten().map(|s| s.capacity()).sum::<usize>()
            }
            ColumnData::Categorical { dictionary, codes } => {
                codes.capacity() * std::mem::size_of::<Option<u32>>()
                    + dictionary
                        .iter()
                        .map(|s| s.capacity() + std::mem::size_of::<String>())
                        .sum::<usize>()
            }
            ColumnData::Int8(v) => vec_size(v),
            ColumnData::Int16(v) => vec_size(v),
            ColumnData::Int32(v) => vec_size(v),
            ColumnData::Int64(v) => vec_size(v),
            ColumnData::Float32(v) => vec_size(v),
            ColumnData::Float64(v) => vec_size(v),
            ColumnData::Boolean(v) => vec_size(v),
            ColumnData::Date(v) => vec_size(v),
        }
    }
}

fn opt_cell<T: Copy>(v: &[Option<T>], row: usize, wrap: impl Fn(T) -> Cell) -> Cell {
    v.get(row)
        .and_then(|c| *c)
        .map(wrap)
        .unwrap_or(Cell::Missing)
}

/// Ordered, uniquely-named columns of equal length.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut names = HashSet::new();
        for column in &columns {
            if !names.insert(column.name().to_string()) {
                return Err(EngineError::missing_data(format!(
                    "duplicate column name '{}'",
                    column.name()
                )));
            }
        }
        if let Some(first) = columns.first() {
            let len = first.len();
            for column in &columns {
                if column.len() != len {
                    return Err(EngineError::missing_data(format!(
                        "column '{}' has {} rows, expected {}",
                        column.name(),
                        column.len(),
                        len
                    )));
                }
            }
        }
        Ok(Table { columns })
    }

    pub fn empty() -> Self {
        Table::default()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| EngineError::missing_data(format!("column '{name}' does not exist")))
    }

    /// Ordered (name, type) pairs.
    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name().to_string(), c.column_type()))
            .collect()
    }

    pub fn column_name_set(&self) -> HashSet<String> {
        self.columns
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Append a new column; rows must match the current row count
    /// (anything may be pushed onto an empty table).
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if self.column(column.name()).is_some() {
            return Err(EngineError::missing_data(format!(
                "duplicate column name '{}'",
                column.name()
            )));
        }
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(EngineError::missing_data(format!(
                "column '{}' has {} rows, expected {}",
                column.name(),
                column.len(),
                self.n_rows()
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Append another table's rows by column name. Columns of `other`
    /// that this table lacks are ignored; columns `other` lacks are
    /// back-filled with Missing. Callers enforce schema compatibility
    /// before getting here.
    pub fn append_rows(&mut self, other: &Table) {
        let added = other.n_rows();
        let lookup: HashMap<&str, &Column> =
            other.columns.iter().map(|c| (c.name(), c)).collect();
        for column in &mut self.columns {
            match lookup.get(column.name()) {
                Some(incoming) => column.append_cells(incoming.iter_cells()),
                None => column.push_missing(added),
            }
        }
    }

    pub fn remove_rows(&mut self, start: usize, len: usize) {
        for column in &mut self.columns {
            column.remove_rows(start, len);
        }
    }

    /// Narrow copy of only the named columns, in the given order.
    pub fn project(&self, names: &[&str]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|name| self.require_column(name).cloned())
            .collect::<Result<Vec<_>>>()?;
        Table::new(columns)
    }

    pub fn take_rows(&self, rows: &[usize]) -> Table {
        Table {
            columns: self.columns.iter().map(|c| c.take_rows(rows)).collect(),
        }
    }

    pub fn row_cells(&self, row: usize) -> Vec<Cell> {
        self.columns.iter().map(|c| c.cell(row)).collect()
    }

    pub fn approx_byte_size(&self) -> usize {
        self.columns.iter().map(|c| c.approx_byte_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            Column::from_cells(
                "Region",
                ColumnType::Text,
                vec![
                    Cell::Text("East".into()),
                    Cell::Text("West".into()),
                    Cell::Missing,
                ],
            ),
            Column::from_cells(
                "Amount",
                ColumnType::Integer,
                vec![Cell::Integer(100), Cell::Integer(50), Cell::Integer(200)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_names_and_ragged_columns() {
        let dup = Table::new(vec![
            Column::from_cells("A", ColumnType::Integer, vec![Cell::Integer(1)]),
            Column::from_cells("A", ColumnType::Integer, vec![Cell::Integer(2)]),
        ]);
        assert!(dup.is_err());

        let ragged = Table::new(vec![
            Column::from_cells("A", ColumnType::Integer, vec![Cell::Integer(1)]),
            Column::from_cells("B", ColumnType::Integer, vec![]),
        ]);
        assert!(ragged.is_err());
    }

    #[test]
    fn append_rows_backfills_missing_columns() {
        let mut table = sample();
        let extra = Table::new(vec![Column::from_cells(
            "Region",
            ColumnType::Text,
            vec![Cell::Text("North".into())],
        )])
        .unwrap();
        table.append_rows(&extra);
        assert_eq!(table.n_rows(), 4);
        assert!(table.column("Amount").unwrap().is_missing(3));
    }

    #[test]
    fn remove_rows_drops_exact_range() {
        let mut table = sample();
        table.remove_rows(1, 1);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(
            table.column("Amount").unwrap().cell(1),
            Cell::Integer(200)
        );
    }

    #[test]
    fn group_key_maps_missing_to_blank() {
        let table = sample();
        assert_eq!(table.column("Region").unwrap().group_key(2), "(blank)");
    }

    #[test]
    fn byte_size_counts_string_payloads() {
        let table = sample();
        let text_heavy = Table::new(vec![Column::from_cells(
            "Region",
            ColumnType::Text,
            vec![Cell::Text("a-much-longer-region-name".repeat(4)); 3],
        )])
        .unwrap();
        assert!(text_heavy.approx_byte_size() > table.column("Region").unwrap().approx_byte_size());
    }
}
