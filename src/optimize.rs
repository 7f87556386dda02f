//! Table optimizer: shrink a table's memory footprint without changing
//! any logical cell value.
//!
//! Text columns whose distinct-to-total ratio is under 50% are
//! re-encoded as categorical (dictionary + u32 codes); integer and float
//! columns are narrowed to the smallest physical width that represents
//! every present value exactly. Optimizing twice is a no-op on values
//! and storage.

use std::collections::HashMap;

use crate::table::{Column, ColumnData, Table};

/// Row count past which consolidation optimizes automatically.
pub const AUTO_OPTIMIZE_ROWS: usize = 10_000;
/// A text column becomes categorical below this distinct/total ratio.
pub const CATEGORICAL_DISTINCT_RATIO: f64 = 0.5;

pub fn optimize(table: Table) -> Table {
    let columns = table
        .columns()
        .iter()
        .map(|column| optimize_column(column.clone()))
        .collect();
    // Optimization never renames or reorders, so the invariants hold.
    Table::new(columns).expect("optimize preserves table invariants")
}

/// Optimize only when the table is large enough to bother.
pub fn optimize_if_large(table: Table) -> Table {
    if table.n_rows() > AUTO_OPTIMIZE_ROWS {
        optimize(table)
    } else {
        table
    }
}

fn optimize_column(column: Column) -> Column {
    let name = column.name().to_string();
    let data = match column.data() {
        ColumnData::Text(values) => encode_categorical(values)
            .unwrap_or_else(|| ColumnData::Text(values.clone())),
        ColumnData::Int64(v) => narrow_ints(v.iter().copied()),
        ColumnData::Int32(v) => narrow_ints(v.iter().map(|c| c.map(i64::from))),
        ColumnData::Int16(v) => narrow_ints(v.iter().map(|c| c.map(i64::from))),
        ColumnData::Float64(v) => narrow_floats(v),
        other => other.clone(),
    };
    Column::new(name, data)
}

fn encode_categorical(values: &[Option<String>]) -> Option<ColumnData> {
    if values.is_empty() {
        return None;
    }
    let mut dictionary: Vec<String> = Vec::new();
    let mut lookup: HashMap<String, u32> = HashMap::new();
    let mut codes = Vec::with_capacity(values.len());
    for value in values {
        match value {
            None => codes.push(None),
            Some(text) => {
                let code = match lookup.get(text) {
                    Some(code) => *code,
                    None => {
                        let code = dictionary.len() as u32;
                        dictionary.push(text.clone());
                        lookup.insert(text.clone(), code);
                        code
                    }
                };
                codes.push(Some(code));
            }
        }
    }
    let ratio = dictionary.len() as f64 / values.len() as f64;
    if ratio < CATEGORICAL_DISTINCT_RATIO {
        Some(ColumnData::Categorical { dictionary, codes })
    } else {
        None
    }
}

fn narrow_ints(values: impl Iterator<Item = Option<i64>> + Clone) -> ColumnData {
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    let mut any = false;
    for value in values.clone().flatten() {
        any = true;
        min = min.min(value);
        max = max.max(value);
    }
    if !any {
        return ColumnData::Int8(values.map(|v| v.map(|x| x as i8)).collect());
    }
    if min >= i64::from(i8::MIN) && max <= i64::from(i8::MAX) {
        ColumnData::Int8(values.map(|v| v.map(|x| x as i8)).collect())
    } else if min >= i64::from(i16::MIN) && max <= i64::from(i16::MAX) {
        ColumnData::Int16(values.map(|v| v.map(|x| x as i16)).collect())
    } else if min >= i64::from(i32::MIN) && max <= i64::from(i32::MAX) {
        ColumnData::Int32(values.map(|v| v.map(|x| x as i32)).collect())
    } else {
        ColumnData::Int64(values.collect())
    }
}

fn narrow_floats(values: &[Option<f64>]) -> ColumnData {
    let lossless = values
        .iter()
        .flatten()
        .all(|&x| f64::from(x as f32) == x);
    if lossless {
        ColumnData::Float32(values.iter().map(|v| v.map(|x| x as f32)).collect())
    } else {
        ColumnData::Float64(values.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, ColumnType};

    fn text_column(values: &[&str]) -> Column {
        Column::from_cells(
            "c",
            ColumnType::Text,
            values.iter().map(|s| Cell::Text(s.to_string())).collect(),
        )
    }

    #[test]
    fn low_cardinality_text_becomes_categorical() {
        let table = Table::new(vec![text_column(&["a", "b", "a", "a", "b", "a"])]).unwrap();
        let optimized = optimize(table);
        assert!(matches!(
            optimized.columns()[0].data(),
            ColumnData::Categorical { .. }
        ));
    }

    #[test]
    fn high_cardinality_text_stays_text() {
        let table = Table::new(vec![text_column(&["a", "b", "c", "d"])]).unwrap();
        let optimized = optimize(table);
        assert!(matches!(optimized.columns()[0].data(), ColumnData::Text(_)));
    }

    #[test]
    fn integers_narrow_to_smallest_lossless_width() {
        let table = Table::new(vec![Column::from_cells(
            "n",
            ColumnType::Integer,
            vec![Cell::Integer(1), Cell::Integer(120), Cell::Missing],
        )])
        .unwrap();
        let optimized = optimize(table);
        assert!(matches!(optimized.columns()[0].data(), ColumnData::Int8(_)));
        assert_eq!(optimized.columns()[0].cell(1), Cell::Integer(120));
    }

    #[test]
    fn wide_integers_keep_width() {
        let table = Table::new(vec![Column::from_cells(
            "n",
            ColumnType::Integer,
            vec![Cell::Integer(5_000_000_000)],
        )])
        .unwrap();
        let optimized = optimize(table);
        assert!(matches!(optimized.columns()[0].data(), ColumnData::Int64(_)));
    }

    #[test]
    fn optimize_is_idempotent() {
        let table = Table::new(vec![
            text_column(&["x", "x", "y", "x"]),
            Column::from_cells(
                "n",
                ColumnType::Float,
                vec![Cell::Float(1.5), Cell::Float(2.5), Cell::Missing, Cell::Float(0.0)],
            ),
        ])
        .unwrap();
        let once = optimize(table);
        let twice = optimize(once.clone());
        assert_eq!(once, twice);
        assert!(twice.approx_byte_size() <= once.approx_byte_size());
    }
}
