use consolidata::data::{Cell, ColumnType};
use consolidata::optimize::{AUTO_OPTIMIZE_ROWS, optimize, optimize_if_large};
use consolidata::table::{Column, ColumnData, Table};
use proptest::prelude::*;

fn cells_equal(a: &Table, b: &Table) -> bool {
    if a.n_rows() != b.n_rows() || a.column_names() != b.column_names() {
        return false;
    }
    (0..a.n_rows()).all(|row| a.row_cells(row) == b.row_cells(row))
}

#[test]
fn optimize_preserves_logical_values() {
    let table = Table::new(vec![
        Column::from_cells(
            "Status",
            ColumnType::Text,
            vec![
                Cell::Text("open".into()),
                Cell::Text("open".into()),
                Cell::Text("closed".into()),
                Cell::Missing,
                Cell::Text("open".into()),
            ],
        ),
        Column::from_cells(
            "Count",
            ColumnType::Integer,
            vec![
                Cell::Integer(1),
                Cell::Integer(2),
                Cell::Integer(3),
                Cell::Integer(4),
                Cell::Missing,
            ],
        ),
    ])
    .unwrap();
    let optimized = optimize(table.clone());
    assert!(cells_equal(&table, &optimized));
    assert!(optimized.approx_byte_size() <= table.approx_byte_size());
}

#[test]
fn optimize_if_large_skips_small_tables() {
    let table = Table::new(vec![Column::from_cells(
        "n",
        ColumnType::Integer,
        vec![Cell::Integer(1); 100],
    )])
    .unwrap();
    let kept = optimize_if_large(table);
    assert!(matches!(kept.columns()[0].data(), ColumnData::Int64(_)));

    let big = Table::new(vec![Column::from_cells(
        "n",
        ColumnType::Integer,
        vec![Cell::Integer(1); AUTO_OPTIMIZE_ROWS + 1],
    )])
    .unwrap();
    let narrowed = optimize_if_large(big);
    assert!(matches!(narrowed.columns()[0].data(), ColumnData::Int8(_)));
}

#[test]
fn categorical_columns_survive_merging_back_to_text() {
    let table = Table::new(vec![Column::from_cells(
        "Status",
        ColumnType::Text,
        vec![Cell::Text("a".into()), Cell::Text("a".into()), Cell::Text("b".into()), Cell::Text("a".into())],
    )])
    .unwrap();
    let mut optimized = optimize(table.clone());
    assert!(matches!(
        optimized.columns()[0].data(),
        ColumnData::Categorical { .. }
    ));

    // Appending decays back to text storage without value changes.
    optimized.append_rows(&table);
    assert_eq!(optimized.n_rows(), 8);
    assert_eq!(
        optimized.columns()[0].cell(0),
        Cell::Text("a".into())
    );
}

proptest! {
    #[test]
    fn optimizing_twice_equals_optimizing_once(
        ints in proptest::collection::vec(proptest::option::of(any::<i64>()), 0..200),
        floats in proptest::collection::vec(proptest::option::of(-1.0e6f64..1.0e6), 0..200),
        words in proptest::collection::vec(proptest::option::of("[a-e]{1,3}"), 0..200),
    ) {
        let rows = ints.len().min(floats.len()).min(words.len());
        let table = Table::new(vec![
            Column::from_cells(
                "i",
                ColumnType::Integer,
                ints[..rows]
                    .iter()
                    .map(|v| v.map(Cell::Integer).unwrap_or(Cell::Missing))
                    .collect(),
            ),
            Column::from_cells(
                "f",
                ColumnType::Float,
                floats[..rows]
                    .iter()
                    .map(|v| v.map(Cell::Float).unwrap_or(Cell::Missing))
                    .collect(),
            ),
            Column::from_cells(
                "w",
                ColumnType::Text,
                words[..rows]
                    .iter()
                    .map(|v| v.clone().map(Cell::Text).unwrap_or(Cell::Missing))
                    .collect(),
            ),
        ])
        .unwrap();

        let once = optimize(table.clone());
        let twice = optimize(once.clone());
        prop_assert!(cells_equal(&table, &once));
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.approx_byte_size() <= table.approx_byte_size());
    }
}
