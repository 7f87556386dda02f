//! Consolidation primitives: direct and column-mapped merges of an
//! incoming table into a project's canonical table, and provenance-based
//! removal of a prior upload's rows.
//!
//! The [`crate::engine::Engine`] owns persistence, ledger, audit, and
//! cache ordering; everything here is pure table manipulation.

use uuid::Uuid;

use crate::{
    data::Cell,
    error::{EngineError, Result},
    optimize,
    store::UploadRecord,
    table::{Column, Table},
};

/// Ordered incoming-name → canonical-name pairs. Targets not present in
/// the canonical schema become new columns; incoming columns absent from
/// the mapping are dropped.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    pairs: Vec<(String, String)>,
}

impl ColumnMapping {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        ColumnMapping { pairs }
    }

    /// Parse repeated `incoming=canonical` CLI arguments.
    pub fn parse_pairs(specs: &[String]) -> Result<Self> {
        let mut pairs = Vec::new();
        for spec in specs {
            let (from, to) = spec.split_once('=').ok_or_else(|| {
                EngineError::missing_data(format!(
                    "mapping '{spec}' must use the form 'incoming=canonical'"
                ))
            })?;
            let (from, to) = (from.trim(), to.trim());
            if from.is_empty() || to.is_empty() {
                return Err(EngineError::missing_data(format!(
                    "mapping '{spec}' has an empty side"
                )));
            }
            pairs.push((from.to_string(), to.to_string()));
        }
        Ok(ColumnMapping { pairs })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub table: Table,
    pub row_start: usize,
    pub rows_added: usize,
}

/// Order-independent column-set equality check for direct merges.
pub fn check_schema(canonical: &Table, incoming: &Table) -> Result<()> {
    let canonical_set = canonical.column_name_set();
    let incoming_set = incoming.column_name_set();
    let mut missing: Vec<String> = canonical_set.difference(&incoming_set).cloned().collect();
    let mut unexpected: Vec<String> = incoming_set.difference(&canonical_set).cloned().collect();
    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }
    missing.sort();
    unexpected.sort();
    Err(EngineError::SchemaMismatch {
        missing,
        unexpected,
    })
}

/// Rename and reduce an incoming table per the mapping.
pub fn apply_mapping(incoming: &Table, mapping: &ColumnMapping) -> Result<Table> {
    let mut columns = Vec::with_capacity(mapping.pairs().len());
    for (from, to) in mapping.pairs() {
        let mut column = incoming.require_column(from)?.clone();
        column.rename(to.clone());
        columns.push(column);
    }
    Table::new(columns)
}

/// Direct merge: column sets must match exactly; rows are appended and
/// the table re-optimized when it has grown large.
pub fn merge(canonical: Option<Table>, incoming: Table) -> Result<MergeOutcome> {
    match canonical {
        None => {
            let rows_added = incoming.n_rows();
            Ok(MergeOutcome {
                table: optimize::optimize_if_large(incoming),
                row_start: 0,
                rows_added,
            })
        }
        Some(mut table) => {
            check_schema(&table, &incoming)?;
            let row_start = table.n_rows();
            let rows_added = incoming.n_rows();
            table.append_rows(&incoming);
            Ok(MergeOutcome {
                table: optimize::optimize_if_large(table),
                row_start,
                rows_added,
            })
        }
    }
}

/// Mapped merge: align columns per the mapping, extend the canonical
/// schema with mapping targets it lacks (back-filled with Missing), and
/// back-fill canonical columns the mapped upload does not provide. The
/// optimizer always runs afterward.
pub fn merge_mapped(
    canonical: Option<Table>,
    incoming: &Table,
    mapping: &ColumnMapping,
) -> Result<MergeOutcome> {
    let mapped = apply_mapping(incoming, mapping)?;
    match canonical {
        None => {
            let rows_added = mapped.n_rows();
            Ok(MergeOutcome {
                table: optimize::optimize(mapped),
                row_start: 0,
                rows_added,
            })
        }
        Some(mut table) => {
            let row_start = table.n_rows();
            let rows_added = mapped.n_rows();
            for column in mapped.columns() {
                if table.column(column.name()).is_none() {
                    let filler = Column::from_cells(
                        column.name(),
                        column.column_type(),
                        vec![Cell::Missing; row_start],
                    );
                    table.push_column(filler)?;
                }
            }
            table.append_rows(&mapped);
            Ok(MergeOutcome {
                table: optimize::optimize(table),
                row_start,
                rows_added,
            })
        }
    }
}

/// Remove the rows contributed by one upload and shift later records'
/// offsets down. The record itself is dropped from the ledger.
pub fn remove_upload(
    table: &mut Table,
    ledger: &mut Vec<UploadRecord>,
    upload_id: Uuid,
) -> Result<usize> {
    let position = ledger
        .iter()
        .position(|record| record.id == upload_id)
        .ok_or_else(|| EngineError::not_found(format!("upload '{upload_id}'")))?;
    let record = ledger.remove(position);
    let removable = record.rows.min(table.n_rows().saturating_sub(record.row_start));
    table.remove_rows(record.row_start, removable);
    for later in ledger.iter_mut() {
        if later.row_start > record.row_start {
            later.row_start -= removable;
        }
    }
    Ok(removable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, ColumnType};

    fn table(rows: &[(&str, i64)]) -> Table {
        Table::new(vec![
            Column::from_cells(
                "Region",
                ColumnType::Text,
                rows.iter().map(|(r, _)| Cell::Text(r.to_string())).collect(),
            ),
            Column::from_cells(
                "Amount",
                ColumnType::Integer,
                rows.iter().map(|(_, a)| Cell::Integer(*a)).collect(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn direct_merge_appends_and_reports_range() {
        let canonical = table(&[("East", 100), ("West", 50)]);
        let incoming = table(&[("East", 200)]);
        let outcome = merge(Some(canonical), incoming).unwrap();
        assert_eq!(outcome.row_start, 2);
        assert_eq!(outcome.rows_added, 1);
        assert_eq!(outcome.table.n_rows(), 3);
    }

    #[test]
    fn schema_mismatch_names_the_differing_columns() {
        let canonical = table(&[("East", 100)]);
        let incoming = Table::new(vec![Column::from_cells(
            "Region",
            ColumnType::Text,
            vec![Cell::Text("East".into())],
        )])
        .unwrap();
        let err = merge(Some(canonical), incoming).unwrap_err();
        match err {
            EngineError::SchemaMismatch { missing, unexpected } => {
                assert_eq!(missing, vec!["Amount".to_string()]);
                assert!(unexpected.is_empty());
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn mapped_merge_renames_and_extends_schema() {
        let canonical = table(&[("East", 100)]);
        let incoming = Table::new(vec![
            Column::from_cells("Zone", ColumnType::Text, vec![Cell::Text("North".into())]),
            Column::from_cells("Qty", ColumnType::Integer, vec![Cell::Integer(7)]),
        ])
        .unwrap();
        let mapping = ColumnMapping::new(vec![
            ("Zone".into(), "Region".into()),
            ("Qty".into(), "Quantity".into()),
        ]);
        let outcome = merge_mapped(Some(canonical), &incoming, &mapping).unwrap();
        assert_eq!(outcome.table.n_rows(), 2);
        let names = outcome.table.column_names();
        assert!(names.contains(&"Quantity".to_string()));
        // The pre-existing row has no Quantity value.
        assert!(outcome.table.column("Quantity").unwrap().is_missing(0));
        // The mapped upload provided no Amount value.
        assert!(outcome.table.column("Amount").unwrap().is_missing(1));
    }

    #[test]
    fn remove_upload_shifts_later_ranges() {
        let mut t = table(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let first = UploadRecord {
            id: Uuid::now_v7(),
            original_name: "one.csv".into(),
            uploaded_at: "2026-01-01 00:00:00".into(),
            rows: 2,
            row_start: 0,
            mapped: false,
        };
        let second = UploadRecord {
            id: Uuid::now_v7(),
            original_name: "two.csv".into(),
            uploaded_at: "2026-01-02 00:00:00".into(),
            rows: 2,
            row_start: 2,
            mapped: false,
        };
        let mut ledger = vec![first.clone(), second.clone()];
        let removed = remove_upload(&mut t, &mut ledger, first.id).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(t.n_rows(), 2);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].row_start, 0);
        assert_eq!(t.column("Region").unwrap().cell(0), Cell::Text("c".into()));
    }

    #[test]
    fn remove_unknown_upload_is_not_found() {
        let mut t = table(&[("a", 1)]);
        let mut ledger = Vec::new();
        let err = remove_upload(&mut t, &mut ledger, Uuid::now_v7()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
