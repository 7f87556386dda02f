mod common;

use common::{SALES_CSV, engine, sales_project, write_file};
use consolidata::error::EngineError;
use uuid::Uuid;

#[test]
fn first_upload_becomes_canonical_table() {
    let (_dir, engine) = sales_project("fleet");
    let table = engine.table("fleet").unwrap();
    assert_eq!(table.n_rows(), 3);
    assert_eq!(table.column_names(), vec!["Date", "Region", "Amount"]);

    let uploads = engine.uploads("fleet").unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].rows, 3);
    assert_eq!(uploads[0].row_start, 0);
}

#[test]
fn identical_schema_merge_appends_rows_and_one_record() {
    let (dir, engine) = sales_project("fleet");
    let more = write_file(
        &dir,
        "more.csv",
        "Date,Region,Amount\n2024-03-01,North,75\n2024-03-02,East,25\n",
    );
    let record = engine.upload_file("fleet", &more, None).unwrap();
    assert_eq!(record.rows, 2);
    assert_eq!(record.row_start, 3);

    let table = engine.table("fleet").unwrap();
    assert_eq!(table.n_rows(), 5);
    assert_eq!(engine.uploads("fleet").unwrap().len(), 2);
}

#[test]
fn column_order_does_not_matter_for_direct_merge() {
    let (dir, engine) = sales_project("fleet");
    let reordered = write_file(
        &dir,
        "reordered.csv",
        "Amount,Date,Region\n10,2024-03-05,South\n",
    );
    engine.upload_file("fleet", &reordered, None).unwrap();
    let table = engine.table("fleet").unwrap();
    assert_eq!(table.n_rows(), 4);
    assert_eq!(
        table.column("Region").unwrap().group_key(3),
        "South".to_string()
    );
}

#[test]
fn extra_column_raises_schema_mismatch_naming_it() {
    let (dir, engine) = sales_project("fleet");
    let extra = write_file(
        &dir,
        "extra.csv",
        "Date,Region,Amount,Channel\n2024-03-01,East,10,Web\n",
    );
    let err = engine.upload_file("fleet", &extra, None).unwrap_err();
    match err {
        EngineError::SchemaMismatch { missing, unexpected } => {
            assert!(missing.is_empty());
            assert_eq!(unexpected, vec!["Channel".to_string()]);
        }
        other => panic!("expected SchemaMismatch, got {other:?}"),
    }
    // Nothing persisted on failure.
    assert_eq!(engine.table("fleet").unwrap().n_rows(), 3);
    assert_eq!(engine.uploads("fleet").unwrap().len(), 1);
}

#[test]
fn mapped_upload_renames_and_adds_columns() {
    let (dir, engine) = sales_project("fleet");
    let mapped = write_file(
        &dir,
        "mapped.csv",
        "Day,Zone,Value,Ignored\n2024-03-01,North,42,x\n",
    );
    let mapping = consolidata::consolidate::ColumnMapping::parse_pairs(&[
        "Day=Date".to_string(),
        "Zone=Region".to_string(),
        "Value=Amount".to_string(),
    ])
    .unwrap();
    let record = engine.upload_file("fleet", &mapped, Some(&mapping)).unwrap();
    assert!(record.mapped);

    let table = engine.table("fleet").unwrap();
    assert_eq!(table.n_rows(), 4);
    // The unmapped incoming column is dropped.
    assert!(table.column("Ignored").is_none());
    assert_eq!(table.column("Amount").unwrap().numeric(3), Some(42.0));
}

#[test]
fn undo_restores_previous_row_count() {
    let (dir, engine) = sales_project("fleet");
    let more = write_file(
        &dir,
        "more.csv",
        "Date,Region,Amount\n2024-03-01,North,75\n2024-03-02,East,25\n",
    );
    let record = engine.upload_file("fleet", &more, None).unwrap();
    assert_eq!(engine.table("fleet").unwrap().n_rows(), 5);

    let removed = engine.undo_upload("fleet", record.id).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(engine.table("fleet").unwrap().n_rows(), 3);
    assert_eq!(engine.uploads("fleet").unwrap().len(), 1);
}

#[test]
fn undoing_the_same_upload_twice_is_not_found() {
    let (dir, engine) = sales_project("fleet");
    let more = write_file(&dir, "more.csv", "Date,Region,Amount\n2024-03-01,North,75\n");
    let record = engine.upload_file("fleet", &more, None).unwrap();
    engine.undo_upload("fleet", record.id).unwrap();
    let err = engine.undo_upload("fleet", record.id).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn undo_out_of_order_shifts_later_ranges() {
    let (dir, engine) = sales_project("fleet");
    let second = write_file(&dir, "b.csv", "Date,Region,Amount\n2024-03-01,North,75\n");
    let third = write_file(&dir, "c.csv", "Date,Region,Amount\n2024-04-01,South,30\n");
    let second_record = engine.upload_file("fleet", &second, None).unwrap();
    engine.upload_file("fleet", &third, None).unwrap();
    assert_eq!(engine.table("fleet").unwrap().n_rows(), 5);

    engine.undo_upload("fleet", second_record.id).unwrap();
    let table = engine.table("fleet").unwrap();
    assert_eq!(table.n_rows(), 4);
    // The third upload's row survives and is still addressable.
    assert_eq!(table.column("Region").unwrap().group_key(3), "South");

    let uploads = engine.uploads("fleet").unwrap();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[1].row_start, 3);
}

#[test]
fn undo_with_missing_table_file_drops_ledger_entry() {
    let (_dir, engine) = engine();
    engine.create_project("empty").unwrap();
    // Hand-craft a ledger entry with no canonical table behind it.
    let orphan = consolidata::store::UploadRecord {
        id: Uuid::now_v7(),
        original_name: "ghost.csv".to_string(),
        uploaded_at: "2026-01-01 00:00:00".to_string(),
        rows: 10,
        row_start: 0,
        mapped: false,
    };
    engine
        .store()
        .save_ledger("empty", std::slice::from_ref(&orphan))
        .unwrap();

    let removed = engine.undo_upload("empty", orphan.id).unwrap();
    assert_eq!(removed, 0);
    assert!(engine.uploads("empty").unwrap().is_empty());
}

#[test]
fn reset_clears_table_and_ledger_and_logs() {
    let (_dir, engine) = sales_project("fleet");
    engine.reset("fleet").unwrap();
    assert!(engine.uploads("fleet").unwrap().is_empty());
    assert!(matches!(
        engine.table("fleet").unwrap_err(),
        EngineError::NotFound(_)
    ));
    let actions: Vec<String> = engine
        .audit_trail("fleet")
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert!(actions.contains(&"DATA_RESET".to_string()));
}

#[test]
fn reset_on_empty_project_is_not_found() {
    let (_dir, engine) = engine();
    engine.create_project("bare").unwrap();
    assert!(matches!(
        engine.reset("bare").unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[test]
fn every_mutation_appends_an_audit_entry() {
    let (dir, engine) = sales_project("fleet");
    let more = write_file(&dir, "more.csv", "Date,Region,Amount\n2024-03-01,North,75\n");
    let record = engine.upload_file("fleet", &more, None).unwrap();
    engine.undo_upload("fleet", record.id).unwrap();
    engine.reset("fleet").unwrap();

    let actions: Vec<String> = engine
        .audit_trail("fleet")
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    for expected in [
        "PROJECT_CREATED",
        "FILES_UPLOADED",
        "UPLOAD_DELETED",
        "DATA_RESET",
    ] {
        assert!(
            actions.iter().any(|a| a == expected),
            "missing audit action {expected}, have {actions:?}"
        );
    }
}

#[test]
fn unknown_project_is_not_found() {
    let (dir, engine) = engine();
    let path = write_file(&dir, "sales.csv", SALES_CSV);
    assert!(matches!(
        engine.upload_file("nope", &path, None).unwrap_err(),
        EngineError::NotFound(_)
    ));
}
