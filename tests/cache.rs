mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{sales_project, write_file};
use consolidata::cache::DatasetCache;
use consolidata::error::EngineError;

#[test]
fn reads_after_a_mutation_see_the_new_data_without_force_reload() {
    let (dir, engine) = sales_project("fleet");
    let before = engine.cache().get("fleet").unwrap().n_rows();

    let more = write_file(
        &dir,
        "more.csv",
        "Date,Region,Amount\n2024-03-01,North,1\n2024-03-02,North,2\n2024-03-03,North,3\n",
    );
    engine.upload_file("fleet", &more, None).unwrap();

    assert_eq!(engine.cache().get("fleet").unwrap().n_rows(), before + 3);
}

#[test]
fn fresh_entries_are_shared_snapshots() {
    let (_dir, engine) = sales_project("fleet");
    let first = engine.cache().get("fleet").unwrap();
    let second = engine.cache().get("fleet").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn force_reload_replaces_the_snapshot() {
    let (_dir, engine) = sales_project("fleet");
    let first = engine.cache().get("fleet").unwrap();
    let reloaded = engine.cache().get_with("fleet", true).unwrap();
    assert!(!Arc::ptr_eq(&first, &reloaded));
    assert_eq!(first.n_rows(), reloaded.n_rows());
}

#[test]
fn expired_entries_reload_from_disk() {
    let (_dir, engine) = sales_project("fleet");
    let cache = DatasetCache::with_ttl(engine.store().clone(), Duration::ZERO);
    let first = cache.get("fleet").unwrap();
    let second = cache.get("fleet").unwrap();
    // Zero TTL means every read is a reload.
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn date_column_is_normalized_on_load() {
    let (_dir, engine) = sales_project("fleet");
    let table = engine.cache().get("fleet").unwrap();
    let date = table.column("Date").unwrap();
    assert_eq!(
        date.column_type(),
        consolidata::data::ColumnType::Date
    );
    assert!(date.date(0).is_some());
}

#[test]
fn invalidate_is_safe_without_an_entry() {
    let (_dir, engine) = sales_project("fleet");
    engine.cache().invalidate("fleet");
    engine.cache().invalidate("never-cached");
}

#[test]
fn stats_report_per_project_byte_sizes() {
    let (_dir, engine) = sales_project("fleet");
    assert!(engine.cache_stats().is_empty());

    let table = engine.cache().get("fleet").unwrap();
    let stats = engine.cache_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats["fleet"], table.approx_byte_size());
    assert!(stats["fleet"] > 0);
}

#[test]
fn missing_project_data_is_not_found_not_empty() {
    let (_dir, engine) = sales_project("fleet");
    engine.create_project("hollow").unwrap();
    assert!(matches!(
        engine.cache().get("hollow").unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[test]
fn callers_transform_projected_copies_not_the_cached_table() {
    let (_dir, engine) = sales_project("fleet");
    let snapshot = engine.cache().get("fleet").unwrap();

    // A caller that wants to transform a column works on a narrow copy.
    let mut copy = snapshot.project(&["Amount"]).unwrap();
    copy.columns_mut()[0].rename("Adjusted");
    copy.remove_rows(0, 2);

    // The shared snapshot and the next cached read are untouched.
    assert_eq!(snapshot.n_rows(), 3);
    let again = engine.cache().get("fleet").unwrap();
    assert!(again.column("Amount").is_some());
    assert!(again.column("Adjusted").is_none());
    assert_eq!(again.n_rows(), 3);
}

#[test]
fn undo_invalidates_the_cached_snapshot() {
    let (dir, engine) = sales_project("fleet");
    let more = write_file(&dir, "more.csv", "Date,Region,Amount\n2024-03-01,North,1\n");
    let record = engine.upload_file("fleet", &more, None).unwrap();
    assert_eq!(engine.cache().get("fleet").unwrap().n_rows(), 4);

    engine.undo_upload("fleet", record.id).unwrap();
    assert_eq!(engine.cache().get("fleet").unwrap().n_rows(), 3);
}
