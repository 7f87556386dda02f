//! Process-wide dataset cache.
//!
//! One entry per project id, holding an immutable `Arc<Table>` snapshot
//! and its insertion time. Entries older than the freshness window are
//! treated as absent and reloaded from persisted storage. Readers share
//! a read lock and clone the `Arc`; writers replace entries wholesale,
//! so a reader always sees either the prior table or the new one in
//! full. Callers that need to transform a column must work on a
//! projected copy ([`crate::table::Table::project`]); the cached table
//! itself is never handed out mutably.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    data::{Cell, ColumnType},
    error::{EngineError, Result},
    store::ProjectStore,
    table::{Column, Table},
};

/// Freshness window: entries older than this reload from disk.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    table: Arc<Table>,
    inserted_at: Instant,
}

/// Cache service, constructed once per process and injected wherever
/// reads happen. `get`/`invalidate`/`stats` are its whole surface.
pub struct DatasetCache {
    store: ProjectStore,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl DatasetCache {
    pub fn new(store: ProjectStore) -> Self {
        DatasetCache::with_ttl(store, CACHE_TTL)
    }

    pub fn with_ttl(store: ProjectStore, ttl: Duration) -> Self {
        DatasetCache {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, project: &str) -> Result<Arc<Table>> {
        self.get_with(project, false)
    }

    /// Return the cached snapshot, reloading from persisted storage when
    /// the entry is absent, expired, or `force_reload` is set.
    pub fn get_with(&self, project: &str, force_reload: bool) -> Result<Arc<Table>> {
        if !force_reload {
            let entries = self.entries.read().expect("cache lock poisoned");
            if let Some(entry) = entries.get(project)
                && entry.inserted_at.elapsed() < self.ttl
            {
                return Ok(Arc::clone(&entry.table));
            }
        }

        let table = self
            .store
            .load_table(project)?
            .ok_or_else(|| {
                EngineError::not_found(format!("consolidated data for project '{project}'"))
            })?;
        let settings = self.store.load_settings(project)?;
        let table = normalize_date_column(table, &settings.date_column);
        let table = Arc::new(table);

        debug!(
            "cache reload for '{project}': {} rows, {} bytes",
            table.n_rows(),
            table.approx_byte_size()
        );
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            project.to_string(),
            CacheEntry {
                table: Arc::clone(&table),
                inserted_at: Instant::now(),
            },
        );
        Ok(table)
    }

    /// Safe to call when no entry exists.
    pub fn invalidate(&self, project: &str) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.remove(project);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.clear();
    }

    /// Actual in-memory size of each cached table, in bytes.
    pub fn stats(&self) -> BTreeMap<String, usize> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries
            .iter()
            .map(|(project, entry)| (project.clone(), entry.table.approx_byte_size()))
            .collect()
    }
}

/// One-time normalization applied on every cache load: convert the
/// designated date column to the Date type. A column already of Date
/// type is left untouched, never re-parsed.
fn normalize_date_column(mut table: Table, date_column: &str) -> Table {
    if date_column.is_empty() {
        return table;
    }
    let Some(index) = table.column_index(date_column) else {
        return table;
    };
    let column = &table.columns()[index];
    if column.column_type() == ColumnType::Date {
        return table;
    }
    let cells: Vec<Cell> = (0..column.len())
        .map(|row| {
            column
                .display_value(row)
                .and_then(|raw| crate::data::parse_naive_date(&raw))
                .map(Cell::Date)
                .unwrap_or(Cell::Missing)
        })
        .collect();
    let parsed = Column::from_cells(date_column, ColumnType::Date, cells);
    table.columns_mut()[index] = parsed;
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnType;

    fn date_text_table() -> Table {
        Table::new(vec![Column::from_cells(
            "Date",
            ColumnType::Text,
            vec![
                Cell::Text("2024-01-15".into()),
                Cell::Text("garbage".into()),
                Cell::Missing,
            ],
        )])
        .unwrap()
    }

    #[test]
    fn normalization_parses_text_dates() {
        let table = normalize_date_column(date_text_table(), "Date");
        let column = table.column("Date").unwrap();
        assert_eq!(column.column_type(), ColumnType::Date);
        assert!(column.date(0).is_some());
        assert!(column.date(1).is_none());
    }

    #[test]
    fn normalization_skips_date_typed_columns() {
        let already = normalize_date_column(date_text_table(), "Date");
        let again = normalize_date_column(already.clone(), "Date");
        assert_eq!(already, again);
    }

    #[test]
    fn normalization_ignores_unknown_column() {
        let table = normalize_date_column(date_text_table(), "Nope");
        assert_eq!(table.column("Date").unwrap().column_type(), ColumnType::Text);
    }
}
