//! Engine facade: wires the project store, the dataset cache, and the
//! derived-export cache together and enforces the mutation ordering the
//! cache contract requires (persist to disk, then invalidate, then
//! return).

use std::{collections::BTreeMap, path::Path, sync::Arc};

use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    analytics::{
        self, Aggregation, GroupedComparison, Period, PeriodComparison, TrendRequest,
        TrendSeries, ValueCount,
    },
    audit::{self, AuditReport},
    cache::DatasetCache,
    consolidate::{self, ColumnMapping},
    data::Cell,
    error::{EngineError, Result},
    export::{self, ExportCache},
    reader::{self, TableFormat},
    store::{AuditEntry, ProjectSettings, ProjectStore, UploadRecord, now_stamp},
    table::Table,
    writer::{self, Sheet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub project: String,
    pub total_records: usize,
    pub date_column: String,
    pub top_data: BTreeMap<String, Vec<ValueCount>>,
}

pub struct Engine {
    store: ProjectStore,
    cache: DatasetCache,
    exports: ExportCache,
}

impl Engine {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let store = ProjectStore::new(root.as_ref())?;
        let cache = DatasetCache::new(store.clone());
        Ok(Engine {
            store,
            cache,
            exports: ExportCache::new(),
        })
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    // ── Projects ────────────────────────────────────────────────────

    pub fn create_project(&self, project: &str) -> Result<()> {
        self.store.create_project(project)?;
        self.store
            .append_audit(project, "PROJECT_CREATED", format!("Project \"{project}\" created"));
        info!("created project '{project}'");
        Ok(())
    }

    pub fn delete_project(&self, project: &str) -> Result<()> {
        self.store.delete_project(project)?;
        self.exports.invalidate_project(project);
        self.cache.invalidate(project);
        info!("deleted project '{project}'");
        Ok(())
    }

    pub fn list_projects(&self) -> Result<Vec<String>> {
        self.store.list_projects()
    }

    // ── Settings ────────────────────────────────────────────────────

    pub fn settings(&self, project: &str) -> Result<ProjectSettings> {
        self.store.ensure_project(project)?;
        self.store.load_settings(project)
    }

    /// The designated date column drives cache-load normalization, so a
    /// settings change invalidates the cached snapshot too.
    pub fn update_settings(&self, project: &str, settings: &ProjectSettings) -> Result<()> {
        self.store.ensure_project(project)?;
        self.store.save_settings(project, settings)?;
        self.store
            .append_audit(project, "SETTINGS_UPDATED", "Settings saved");
        self.exports.invalidate_project(project);
        self.cache.invalidate(project);
        Ok(())
    }

    // ── Consolidation ───────────────────────────────────────────────

    /// Merge an already-parsed table into the project's canonical
    /// dataset. Disk is written before the cache entry is dropped, so a
    /// read that begins after this returns observes the new data.
    pub fn consolidate(
        &self,
        project: &str,
        table: Table,
        mapping: Option<&ColumnMapping>,
        original_name: &str,
    ) -> Result<UploadRecord> {
        self.store.ensure_project(project)?;
        let canonical = self.store.load_table(project)?;
        let outcome = match mapping {
            Some(mapping) if !mapping.is_empty() => {
                consolidate::merge_mapped(canonical, &table, mapping)?
            }
            _ => consolidate::merge(canonical, table)?,
        };

        let record = UploadRecord {
            id: Uuid::now_v7(),
            original_name: original_name.to_string(),
            uploaded_at: now_stamp(),
            rows: outcome.rows_added,
            row_start: outcome.row_start,
            mapped: mapping.is_some_and(|m| !m.is_empty()),
        };

        self.store.save_table(project, &outcome.table)?;
        let mut ledger = self.store.load_ledger(project)?;
        ledger.push(record.clone());
        self.store.save_ledger(project, &ledger)?;
        self.store.append_audit(
            project,
            "FILES_UPLOADED",
            format!("\"{original_name}\", {} rows added", record.rows),
        );
        self.exports.invalidate_project(project);
        self.cache.invalidate(project);
        info!(
            "consolidated '{original_name}' into '{project}': +{} rows (total {})",
            record.rows,
            outcome.table.n_rows()
        );
        Ok(record)
    }

    /// Read a file from disk and consolidate it; the format comes from
    /// the file extension.
    pub fn upload_file(
        &self,
        project: &str,
        path: &Path,
        mapping: Option<&ColumnMapping>,
    ) -> Result<UploadRecord> {
        self.upload_file_with(project, path, mapping, None)
    }

    /// [`Engine::upload_file`] with an explicit CSV input encoding.
    pub fn upload_file_with(
        &self,
        project: &str,
        path: &Path,
        mapping: Option<&ColumnMapping>,
        encoding: Option<&'static encoding_rs::Encoding>,
    ) -> Result<UploadRecord> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let format = TableFormat::from_name(&name).ok_or_else(|| EngineError::Format {
            file: name.clone(),
            format: "xlsx/xls/csv".to_string(),
            reason: "unsupported file extension".to_string(),
        })?;
        let bytes = std::fs::read(path)
            .map_err(|e| EngineError::storage(format!("reading upload {path:?}"), e))?;
        let table = reader::read_table_with_encoding(&bytes, format, &name, encoding)?;
        self.consolidate(project, table, mapping, &name)
    }

    /// Remove one upload's rows by provenance. A missing canonical file
    /// is not an error: the ledger entry is still dropped and zero rows
    /// are reported.
    pub fn undo_upload(&self, project: &str, upload_id: Uuid) -> Result<usize> {
        self.store.ensure_project(project)?;
        let mut ledger = self.store.load_ledger(project)?;

        let removed = match self.store.load_table(project)? {
            Some(mut table) => {
                let removed = consolidate::remove_upload(&mut table, &mut ledger, upload_id)?;
                if table.n_rows() > 0 {
                    self.store.save_table(project, &table)?;
                } else {
                    self.store.delete_table(project)?;
                }
                removed
            }
            None => {
                let position = ledger
                    .iter()
                    .position(|record| record.id == upload_id)
                    .ok_or_else(|| {
                        EngineError::not_found(format!("upload '{upload_id}'"))
                    })?;
                ledger.remove(position);
                0
            }
        };

        self.store.save_ledger(project, &ledger)?;
        self.store.append_audit(
            project,
            "UPLOAD_DELETED",
            format!("Upload {upload_id} removed, {removed} rows removed"),
        );
        self.exports.invalidate_project(project);
        self.cache.invalidate(project);
        Ok(removed)
    }

    /// Delete the canonical table and the whole upload ledger.
    pub fn reset(&self, project: &str) -> Result<()> {
        self.store.ensure_project(project)?;
        if !self.store.table_exists(project) {
            return Err(EngineError::not_found(format!(
                "consolidated data for project '{project}'"
            )));
        }
        self.store.delete_table(project)?;
        self.store.delete_ledger(project)?;
        self.store
            .append_audit(project, "DATA_RESET", "All data reset");
        self.exports.invalidate_project(project);
        self.cache.invalidate(project);
        info!("reset project '{project}'");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn table(&self, project: &str) -> Result<Arc<Table>> {
        self.store.ensure_project(project)?;
        self.cache.get(project)
    }

    pub fn uploads(&self, project: &str) -> Result<Vec<UploadRecord>> {
        self.store.ensure_project(project)?;
        self.store.load_ledger(project)
    }

    pub fn audit_trail(&self, project: &str) -> Result<Vec<AuditEntry>> {
        self.store.ensure_project(project)?;
        self.store.read_audit(project)
    }

    pub fn run_audit_checks(&self, project: &str) -> Result<AuditReport> {
        let table = self.table(project)?;
        let settings = self.settings(project)?;
        Ok(audit::run_all_checks(&table, &settings))
    }

    pub fn cache_stats(&self) -> BTreeMap<String, usize> {
        self.cache.stats()
    }

    // ── Analytics pass-throughs ─────────────────────────────────────

    fn date_column(&self, project: &str) -> Result<String> {
        let settings = self.settings(project)?;
        if settings.date_column.is_empty() {
            return Err(EngineError::missing_data(format!(
                "project '{project}' has no designated date column"
            )));
        }
        Ok(settings.date_column)
    }

    pub fn date_range(&self, project: &str) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let table = self.table(project)?;
        let date_column = self.date_column(project)?;
        analytics::date_range(&table, &date_column)
    }

    /// Top-10 breakdowns for every configured dashboard column, with an
    /// optional date filter.
    pub fn dashboard(&self, project: &str, period: Option<Period>) -> Result<DashboardStats> {
        let table = self.table(project)?;
        let settings = self.settings(project)?;
        let mask = match period {
            Some(period) => {
                if settings.date_column.is_empty() {
                    return Err(EngineError::missing_data(format!(
                        "project '{project}' has no designated date column"
                    )));
                }
                Some(analytics::date_mask(&table, &settings.date_column, period)?)
            }
            None => None,
        };
        let total_records = mask.as_ref().map(|m| m.len()).unwrap_or(table.n_rows());

        let mut top_data = BTreeMap::new();
        for top_column in &settings.top_columns {
            if table.column(&top_column.column).is_none() {
                continue;
            }
            let counts = analytics::top_n(&table, &top_column.column, 10, mask.as_deref())?;
            top_data.insert(top_column.column.clone(), counts);
        }
        Ok(DashboardStats {
            project: project.to_string(),
            total_records,
            date_column: settings.date_column,
            top_data,
        })
    }

    pub fn top_n(
        &self,
        project: &str,
        column: &str,
        n: usize,
        period: Option<Period>,
    ) -> Result<Vec<ValueCount>> {
        let table = self.table(project)?;
        let mask = match period {
            Some(period) => {
                let date_column = self.date_column(project)?;
                Some(analytics::date_mask(&table, &date_column, period)?)
            }
            None => None,
        };
        analytics::top_n(&table, column, n, mask.as_deref())
    }

    pub fn trend(&self, project: &str, request: &TrendRequest) -> Result<TrendSeries> {
        let table = self.table(project)?;
        let date_column = self.date_column(project)?;
        analytics::trend_series(&table, &date_column, request)
    }

    pub fn compare(
        &self,
        project: &str,
        column: &str,
        period1: Period,
        period2: Period,
    ) -> Result<PeriodComparison> {
        let table = self.table(project)?;
        let date_column = self.date_column(project)?;
        analytics::compare_values(&table, column, &date_column, period1, period2)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compare_grouped(
        &self,
        project: &str,
        group_column: &str,
        value_column: &str,
        aggregation: Aggregation,
        period1: Period,
        period2: Period,
    ) -> Result<GroupedComparison> {
        let table = self.table(project)?;
        let date_column = self.date_column(project)?;
        analytics::compare_grouped(
            &table,
            group_column,
            value_column,
            aggregation,
            &date_column,
            period1,
            period2,
        )
    }

    pub fn column_stats(&self, project: &str) -> Result<Vec<analytics::ColumnProfile>> {
        let table = self.table(project)?;
        Ok(analytics::column_stats(&table))
    }

    // ── Exports ─────────────────────────────────────────────────────

    /// Ledger state folded into every export key: any mutation changes
    /// the upload ids, so stale bytes can never be served.
    fn export_key(&self, project: &str, params: &[String]) -> Result<String> {
        let ledger = self.store.load_ledger(project)?;
        let settings = self.store.load_settings(project)?;
        let mut parts: Vec<String> = ledger.iter().map(|r| r.id.to_string()).collect();
        parts.push(settings.date_column);
        parts.extend_from_slice(params);
        Ok(export::fingerprint(parts))
    }

    pub fn export_consolidated(
        &self,
        project: &str,
        format: ExportFormat,
        period: Option<Period>,
    ) -> Result<Arc<Vec<u8>>> {
        let params = vec![
            "consolidated".to_string(),
            format.as_str().to_string(),
            format!("{period:?}"),
        ];
        let key = self.export_key(project, &params)?;
        let table = self.table(project)?;
        let date_column = self.settings(project)?.date_column;
        self.exports.get_or_build(project, &key, || {
            let filtered;
            let source: &Table = match period {
                Some(period) => {
                    let mask = analytics::date_mask(&table, &date_column, period)?;
                    filtered = table.take_rows(&mask);
                    &filtered
                }
                None => &table,
            };
            match format {
                ExportFormat::Csv => writer::write_csv(source),
                ExportFormat::Xlsx => {
                    writer::write_workbook(&[Sheet::from_table("Data", source)])
                }
            }
        })
    }

    /// Trend workbook: Summary + Trend Data (+ Movement Data when a
    /// baseline month is set).
    pub fn export_trend(&self, project: &str, request: &TrendRequest) -> Result<Arc<Vec<u8>>> {
        let params = vec![format!("trend:{request:?}")];
        let key = self.export_key(project, &params)?;
        let trend = self.trend(project, request)?;
        let value_label = match (&request.value_column, request.aggregation) {
            (_, Aggregation::Count) => "(Row Count)".to_string(),
            (Some(column), _) => column.clone(),
            (None, _) => "(Row Count)".to_string(),
        };
        self.exports.get_or_build(project, &key, || {
            let mut summary = Sheet::new(
                "Summary",
                vec!["Field".to_string(), "Value".to_string()],
            );
            let mut push = |field: &str, value: Cell| {
                summary.push_row(vec![Cell::Text(field.to_string()), value]);
            };
            push("Project", Cell::Text(project.to_string()));
            push("Group Column", Cell::Text(request.group_column.clone()));
            push("Value Column", Cell::Text(value_label.clone()));
            push(
                "Aggregation",
                Cell::Text(request.aggregation.as_str().to_uppercase()),
            );
            push("Groups", Cell::Integer(trend.groups.len() as i64));
            push("Months", Cell::Integer(trend.months.len() as i64));
            if let Some(movement) = &trend.movement {
                push("Baseline Month", Cell::Text(movement.baseline_month.clone()));
            }

            let mut headers = vec!["Month".to_string()];
            headers.extend(trend.groups.iter().cloned());
            let mut trend_sheet = Sheet::new("Trend Data", headers.clone());
            for (month_idx, month) in trend.months.iter().enumerate() {
                let mut row = vec![Cell::Text(month.clone())];
                for group in &trend.groups {
                    row.push(Cell::Float(trend.series[group][month_idx]));
                }
                trend_sheet.push_row(row);
            }

            let mut sheets = vec![summary, trend_sheet];
            if let Some(movement) = &trend.movement {
                let mut movement_sheet = Sheet::new("Movement Data", headers);
                for (month_idx, month) in trend.months.iter().enumerate() {
                    let mut row = vec![Cell::Text(month.clone())];
                    for group in &trend.groups {
                        let value = movement
                            .series
                            .get(group)
                            .map(|values| Cell::Float(values[month_idx]))
                            .unwrap_or(Cell::Missing);
                        row.push(value);
                    }
                    movement_sheet.push_row(row);
                }
                sheets.push(movement_sheet);
            }
            writer::write_workbook(&sheets)
        })
    }

    /// Comparison workbook: Summary + Comparison + the raw rows from
    /// both periods.
    pub fn export_comparison(
        &self,
        project: &str,
        column: &str,
        period1: Period,
        period2: Period,
    ) -> Result<Arc<Vec<u8>>> {
        let params = vec![format!("compare:{column}:{period1:?}:{period2:?}")];
        let key = self.export_key(project, &params)?;
        let comparison = self.compare(project, column, period1, period2)?;
        let table = self.table(project)?;
        let date_column = self.date_column(project)?;
        self.exports.get_or_build(project, &key, || {
            let p1_label = period_label("Period 1", period1);
            let p2_label = period_label("Period 2", period2);

            let mut summary = Sheet::new(
                "Summary",
                vec!["Metric".to_string(), "Value".to_string()],
            );
            summary.push_row(vec![
                Cell::Text("Period 1 Total Records".into()),
                Cell::Integer(comparison.period1_total as i64),
            ]);
            summary.push_row(vec![
                Cell::Text("Period 2 Total Records".into()),
                Cell::Integer(comparison.period2_total as i64),
            ]);
            summary.push_row(vec![
                Cell::Text("Column Compared".into()),
                Cell::Text(column.to_string()),
            ]);

            let mut sheet = Sheet::new(
                "Comparison",
                vec![
                    "Value".to_string(),
                    p1_label.clone(),
                    p2_label.clone(),
                    "Change %".to_string(),
                ],
            );
            for row in &comparison.rows {
                sheet.push_row(vec![
                    Cell::Text(row.value.clone()),
                    Cell::Integer(row.count1 as i64),
                    Cell::Integer(row.count2 as i64),
                    change_cell(row.change),
                ]);
            }

            let data = period_rows_sheet(&table, &date_column, &[
                (p1_label, period1),
                (p2_label, period2),
            ])?;
            writer::write_workbook(&[summary, sheet, data])
        })
    }

    pub fn export_grouped_comparison(
        &self,
        project: &str,
        group_column: &str,
        value_column: &str,
        aggregation: Aggregation,
        period1: Period,
        period2: Period,
    ) -> Result<Arc<Vec<u8>>> {
        let params = vec![format!(
            "advanced:{group_column}:{value_column}:{aggregation}:{period1:?}:{period2:?}"
        )];
        let key = self.export_key(project, &params)?;
        let comparison = self.compare_grouped(
            project,
            group_column,
            value_column,
            aggregation,
            period1,
            period2,
        )?;
        let table = self.table(project)?;
        let date_column = self.date_column(project)?;
        self.exports.get_or_build(project, &key, || {
            let p1_label = period_label("Period 1", period1);
            let p2_label = period_label("Period 2", period2);

            let mut summary = Sheet::new(
                "Summary",
                vec!["Metric".to_string(), "Value".to_string()],
            );
            let rows = [
                ("Group Column", group_column.to_string()),
                ("Value Column", value_column.to_string()),
                ("Aggregation Method", aggregation.as_str().to_uppercase()),
                ("Period 1", period_span(period1)),
                ("Period 1 Rows", comparison.period1_rows.to_string()),
                ("Period 2", period_span(period2)),
                ("Period 2 Rows", comparison.period2_rows.to_string()),
            ];
            for (metric, value) in rows {
                summary.push_row(vec![Cell::Text(metric.to_string()), Cell::Text(value)]);
            }

            let mut sheet = Sheet::new(
                "Comparison",
                vec![
                    group_column.to_string(),
                    p1_label.clone(),
                    p2_label.clone(),
                    "Change %".to_string(),
                ],
            );
            for row in &comparison.rows {
                sheet.push_row(vec![
                    Cell::Text(row.group.clone()),
                    Cell::Float(row.value1),
                    Cell::Float(row.value2),
                    change_cell(row.change),
                ]);
            }

            let data = period_rows_sheet(&table, &date_column, &[
                (p1_label, period1),
                (p2_label, period2),
            ])?;
            writer::write_workbook(&[summary, sheet, data])
        })
    }

    /// Column-analysis workbook.
    pub fn export_column_stats(&self, project: &str) -> Result<Arc<Vec<u8>>> {
        let params = vec!["column-stats".to_string()];
        let key = self.export_key(project, &params)?;
        let table = self.table(project)?;
        let profiles = analytics::column_stats(&table);
        self.exports.get_or_build(project, &key, || {
            let mut analysis = Sheet::new(
                "Column Analysis",
                vec![
                    "Column".to_string(),
                    "Type".to_string(),
                    "Filled %".to_string(),
                    "Unique Values".to_string(),
                    "Duplicates".to_string(),
                    "Sample Values".to_string(),
                ],
            );
            for profile in &profiles {
                analysis.push_row(vec![
                    Cell::Text(profile.name.clone()),
                    Cell::Text(profile.dtype.clone()),
                    Cell::Float(profile.fill_pct),
                    Cell::Integer(profile.distinct as i64),
                    Cell::Text(if profile.has_duplicates { "Yes" } else { "No" }.to_string()),
                    Cell::Text(profile.samples.join(", ")),
                ]);
            }
            let mut summary = Sheet::new(
                "Summary",
                vec!["Metric".to_string(), "Value".to_string()],
            );
            summary.push_row(vec![
                Cell::Text("Project".into()),
                Cell::Text(project.to_string()),
            ]);
            summary.push_row(vec![
                Cell::Text("Total Rows".into()),
                Cell::Integer(table.n_rows() as i64),
            ]);
            summary.push_row(vec![
                Cell::Text("Total Columns".into()),
                Cell::Integer(table.n_cols() as i64),
            ]);
            writer::write_workbook(&[analysis, summary])
        })
    }

    /// Rows behind the top-10 values of one column, ranked, plus a
    /// summary of the ranking itself.
    pub fn export_top_rows(
        &self,
        project: &str,
        column: &str,
        display_name: &str,
        period: Option<Period>,
    ) -> Result<Arc<Vec<u8>>> {
        let params = vec![format!("top10:{column}:{period:?}")];
        let key = self.export_key(project, &params)?;
        let table = self.table(project)?;
        let mask = match period {
            Some(period) => {
                let date_column = self.date_column(project)?;
                Some(analytics::date_mask(&table, &date_column, period)?)
            }
            None => None,
        };
        let top = analytics::top_n(&table, column, 10, mask.as_deref())?;
        self.exports.get_or_build(project, &key, || {
            let mut summary = Sheet::new(
                "Summary",
                vec![
                    "Rank".to_string(),
                    display_name.to_string(),
                    "Count".to_string(),
                ],
            );
            for (rank, entry) in top.iter().enumerate() {
                summary.push_row(vec![
                    Cell::Integer(rank as i64 + 1),
                    Cell::Text(entry.value.clone()),
                    Cell::Integer(entry.count as i64),
                ]);
            }

            let target = table.require_column(column)?;
            let rank_of = |row: usize| -> Option<usize> {
                let value = target.display_value(row)?;
                top.iter().position(|entry| entry.value == value)
            };
            let candidate_rows: Vec<usize> = match &mask {
                Some(mask) => mask.clone(),
                None => (0..table.n_rows()).collect(),
            };
            let mut ranked_rows: Vec<(usize, usize)> = candidate_rows
                .into_iter()
                .filter_map(|row| rank_of(row).map(|rank| (rank, row)))
                .collect();
            ranked_rows.sort();

            let mut headers = vec!["Rank".to_string()];
            headers.extend(table.column_names());
            let mut data = Sheet::new("Data", headers);
            for (rank, row) in ranked_rows {
                let mut cells = vec![Cell::Integer(rank as i64 + 1)];
                cells.extend(table.row_cells(row));
                data.push_row(cells);
            }
            writer::write_workbook(&[summary, data])
        })
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

fn period_span(period: Period) -> String {
    format!("{} to {}", fmt_date(period.start), fmt_date(period.end))
}

fn period_label(prefix: &str, period: Period) -> String {
    format!("{prefix} ({})", period_span(period))
}

fn change_cell(change: analytics::Change) -> Cell {
    match change {
        analytics::Change::New => Cell::Text("new".to_string()),
        analytics::Change::Pct(pct) => Cell::Float(pct),
    }
}

/// "Data" sheet holding every raw row from the given periods, each row
/// prefixed with its period label.
fn period_rows_sheet(
    table: &Table,
    date_column: &str,
    periods: &[(String, Period)],
) -> Result<Sheet> {
    let mut headers = vec!["Period".to_string()];
    headers.extend(table.column_names());
    let mut sheet = Sheet::new("Data", headers);
    for (label, period) in periods {
        let mask = analytics::date_mask(table, date_column, *period)?;
        for row in mask {
            let mut cells = vec![Cell::Text(label.clone())];
            cells.extend(table.row_cells(row));
            sheet.push_row(cells);
        }
    }
    Ok(sheet)
}
