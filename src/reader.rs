//! Tabular reader: raw upload bytes plus a declared format become a
//! [`Table`].
//!
//! CSV input is decoded and parsed as a stream (the file is never
//! materialized as one string before structural parsing), with column
//! types inferred from a leading sample and widened on later conflicts.
//! Excel input goes through `calamine`; the first worksheet's first row
//! is the header row and data rows are padded or truncated to the header
//! length. Duplicate header names are suffixed `.1`, `.2`, ... in order
//! of appearance.

use std::fmt;
use std::io::Cursor;

use calamine::{Data, Reader as SpreadsheetReader, Xls, Xlsx};
use encoding_rs::Encoding;
use encoding_rs_io::DecodeReaderBytesBuilder;
use log::debug;

use crate::{
    data::{self, Cell, ColumnType, dedupe_headers},
    error::{EngineError, Result},
    table::{Column, Table},
};

/// Byte size past which CSV input is reported as streamed in chunks.
pub const LARGE_FILE_BYTES: usize = 50 * 1024 * 1024;
/// Rows sampled before committing to inferred column types.
const TYPE_SAMPLE_ROWS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Xlsx,
    Xls,
    Csv,
}

impl TableFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" => Some(TableFormat::Xlsx),
            "xls" => Some(TableFormat::Xls),
            "csv" => Some(TableFormat::Csv),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TableFormat::Xlsx => "xlsx",
            TableFormat::Xls => "xls",
            TableFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn format_error(source: &str, format: TableFormat, reason: impl fmt::Display) -> EngineError {
    EngineError::Format {
        file: source.to_string(),
        format: format.as_str().to_string(),
        reason: reason.to_string(),
    }
}

/// Resolve a user-supplied encoding label (defaults to BOM-sniffed
/// UTF-8 when absent).
pub fn resolve_encoding(label: Option<&str>) -> Result<Option<&'static Encoding>> {
    match label {
        None => Ok(None),
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .map(Some)
            .ok_or_else(|| EngineError::missing_data(format!("unknown encoding '{value}'"))),
    }
}

/// Parse uploaded bytes into a table. Header-only input yields a
/// zero-row table with the parsed schema; unreadable input is a
/// `Format` error naming the offending file.
pub fn read_table(bytes: &[u8], format: TableFormat, source_name: &str) -> Result<Table> {
    read_table_with_encoding(bytes, format, source_name, None)
}

/// Like [`read_table`], with an explicit CSV input encoding. A BOM in
/// the input still wins; Excel formats carry their own encoding.
pub fn read_table_with_encoding(
    bytes: &[u8],
    format: TableFormat,
    source_name: &str,
    encoding: Option<&'static Encoding>,
) -> Result<Table> {
    match format {
        TableFormat::Csv => read_csv(bytes, source_name, encoding),
        TableFormat::Xlsx | TableFormat::Xls => read_excel(bytes, format, source_name),
    }
}

fn read_csv(bytes: &[u8], source: &str, encoding: Option<&'static Encoding>) -> Result<Table> {
    if bytes.len() > LARGE_FILE_BYTES {
        debug!(
            "streaming large csv '{}' ({} bytes) in bounded chunks",
            source,
            bytes.len()
        );
    }
    let decoder = DecodeReaderBytesBuilder::new()
        .encoding(encoding)
        .build(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(decoder);

    let headers = reader
        .headers()
        .map_err(|e| format_error(source, TableFormat::Csv, e))?
        .clone();
    let headers = dedupe_headers(headers.iter().map(|h| h.to_string()));
    let width = headers.len();
    if width == 0 {
        return Ok(Table::empty());
    }

    let mut sample: Vec<Vec<String>> = Vec::new();
    let mut candidates = vec![TypeCandidate::new(); width];
    let mut builders: Option<Vec<CellColumn>> = None;

    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            format_error(source, TableFormat::Csv, format!("row {}: {e}", row_idx + 2))
        })?;
        let fields: Vec<String> = (0..width)
            .map(|idx| record.get(idx).unwrap_or("").to_string())
            .collect();

        match &mut builders {
            None => {
                for (idx, field) in fields.iter().enumerate() {
                    candidates[idx].observe(field);
                }
                sample.push(fields);
                if sample.len() >= TYPE_SAMPLE_ROWS {
                    builders = Some(commit_sample(&headers, &candidates, &mut sample));
                }
            }
            Some(builders) => {
                for (idx, field) in fields.iter().enumerate() {
                    builders[idx].push_raw(field);
                }
            }
        }
    }

    let builders =
        builders.unwrap_or_else(|| commit_sample(&headers, &candidates, &mut sample));
    let columns = headers
        .into_iter()
        .zip(builders)
        .map(|(name, builder)| Column::from_cells(name, builder.ty, builder.cells))
        .collect();
    Table::new(columns)
}

fn commit_sample(
    headers: &[String],
    candidates: &[TypeCandidate],
    sample: &mut Vec<Vec<String>>,
) -> Vec<CellColumn> {
    let mut builders: Vec<CellColumn> = candidates
        .iter()
        .map(|candidate| CellColumn::new(candidate.decide()))
        .collect();
    for row in sample.drain(..) {
        for (idx, field) in row.into_iter().enumerate() {
            builders[idx].push_raw(&field);
        }
    }
    let summary: Vec<String> = headers
        .iter()
        .zip(&builders)
        .map(|(name, b)| format!("{name}:{}", b.ty))
        .collect();
    debug!("inferred column types: {}", summary.join(", "));
    builders
}

/// Candidate elimination over raw sample values; the first surviving
/// type in boolean > integer > float > date order wins, text otherwise.
#[derive(Debug, Clone)]
struct TypeCandidate {
    boolean: bool,
    integer: bool,
    float: bool,
    date: bool,
    observed: usize,
}

impl TypeCandidate {
    fn new() -> Self {
        TypeCandidate {
            boolean: true,
            integer: true,
            float: true,
            date: true,
            observed: 0,
        }
    }

    fn observe(&mut self, raw: &str) {
        let value = raw.trim();
        if value.is_empty() {
            return;
        }
        self.observed += 1;
        if self.boolean && data::parse_boolean(value).is_none() {
            self.boolean = false;
        }
        if self.integer && value.parse::<i64>().is_err() {
            self.integer = false;
        }
        if self.float && value.parse::<f64>().is_err() {
            self.float = false;
        }
        if self.date && data::parse_naive_date(value).is_none() {
            self.date = false;
        }
    }

    fn decide(&self) -> ColumnType {
        if self.observed == 0 {
            ColumnType::Text
        } else if self.boolean {
            ColumnType::Boolean
        } else if self.integer {
            ColumnType::Integer
        } else if self.float {
            ColumnType::Float
        } else if self.date {
            ColumnType::Date
        } else {
            ColumnType::Text
        }
    }
}

/// Typed cell accumulator that widens itself when a post-sample value
/// contradicts the inferred type (integer to float, anything to text).
struct CellColumn {
    ty: ColumnType,
    cells: Vec<Cell>,
}

impl CellColumn {
    fn new(ty: ColumnType) -> Self {
        CellColumn {
            ty,
            cells: Vec::new(),
        }
    }

    fn push_raw(&mut self, raw: &str) {
        match data::parse_typed_cell(raw, self.ty) {
            Some(cell) => self.cells.push(cell),
            None => {
                let widened = match self.ty {
                    ColumnType::Integer if raw.trim().parse::<f64>().is_ok() => ColumnType::Float,
                    _ => ColumnType::Text,
                };
                self.convert(widened);
                let cell = data::parse_typed_cell(raw, self.ty).unwrap_or(Cell::Missing);
                self.cells.push(cell);
            }
        }
    }

    fn convert(&mut self, new_ty: ColumnType) {
        for cell in &mut self.cells {
            if cell.is_missing() {
                continue;
            }
            let replacement = match new_ty {
                ColumnType::Float => match cell {
                    Cell::Integer(i) => Cell::Float(*i as f64),
                    ref other => (**other).clone(),
                },
                ColumnType::Text => Cell::Text(cell.as_display()),
                _ => cell.clone(),
            };
            *cell = replacement;
        }
        self.ty = new_ty;
    }
}

fn read_excel(bytes: &[u8], format: TableFormat, source: &str) -> Result<Table> {
    let cursor = Cursor::new(bytes.to_vec());
    let range = match format {
        TableFormat::Xlsx => {
            let mut workbook =
                Xlsx::new(cursor).map_err(|e| format_error(source, format, e))?;
            workbook
                .worksheet_range_at(0)
                .ok_or_else(|| format_error(source, format, "workbook has no worksheets"))?
                .map_err(|e| format_error(source, format, e))?
        }
        TableFormat::Xls => {
            let mut workbook =
                Xls::new(cursor).map_err(|e| format_error(source, format, e))?;
            workbook
                .worksheet_range_at(0)
                .ok_or_else(|| format_error(source, format, "workbook has no worksheets"))?
                .map_err(|e| format_error(source, format, e))?
        }
        TableFormat::Csv => unreachable!("csv handled by read_csv"),
    };

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Table::empty());
    };
    let headers = dedupe_headers(header_row.iter().map(excel_header));
    let width = headers.len();

    let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); width];
    for row in rows {
        for idx in 0..width {
            let cell = row.get(idx).map(excel_cell).unwrap_or(Cell::Missing);
            cells[idx].push(cell);
        }
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, cells)| {
            let ty = unify_cells(&cells);
            Column::from_cells(name, ty, cells)
        })
        .collect();
    Table::new(columns)
}

fn excel_header(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        other => excel_cell(other).as_display(),
    }
}

fn excel_cell(value: &Data) -> Cell {
    match value {
        Data::Empty | Data::Error(_) => Cell::Missing,
        Data::String(s) => {
            if s.trim().is_empty() {
                Cell::Missing
            } else {
                Cell::Text(s.clone())
            }
        }
        Data::Int(i) => Cell::Integer(*i),
        Data::Float(f) => {
            // Excel stores most integers as floats; keep them integral
            // so exported values round-trip exactly.
            if f.fract() == 0.0 && f.abs() < 9.0e15 {
                Cell::Integer(*f as i64)
            } else {
                Cell::Float(*f)
            }
        }
        Data::Bool(b) => Cell::Boolean(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|ndt| Cell::Date(ndt.date()))
            .unwrap_or(Cell::Missing),
        Data::DateTimeIso(s) => data::parse_naive_date(s)
            .map(Cell::Date)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

/// Choose the narrowest logical type that holds every present cell.
fn unify_cells(cells: &[Cell]) -> ColumnType {
    let mut integer = true;
    let mut float = true;
    let mut boolean = true;
    let mut date = true;
    let mut observed = 0usize;
    for cell in cells {
        match cell {
            Cell::Missing => continue,
            Cell::Integer(_) => {
                boolean = false;
                date = false;
            }
            Cell::Float(_) => {
                integer = false;
                boolean = false;
                date = false;
            }
            Cell::Boolean(_) => {
                integer = false;
                float = false;
                date = false;
            }
            Cell::Date(_) => {
                integer = false;
                float = false;
                boolean = false;
            }
            Cell::Text(_) => {
                integer = false;
                float = false;
                boolean = false;
                date = false;
            }
        }
        observed += 1;
    }
    if observed == 0 {
        ColumnType::Text
    } else if boolean {
        ColumnType::Boolean
    } else if integer {
        ColumnType::Integer
    } else if float {
        ColumnType::Float
    } else if date {
        ColumnType::Date
    } else {
        ColumnType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_types_from_csv_sample() {
        let csv = b"Date,Region,Amount\n2024-01-15,East,100\n2024-01-20,West,50\n";
        let table = read_table(csv, TableFormat::Csv, "sample.csv").unwrap();
        assert_eq!(table.n_rows(), 2);
        let schema = table.schema();
        assert_eq!(schema[0].1, ColumnType::Date);
        assert_eq!(schema[1].1, ColumnType::Text);
        assert_eq!(schema[2].1, ColumnType::Integer);
    }

    #[test]
    fn header_only_csv_yields_zero_row_table() {
        let table = read_table(b"A,B,C\n", TableFormat::Csv, "empty.csv").unwrap();
        assert_eq!(table.n_rows(), 0);
        assert_eq!(table.column_names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn widens_integer_column_on_late_conflict() {
        let mut csv = String::from("N\n");
        csv.push_str("1\n2\n3\n");
        csv.push_str("4.5\n");
        let table = read_table(csv.as_bytes(), TableFormat::Csv, "mixed.csv").unwrap();
        assert_eq!(table.schema()[0].1, ColumnType::Float);
        assert_eq!(table.column("N").unwrap().numeric(3), Some(4.5));
    }

    #[test]
    fn duplicate_headers_are_suffixed() {
        let table = read_table(b"A,B,A\n1,2,3\n", TableFormat::Csv, "dup.csv").unwrap();
        assert_eq!(table.column_names(), vec!["A", "B", "A.1"]);
    }
}
