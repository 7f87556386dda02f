use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Logical type of a column. Physical storage (width, categorical
/// encoding) lives in [`crate::table::ColumnData`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
}

impl ColumnType {
    pub fn display_name(self) -> &'static str {
        match self {
            ColumnType::Text => "Text",
            ColumnType::Integer => "Integer",
            ColumnType::Float => "Decimal",
            ColumnType::Boolean => "Boolean",
            ColumnType::Date => "Date",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One table cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Cell {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Missing,
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_display(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Integer(i) => i.to_string(),
            Cell::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Cell::Boolean(b) => b.to_string(),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
            Cell::Missing => String::new(),
        }
    }

    /// Numeric coercion used by aggregations: integers and floats map
    /// directly, text is parsed when it looks numeric, everything else
    /// is treated as absent.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
            Cell::Boolean(_) | Cell::Date(_) | Cell::Missing => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d-%b-%Y",
        "%d %b %Y",
    ];
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
    }
    // Datetime-shaped inputs keep the calendar date.
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed.date());
        }
    }
    None
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Parse a raw field into a cell of the requested type. Empty input is
/// Missing; input that does not fit the type is `None` so the caller can
/// widen the column instead of failing the whole file.
pub fn parse_typed_cell(value: &str, ty: ColumnType) -> Option<Cell> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Some(Cell::Missing);
    }
    match ty {
        ColumnType::Text => Some(Cell::Text(value.to_string())),
        ColumnType::Integer => trimmed.parse::<i64>().ok().map(Cell::Integer),
        ColumnType::Float => trimmed.parse::<f64>().ok().map(Cell::Float),
        ColumnType::Boolean => parse_boolean(trimmed).map(Cell::Boolean),
        ColumnType::Date => parse_naive_date(trimmed).map(Cell::Date),
    }
}

/// Rename duplicate headers with `.1`, `.2`, ... suffixes in order of
/// appearance so downstream consumers never see duplicate column names.
pub fn dedupe_headers<I, S>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut result = Vec::new();
    for header in headers {
        let name: String = header.into();
        match seen.get_mut(&name) {
            Some(count) => {
                *count += 1;
                result.push(format!("{name}.{count}"));
            }
            None => {
                seen.insert(name.clone(), 0);
                result.push(name);
            }
        }
    }
    result
}
