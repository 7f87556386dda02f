//! Tabular writer: serialize one or more named sheets into an xlsx byte
//! stream, entirely in memory.
//!
//! The workbook is built directly (a shared-string table plus worksheet
//! XML streamed row by row into a deflate ZIP container), so tens of
//! thousands of rows across ~150 columns serialize without a workbook
//! object model. Non-finite numbers are written as the empty shared
//! string; dates are written as `dd-Mon-yyyy` text.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
    data::Cell,
    error::{EngineError, Result},
    table::Table,
};

/// One named output sheet: a header row plus data rows.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Sheet {
            name: name.into(),
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn from_table(name: impl Into<String>, table: &Table) -> Self {
        let mut sheet = Sheet::new(name, table.column_names());
        for row in 0..table.n_rows() {
            sheet.push_row(table.row_cells(row));
        }
        sheet
    }

    pub fn from_table_rows(name: impl Into<String>, table: &Table, rows: &[usize]) -> Self {
        let mut sheet = Sheet::new(name, table.column_names());
        for &row in rows {
            sheet.push_row(table.row_cells(row));
        }
        sheet
    }
}

enum Rendered {
    Number(String),
    Shared(String),
}

fn render_cell(cell: &Cell) -> Rendered {
    match cell {
        Cell::Integer(i) => Rendered::Number(i.to_string()),
        Cell::Float(f) => {
            if f.is_finite() {
                Rendered::Number(f.to_string())
            } else {
                Rendered::Shared(String::new())
            }
        }
        Cell::Text(s) => Rendered::Shared(s.clone()),
        Cell::Boolean(b) => Rendered::Shared(b.to_string()),
        Cell::Date(d) => Rendered::Shared(d.format("%d-%b-%Y").to_string()),
        Cell::Missing => Rendered::Shared(String::new()),
    }
}

fn xml_escape(value: &str) -> String {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return value.to_string();
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// 0-based column index to spreadsheet letters (A, B, ... Z, AA, ...).
fn col_letter(mut idx: usize) -> String {
    let mut letters = String::new();
    loop {
        letters.insert(0, (b'A' + (idx % 26) as u8) as char);
        match (idx / 26).checked_sub(1) {
            Some(next) => idx = next,
            None => break,
        }
    }
    letters
}

/// Serialize the sheets, in order, into a complete xlsx byte buffer.
/// The returned length is exact and ready to stream.
pub fn write_workbook(sheets: &[Sheet]) -> Result<Vec<u8>> {
    // Shared string table over every sheet, sorted for a stable layout.
    let mut shared: BTreeMap<String, usize> = BTreeMap::new();
    shared.insert(String::new(), 0);
    for sheet in sheets {
        for header in &sheet.headers {
            shared.insert(header.clone(), 0);
        }
        for row in &sheet.rows {
            for cell in row {
                if let Rendered::Shared(s) = render_cell(cell) {
                    shared.insert(s, 0);
                }
            }
        }
    }
    for (index, slot) in shared.values_mut().enumerate() {
        *slot = index;
    }

    let sheet_xmls: Vec<String> = sheets
        .iter()
        .map(|sheet| sheet_xml(sheet, &shared))
        .collect();
    let sst_xml = shared_strings_xml(&shared);

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut put = |zip: &mut ZipWriter<Cursor<Vec<u8>>>, name: &str, body: &str| -> Result<()> {
        zip.start_file(name, options)
            .map_err(|e| EngineError::storage(format!("starting zip entry {name}"), e))?;
        zip.write_all(body.as_bytes())
            .map_err(|e| EngineError::storage(format!("writing zip entry {name}"), e))?;
        Ok(())
    };

    put(&mut zip, "[Content_Types].xml", &content_types_xml(sheets.len()))?;
    put(&mut zip, "_rels/.rels", RELS_XML)?;
    put(&mut zip, "xl/_rels/workbook.xml.rels", &workbook_rels_xml(sheets.len()))?;
    put(&mut zip, "xl/workbook.xml", &workbook_xml(sheets))?;
    put(&mut zip, "xl/styles.xml", STYLES_XML)?;
    put(&mut zip, "xl/sharedStrings.xml", &sst_xml)?;
    for (index, xml) in sheet_xmls.iter().enumerate() {
        put(&mut zip, &format!("xl/worksheets/sheet{}.xml", index + 1), xml)?;
    }
    let cursor = zip
        .finish()
        .map_err(|e| EngineError::storage("finishing xlsx container", e))?;
    Ok(cursor.into_inner())
}

fn sheet_xml(sheet: &Sheet, shared: &BTreeMap<String, usize>) -> String {
    let columns = sheet.headers.len();
    if columns == 0 {
        return concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
            "<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
            "<sheetData/></worksheet>"
        )
        .to_string();
    }
    let letters: Vec<String> = (0..columns).map(col_letter).collect();

    let mut xml = String::with_capacity(64 * (sheet.rows.len() + 1) * columns.max(1));
    xml.push_str(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
         <sheetData><row r=\"1\">",
    );
    for (idx, header) in sheet.headers.iter().enumerate() {
        let sst = shared[header.as_str()];
        xml.push_str(&format!("<c r=\"{}1\" t=\"s\"><v>{sst}</v></c>", letters[idx]));
    }
    xml.push_str("</row>");

    let empty = shared[""];
    for (row_idx, row) in sheet.rows.iter().enumerate() {
        let row_num = row_idx + 2;
        xml.push_str(&format!("<row r=\"{row_num}\">"));
        for col_idx in 0..columns {
            let letter = &letters[col_idx];
            match row.get(col_idx).map(render_cell) {
                Some(Rendered::Number(n)) => {
                    xml.push_str(&format!("<c r=\"{letter}{row_num}\"><v>{n}</v></c>"));
                }
                Some(Rendered::Shared(s)) => {
                    let sst = shared.get(s.as_str()).copied().unwrap_or(empty);
                    xml.push_str(&format!("<c r=\"{letter}{row_num}\" t=\"s\"><v>{sst}</v></c>"));
                }
                None => {
                    xml.push_str(&format!(
                        "<c r=\"{letter}{row_num}\" t=\"s\"><v>{empty}</v></c>"
                    ));
                }
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn shared_strings_xml(shared: &BTreeMap<String, usize>) -> String {
    let mut xml = String::with_capacity(shared.len() * 24 + 256);
    xml.push_str(&format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
         count=\"0\" uniqueCount=\"{}\">",
        shared.len()
    ));
    for value in shared.keys() {
        xml.push_str("<si><t xml:space=\"preserve\">");
        xml.push_str(&xml_escape(value));
        xml.push_str("</t></si>");
    }
    xml.push_str("</sst>");
    xml
}

fn content_types_xml(sheet_count: usize) -> String {
    let overrides: String = (1..=sheet_count)
        .map(|i| {
            format!(
                "<Override PartName=\"/xl/worksheets/sheet{i}.xml\" \
                 ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
         {overrides}\
         <Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>\
         <Override PartName=\"/xl/sharedStrings.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml\"/>\
         </Types>"
    )
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let sheet_rels: String = (1..=sheet_count)
        .map(|i| {
            format!(
                "<Relationship Id=\"rId{i}\" \
                 Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" \
                 Target=\"worksheets/sheet{i}.xml\"/>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         {sheet_rels}\
         <Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/>\
         <Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings\" Target=\"sharedStrings.xml\"/>\
         </Relationships>",
        sheet_count + 1,
        sheet_count + 2
    )
}

fn workbook_xml(sheets: &[Sheet]) -> String {
    let entries: String = sheets
        .iter()
        .enumerate()
        .map(|(idx, sheet)| {
            format!(
                "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
                xml_escape(&sheet.name),
                idx + 1,
                idx + 1
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <sheets>{entries}</sheets></workbook>"
    )
}

const RELS_XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>\
</Relationships>";

const STYLES_XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
<fonts count=\"1\"><font><sz val=\"11\"/><name val=\"Calibri\"/></font></fonts>\
<fills count=\"2\"><fill><patternFill patternType=\"none\"/></fill><fill><patternFill patternType=\"gray125\"/></fill></fills>\
<borders count=\"1\"><border><left/><right/><top/><bottom/><diagonal/></border></borders>\
<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>\
<cellXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/></cellXfs>\
</styleSheet>";

/// CSV export of a table into an in-memory buffer.
pub fn write_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(table.column_names())
        .map_err(|e| EngineError::storage("writing csv header", e))?;
    for row in 0..table.n_rows() {
        let record: Vec<String> = table
            .columns()
            .iter()
            .map(|column| column.cell(row).as_display())
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| EngineError::storage(format!("writing csv row {}", row + 1), e))?;
    }
    writer
        .into_inner()
        .map_err(|e| EngineError::storage("flushing csv buffer", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn col_letter_covers_single_and_double_letters() {
        assert_eq!(col_letter(0), "A");
        assert_eq!(col_letter(25), "Z");
        assert_eq!(col_letter(26), "AA");
        assert_eq!(col_letter(27), "AB");
        assert_eq!(col_letter(701), "ZZ");
        assert_eq!(col_letter(702), "AAA");
    }

    #[test]
    fn xml_escape_handles_markup_characters() {
        assert_eq!(xml_escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
        assert_eq!(xml_escape("plain"), "plain");
    }

    #[test]
    fn non_finite_numbers_become_blank_cells() {
        let mut sheet = Sheet::new("s", vec!["x".into()]);
        sheet.push_row(vec![Cell::Float(f64::NAN)]);
        sheet.push_row(vec![Cell::Float(f64::INFINITY)]);
        sheet.push_row(vec![Cell::Float(1.5)]);
        let bytes = write_workbook(&[sheet]).unwrap();
        assert!(!bytes.is_empty());
    }
}
