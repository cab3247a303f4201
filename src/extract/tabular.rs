//! Delimited text and OOXML workbook extraction.
//!
//! CSV/TSV go through the `csv` crate. XLSX is read straight from the zip
//! container: `xl/workbook.xml` for sheet names, `xl/sharedStrings.xml` for
//! the string table, and each `xl/worksheets/sheetN.xml` for cells.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::OnceLock;

use quick_xml::events::Event;
use regex::Regex;
use serde_json::{Map, Value};

use super::{Extractor, Sniff};
use crate::config::ExtractConfig;
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Rows used to infer column types.
const TYPE_SAMPLE_ROWS: usize = 100;
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 1_000_000;
/// Zero-based index of `XFD`, the last column a worksheet may use.
const XLSX_MAX_COLUMN: usize = 16_383;
/// Maximum decompressed bytes read from a single zip entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub struct TabularExtractor {
    preview_rows: usize,
}

impl TabularExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            preview_rows: config.max_preview_rows,
        }
    }
}

impl Extractor for TabularExtractor {
    fn name(&self) -> &str {
        "tabular"
    }

    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool {
        entry.has_extension(&["csv", "tsv", "xlsx", "xls"])
            || matches!(
                sniff.mime(),
                "text/csv" | "text/tab-separated-values" | MIME_XLSX
            )
    }

    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
        let path = entry.path.as_path();
        match entry.extension().as_str() {
            ".xlsx" => self.extract_xlsx(path),
            ".xls" => Err(ExtractionError::unsupported(
                path,
                "legacy binary .xls workbooks are not supported",
            )),
            ".tsv" => self.extract_delimited(path, b'\t', "tsv"),
            _ => self.extract_delimited(path, b',', "csv"),
        }
    }
}

/// Rows collected from one table: header, a bounded sample, and a total.
struct Table {
    columns: Vec<String>,
    sample: Vec<Vec<String>>,
    row_count: usize,
}

impl Table {
    fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            sample: Vec::new(),
            row_count: 0,
        }
    }

    fn push(&mut self, row: Vec<String>) {
        if self.sample.len() < TYPE_SAMPLE_ROWS {
            self.sample.push(row);
        }
        self.row_count += 1;
    }

    fn describe(&self, preview_rows: usize, fields: &mut Fields) {
        fields.insert("row_count".into(), Value::from(self.row_count));
        fields.insert("column_count".into(), Value::from(self.columns.len()));
        fields.insert(
            "columns".into(),
            Value::Array(self.columns.iter().cloned().map(Value::String).collect()),
        );

        let mut types = Map::new();
        for (i, column) in self.columns.iter().enumerate() {
            let values = self
                .sample
                .iter()
                .map(|row| row.get(i).map(String::as_str).unwrap_or(""));
            types.insert(column.clone(), Value::String(infer_type(values).into()));
        }
        fields.insert("column_types".into(), Value::Object(types));

        if preview_rows > 0 && !self.sample.is_empty() {
            let preview = self
                .sample
                .iter()
                .take(preview_rows)
                .map(|row| Value::Array(row.iter().cloned().map(Value::String).collect()))
                .collect();
            fields.insert("preview_rows".into(), Value::Array(preview));
        }
    }
}

impl TabularExtractor {
    fn extract_delimited(
        &self,
        path: &Path,
        delimiter: u8,
        format: &str,
    ) -> Result<Fields, ExtractionError> {
        let file = File::open(path).map_err(|e| ExtractionError::unreadable(path, &e))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(BufReader::new(file));

        let header = reader
            .byte_headers()
            .map_err(|e| csv_error(path, e))?
            .iter()
            .map(|f| String::from_utf8_lossy(f).trim().to_string())
            .collect();
        let mut table = Table::new(header);

        let mut record = csv::ByteRecord::new();
        while reader
            .read_byte_record(&mut record)
            .map_err(|e| csv_error(path, e))?
        {
            table.push(
                record
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).trim().to_string())
                    .collect(),
            );
        }

        let mut fields = Fields::new();
        fields.insert("format".into(), Value::String(format.into()));
        fields.insert("sheet_count".into(), Value::from(1));
        table.describe(self.preview_rows, &mut fields);
        Ok(fields)
    }

    fn extract_xlsx(&self, path: &Path) -> Result<Fields, ExtractionError> {
        let file = File::open(path).map_err(|e| ExtractionError::unreadable(path, &e))?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| ExtractionError::corrupt(path, e.to_string()))?;

        let corrupt = |m: String| ExtractionError::corrupt(path, m);
        let shared_strings = read_shared_strings(&mut archive).map_err(corrupt)?;
        let worksheets = list_worksheet_names(&archive);
        let mut sheet_names = read_sheet_names(&mut archive).map_err(corrupt)?;
        if sheet_names.is_empty() && worksheets.is_empty() {
            return Err(ExtractionError::corrupt(path, "workbook contains no worksheets"));
        }
        // Workbook order matches worksheet numbering for files written by
        // common producers; unnamed extras get positional names.
        while sheet_names.len() < worksheets.len() {
            sheet_names.push(format!("Sheet{}", sheet_names.len() + 1));
        }

        let mut row_counts = Map::new();
        let mut first: Option<Table> = None;
        for (i, part) in worksheets.iter().take(XLSX_MAX_SHEETS).enumerate() {
            let xml =
                read_zip_entry_bounded(&mut archive, part, MAX_XML_ENTRY_BYTES).map_err(corrupt)?;
            let table = read_sheet(&xml, &shared_strings).map_err(corrupt)?;
            row_counts.insert(sheet_names[i].clone(), Value::from(table.row_count));
            if first.is_none() {
                first = Some(table);
            }
        }

        let mut fields = Fields::new();
        fields.insert("format".into(), Value::String("xlsx".into()));
        fields.insert("sheet_count".into(), Value::from(sheet_names.len()));
        fields.insert(
            "sheets".into(),
            Value::Array(sheet_names.into_iter().map(Value::String).collect()),
        );
        fields.insert("sheet_row_counts".into(), Value::Object(row_counts));
        if let Some(table) = first {
            table.describe(self.preview_rows, &mut fields);
        }
        Ok(fields)
    }
}

fn csv_error(path: &Path, err: csv::Error) -> ExtractionError {
    match err.kind() {
        csv::ErrorKind::Io(io) => ExtractionError::unreadable(path, io),
        _ => ExtractionError::corrupt(path, err.to_string()),
    }
}

fn date_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"^\d{4}-\d{2}-\d{2}", r"^\d{2}/\d{2}/\d{4}", r"^\d{2}-\d{2}-\d{4}"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

const BOOLEAN_WORDS: &[&str] = &["true", "false", "yes", "no", "1", "0", "t", "f", "y", "n"];

/// Classify a column from sampled cell values. Blank cells are ignored;
/// checks run numeric, then date, then boolean, then string.
pub fn infer_type<'a>(values: impl Iterator<Item = &'a str>) -> &'static str {
    let values: Vec<&str> = values.map(str::trim).filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        return "empty";
    }

    let numbers: Option<Vec<f64>> = values.iter().map(|v| v.parse::<f64>().ok()).collect();
    if let Some(numbers) = numbers {
        let integral = numbers.iter().all(|n| n.is_finite() && n.fract() == 0.0);
        return if integral { "integer" } else { "float" };
    }

    if values
        .iter()
        .all(|v| date_patterns().iter().any(|p| p.is_match(v)))
    {
        return "date";
    }

    if values
        .iter()
        .all(|v| BOOLEAN_WORDS.contains(&v.to_lowercase().as_str()))
    {
        return "boolean";
    }

    "string"
}

fn read_zip_entry_bounded<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "zip entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        ));
    }
    Ok(out)
}

/// The shared string table; absent when every cell is inline.
fn read_shared_strings<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<String>, String> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheet names in workbook order.
fn read_sheet_names<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Result<Vec<String>, String> {
    if archive.index_for_name("xl/workbook.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut names = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"name" {
                        let value = attr.unescape_value().map_err(|e| e.to_string())?;
                        names.push(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn list_worksheet_names<R: Read + Seek>(archive: &zip::ZipArchive<R>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Zero-based column index from a cell reference such as `C12`. `None`
/// when the reference has no column letters; an error past column `XFD`.
fn column_index(reference: &str) -> Result<Option<usize>, String> {
    let mut index = 0usize;
    let mut any = false;
    for b in reference.bytes().take_while(u8::is_ascii_alphabetic) {
        let digit = (b.to_ascii_uppercase() - b'A' + 1) as usize;
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add(digit))
            .filter(|i| *i <= XLSX_MAX_COLUMN + 1)
            .ok_or_else(|| format!("cell reference {} is beyond column XFD", reference))?;
        any = true;
    }
    Ok(any.then(|| index - 1))
}

#[derive(Default)]
struct Cell {
    column: Option<usize>,
    kind: Vec<u8>,
    value: String,
}

fn finish_row(
    row: &mut BTreeMap<usize, String>,
    header: &mut Option<Vec<String>>,
    table: &mut Table,
) {
    let width = row.keys().next_back().map(|k| k + 1).unwrap_or(0);
    let mut values = vec![String::new(); width];
    for (k, v) in std::mem::take(row) {
        values[k] = v;
    }
    if header.is_none() {
        *header = Some(values);
    } else {
        table.push(values);
    }
}

/// First row is the header; the rest are data rows.
fn read_sheet(xml: &[u8], shared_strings: &[String]) -> Result<Table, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut header: Option<Vec<String>> = None;
    let mut table = Table::new(Vec::new());
    let mut row: BTreeMap<usize, String> = BTreeMap::new();
    let mut cell: Option<Cell> = None;
    let mut in_value = false;
    let mut cells = 0usize;

    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    let mut c = Cell::default();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                c.column = column_index(&String::from_utf8_lossy(&attr.value))?
                            }
                            b"t" => c.kind = attr.value.to_vec(),
                            _ => {}
                        }
                    }
                    cell = Some(c);
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        let column = c.column.unwrap_or(row.len());
                        let value = if c.kind == b"s" {
                            c.value
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared_strings.get(i).cloned())
                                .unwrap_or_default()
                        } else {
                            c.value
                        };
                        row.insert(column, value);
                        cells += 1;
                    }
                }
                b"row" => finish_row(&mut row, &mut header, &mut table),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    table.columns = header.unwrap_or_default();
    Ok(table)
}
