//! Tabular file reader - CSV and spreadsheets into ordered text rows
//!
//! Every cell is text. Missing cells become "" so validators only ever
//! check string emptiness. Rows keep the line number they had in the
//! file so diagnostics point at what the user sees.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::StringRecord;
use serde::de::DeserializeOwned;

use crate::error::{LoadError, RowError};

/// Spreadsheet extensions handled by calamine (auto-detected by content).
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const CSV_EXTENSIONS: &[&str] = &["csv", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Spreadsheet,
}

impl Format {
    pub fn detect(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if CSV_EXTENSIONS.contains(&ext.as_str()) {
            Some(Format::Csv)
        } else if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
            Some(Format::Spreadsheet)
        } else {
            None
        }
    }
}

/// A row tagged with its line number in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Numbered<T> {
    pub line: usize,
    pub value: T,
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Numbered<Vec<String>>>,
}

impl Table {
    /// Read a file, picking the parser from its extension.
    pub fn read(path: &Path) -> Result<Table, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Table::parse(path, &bytes)
    }

    /// Parse already loaded file content; `path` only selects the format.
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Table, LoadError> {
        match Format::detect(path) {
            Some(Format::Csv) => Table::from_csv_bytes(bytes),
            Some(Format::Spreadsheet) => Table::from_spreadsheet(path, bytes),
            None => Err(LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Parse CSV content. UTF-8 is tried first (BOM stripped), then
    /// Windows-1252, which is what office suites emit for "CSV".
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Table, LoadError> {
        let text = decode_text(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
        if headers.iter().all(String::is_empty) {
            return Err(LoadError::NoHeader);
        }

        let mut rows = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            // The csv crate reports 1-based lines; fall back to index + header.
            let line = record
                .position()
                .map(|pos| pos.line() as usize)
                .unwrap_or(idx + 2);
            let cells: Vec<String> = record.iter().map(|cell| cell.to_string()).collect();
            if let Some(cells) = fit_row(cells, headers.len()) {
                rows.push(Numbered { line, value: cells });
            }
        }

        Ok(Table { headers, rows })
    }

    /// Parse the first sheet of a workbook. The concrete format is
    /// detected from the content.
    pub fn from_spreadsheet(path: &Path, bytes: &[u8]) -> Result<Table, LoadError> {
        let spreadsheet_error = |e: calamine::Error| LoadError::Spreadsheet {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let mut workbook =
            open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(spreadsheet_error)?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| LoadError::EmptyWorkbook {
                path: path.to_path_buf(),
            })?;
        tracing::debug!(sheet = %sheet_name, "reading first sheet");

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(spreadsheet_error)?;
        Table::from_range(&range)
    }

    /// Build a table from a sheet range; the first non-empty row is the header.
    pub fn from_range(range: &calamine::Range<Data>) -> Result<Table, LoadError> {
        let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
        let mut lines = range
            .rows()
            .enumerate()
            .map(|(idx, cells)| (first_row + idx + 1, cells));

        let headers: Vec<String> = loop {
            match lines.next() {
                Some((_, cells)) => {
                    let headers: Vec<String> = cells
                        .iter()
                        .map(|cell| normalize_header(&cell_to_string(cell)))
                        .collect();
                    if headers.iter().any(|h| !h.is_empty()) {
                        break headers;
                    }
                }
                None => return Err(LoadError::NoHeader),
            }
        };

        let rows = lines
            .filter_map(|(line, cells)| {
                let cells = cells.iter().map(cell_to_string).collect();
                fit_row(cells, headers.len()).map(|value| Numbered { line, value })
            })
            .collect();

        Ok(Table { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw cells of each row, in file order.
    pub fn rows(&self) -> impl Iterator<Item = &Numbered<Vec<String>>> {
        self.rows.iter()
    }

    /// Deserialize every row into a typed record keyed by header name.
    /// Rows that cannot be decoded are reported, not dropped.
    pub fn typed<T: DeserializeOwned>(&self) -> (Vec<Numbered<T>>, Vec<RowError>) {
        let header = StringRecord::from(self.headers.clone());
        let mut typed = Vec::with_capacity(self.rows.len());
        let mut errors = Vec::new();

        for row in &self.rows {
            let record = StringRecord::from(row.value.clone());
            match record.deserialize::<T>(Some(&header)) {
                Ok(value) => typed.push(Numbered {
                    line: row.line,
                    value,
                }),
                Err(e) => errors.push(RowError::at(row.line, format!("Unreadable row: {}", e))),
            }
        }

        (typed, errors)
    }
}

/// Pad or truncate to the header width; `None` for an entirely blank row.
fn fit_row(mut cells: Vec<String>, width: usize) -> Option<Vec<String>> {
    if cells.iter().all(|cell| cell.trim().is_empty()) {
        return None;
    }
    cells.resize(width, String::new());
    Some(cells)
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// Header normalization: BOM and outer whitespace removed, inner
/// whitespace collapsed, lower-cased.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Render a spreadsheet cell as the text a user would type into a CSV.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time() == chrono::NaiveTime::MIN => ts.format("%Y-%m-%d").to_string(),
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

/// Path-like label for logs and audit records.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
