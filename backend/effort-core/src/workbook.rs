// src/workbook.rs
//
// Minimal in-memory model of a spreadsheet, filled from disk through calamine.
// Rows and columns are 1-based, as a user sees them in the workbook.

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::{io_context, ReportError};

const TEXT_DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y"];
const TEXT_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M"];

// --- Cells ---

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Date of a date cell, or of text written in one of the common date layouts.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::DateTime(dt) => Some(dt.date()),
            CellValue::Text(s) => parse_text_date(s),
            _ => None,
        }
    }

    /// Integral value of a number cell or of integer text.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Some(*n as i64)
            }
            CellValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_hours(&self) -> Option<Decimal> {
        match self {
            CellValue::Number(n) => Decimal::from_f64(*n),
            CellValue::Text(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    /// The cell rendered as text, the way a comment cell is read.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 => format!("{:.0}", n),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::Error(e) => e.clone(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::DateTime(value.and_hms_opt(0, 0, 0).unwrap_or_default())
    }
}

fn parse_text_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    TEXT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            TEXT_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}

// --- Rows and sheets ---

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    number: u32,
    cells: BTreeMap<u32, CellValue>,
}

impl Row {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn cell(&self, column: u32) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells.get(&column).unwrap_or(&EMPTY)
    }

    /// Non-empty cells, left to right.
    pub fn cells_used(&self) -> impl Iterator<Item = &CellValue> {
        self.cells.values().filter(|c| !c.is_empty())
    }

    pub fn is_used(&self) -> bool {
        self.cells_used().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Worksheet {
    name: String,
    rows: BTreeMap<u32, Row>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&mut self, row: u32, column: u32, value: impl Into<CellValue>) {
        self.rows
            .entry(row)
            .or_insert_with(|| Row {
                number: row,
                cells: BTreeMap::new(),
            })
            .cells
            .insert(column, value.into());
    }

    /// Fills `row` from column 1 onwards.
    pub fn with_row(mut self, row: u32, values: Vec<CellValue>) -> Self {
        for (idx, value) in values.into_iter().enumerate() {
            self.set(row, idx as u32 + 1, value);
        }
        self
    }

    pub fn cell(&self, row: u32, column: u32) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.rows
            .get(&row)
            .map(|r| r.cell(column))
            .unwrap_or(&EMPTY)
    }

    /// Rows holding at least one non-empty cell, top to bottom.
    pub fn rows_used(&self) -> impl Iterator<Item = &Row> {
        self.rows.values().filter(|r| r.is_used())
    }

    /// Non-empty cells of one column, with the row they belong to.
    pub fn column_cells_used(&self, column: u32) -> impl Iterator<Item = (&Row, &CellValue)> {
        self.rows_used().filter_map(move |row| {
            let cell = row.cell(column);
            (!cell.is_empty()).then_some((row, cell))
        })
    }

    fn from_range(name: String, range: &Range<Data>) -> Self {
        let mut sheet = Worksheet::new(name);
        let (start_row, start_col) = range.start().unwrap_or((0, 0));
        // calamine positions are relative to range.start() and 0-based
        for (row, col, value) in range.used_cells() {
            let value = convert_data(value);
            if value.is_empty() {
                continue;
            }
            sheet.set(
                start_row + row as u32 + 1,
                start_col + col as u32 + 1,
                value,
            );
        }
        sheet
    }
}

fn convert_data(value: &Data) -> CellValue {
    match value {
        Data::Empty => CellValue::Empty,
        Data::Bool(v) => CellValue::Bool(*v),
        Data::Int(v) => CellValue::Number(*v as f64),
        Data::Float(v) => CellValue::Number(*v),
        Data::String(v) => CellValue::Text(v.clone()),
        Data::Error(e) => CellValue::Error(e.to_string()),
        Data::DateTime(v) => match v.as_datetime() {
            Some(dt) => CellValue::DateTime(dt),
            None => CellValue::Number(v.as_f64()),
        },
        Data::DateTimeIso(v) => NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(v, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::Text(v.clone())),
        Data::DurationIso(v) => CellValue::Text(v.clone()),
    }
}

// --- Workbooks ---

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Worksheet>) -> Self {
        Self { sheets }
    }

    /// Reads every worksheet of the file at `path`.
    pub fn open(path: &Path) -> Result<Self, ReportError> {
        debug!("Opening workbook {:?}", path);
        let mut source = open_workbook_auto(path).map_err(|source| ReportError::Workbook {
            path: path.to_path_buf(),
            source,
        })?;
        let sheets = source
            .worksheets()
            .into_iter()
            .map(|(name, range)| Worksheet::from_range(name, &range))
            .collect();
        Ok(Self { sheets })
    }

    pub fn worksheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    pub fn worksheet(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// The `*.xlsx` files directly inside `dir`, ordered by file name.
pub fn list_workbook_files(dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| io_context(e, format!("Failed to list input directory {:?}", dir)))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| io_context(e, format!("Failed to read entry in {:?}", dir)))?
            .path();
        let is_xlsx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
        if !is_xlsx || !path.is_file() {
            continue;
        }
        // Office keeps "~$name.xlsx" lock files next to open workbooks.
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("~$"))
        {
            debug!("Skipping lock file {:?}", path);
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn used_rows_and_cells_skip_blanks() {
        let mut sheet = Worksheet::new("3_18");
        sheet.set(1, 1, 160.0);
        sheet.set(2, 1, "");
        sheet.set(3, 1, d(2018, 3, 1));
        sheet.set(3, 3, "#501 review");
        sheet.set(3, 5, 8.0);

        let rows: Vec<u32> = sheet.rows_used().map(|r| r.number()).collect();
        assert_eq!(rows, vec![1, 3]);

        let row = sheet.rows_used().nth(1).unwrap();
        let used: Vec<&CellValue> = row.cells_used().collect();
        assert_eq!(used.len(), 3);
        assert_eq!(used[2], &CellValue::Number(8.0));
        assert_eq!(sheet.cell(3, 2), &CellValue::Empty);
        assert_eq!(sheet.cell(40, 1), &CellValue::Empty);
    }

    #[test]
    fn date_accessor_accepts_date_cells_and_text() {
        assert_eq!(CellValue::from(d(2018, 3, 5)).as_date(), Some(d(2018, 3, 5)));
        assert_eq!(CellValue::from("2018-03-05").as_date(), Some(d(2018, 3, 5)));
        assert_eq!(CellValue::from("05.03.2018").as_date(), Some(d(2018, 3, 5)));
        assert_eq!(CellValue::from("2018-03-05 09:30:00").as_date(), Some(d(2018, 3, 5)));
        assert_eq!(CellValue::from("Total").as_date(), None);
        assert_eq!(CellValue::Number(160.0).as_date(), None);
    }

    #[test]
    fn numeric_accessors() {
        assert_eq!(CellValue::Number(160.0).as_int(), Some(160));
        assert_eq!(CellValue::Number(159.5).as_int(), None);
        assert_eq!(CellValue::from(" 176 ").as_int(), Some(176));
        assert_eq!(CellValue::Number(7.5).as_hours(), Some(dec!(7.5)));
        assert_eq!(CellValue::from("2.25").as_hours(), Some(dec!(2.25)));
        assert_eq!(CellValue::from("two").as_hours(), None);
    }

    #[test]
    fn text_rendering_of_numbers() {
        assert_eq!(CellValue::Number(501.0).as_text(), "501");
        assert_eq!(CellValue::Number(2.5).as_text(), "2.5");
        assert_eq!(CellValue::Empty.as_text(), "");
    }

    #[test]
    fn column_cells_used_reports_rows() {
        let sheet = Worksheet::new("any")
            .with_row(2, vec![d(2018, 3, 1).into(), "#7".into(), 4.0.into()])
            .with_row(3, vec![d(2018, 3, 2).into(), CellValue::Empty, 4.0.into()]);
        let cells: Vec<(u32, String)> = sheet
            .column_cells_used(2)
            .map(|(row, cell)| (row.number(), cell.as_text()))
            .collect();
        assert_eq!(cells, vec![(2, "#7".to_string())]);
    }

    #[test]
    fn list_workbook_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xlsx", "a.XLSX", "notes.txt", "~$a.xlsx"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = list_workbook_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.XLSX", "b.xlsx"]);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let err = list_workbook_files(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
    }
}
