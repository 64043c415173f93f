// src/export.rs
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::diagnostics::Diagnostics;
use crate::error::{io_context, ReportError};
use crate::report::{Report, ReportCell};

/// Both report shapes land on a sheet of this name.
pub const REPORT_SHEET_NAME: &str = "Estimation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    /// Picks the format from the output extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ReportError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("xlsx") => Ok(ExportFormat::Xlsx),
            Some("csv") => Ok(ExportFormat::Csv),
            _ => Err(ReportError::Export(format!(
                "Unsupported output file {:?}; expected .xlsx or .csv",
                path
            ))),
        }
    }
}

pub fn export_report(report: &Report, path: &Path) -> Result<(), ReportError> {
    let format = ExportFormat::from_path(path)?;
    ensure_parent_dir(path)?;
    match format {
        ExportFormat::Xlsx => write_xlsx(report, path)?,
        ExportFormat::Csv => write_csv(report, path)?,
    }
    info!("Wrote {} report row(s) to {:?}", report.len(), path);
    Ok(())
}

fn write_xlsx(report: &Report, path: &Path) -> Result<(), ReportError> {
    let mut workbook = XlsxWorkbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(REPORT_SHEET_NAME)?;

    for (col, header) in report.headers().iter().enumerate() {
        worksheet.write_with_format(0, col as u16, *header, &bold)?;
    }

    for (index, record) in report.records().enumerate() {
        let row = (index + 1) as u32;
        for (col, cell) in record.iter().enumerate() {
            let col = col as u16;
            match cell {
                ReportCell::Text(text) => {
                    worksheet.write_string(row, col, text)?;
                }
                ReportCell::Number(n) => {
                    worksheet.write_number(row, col, n.to_f64().unwrap_or_default())?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn write_csv(report: &Report, path: &Path) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(report.headers())?;
    for record in report.records() {
        writer.write_record(record.iter().map(|cell| cell.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| io_context(e, format!("Failed to flush {:?}", path)))?;
    Ok(())
}

/// Writes one line per diagnostic, oldest first.
pub fn write_transcript(diagnostics: &Diagnostics, path: &Path) -> Result<(), ReportError> {
    ensure_parent_dir(path)?;
    let mut file = fs::File::create(path)
        .map_err(|e| io_context(e, format!("Failed to create transcript {:?}", path)))?;
    file.write_all(diagnostics.render().as_bytes())
        .map_err(|e| io_context(e, format!("Failed to write transcript {:?}", path)))?;
    info!("Wrote {} diagnostic line(s) to {:?}", diagnostics.len(), path);
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<(), ReportError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent).map_err(|e| {
                io_context(e, format!("Failed to create output directory {:?}", parent))
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportKind, ReportRow};
    use crate::work_item_ref::WorkItemId;
    use crate::workbook::{CellValue, Workbook};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn sample_report() -> Report {
        Report::new(
            ReportKind::Estimation,
            vec![ReportRow {
                id: WorkItemId::new(501).unwrap(),
                title: Some("Fix X".to_string()),
                state: Some("Approved".to_string()),
                estimated_effort: dec!(20),
                actual_effort: dec!(40.5),
                remaining_effort: dec!(3),
            }],
        )
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("out/r.XLSX")).unwrap(), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_path(Path::new("r.csv")).unwrap(), ExportFormat::Csv);
        assert!(matches!(
            ExportFormat::from_path(Path::new("r.pdf")),
            Err(ReportError::Export(_))
        ));
        assert!(ExportFormat::from_path(Path::new("report")).is_err());
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("report.csv");
        export_report(&sample_report(), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "WorkItemId,Estimated Effort,Actual Effort,Remaining Effort",
                "501 (Fix X),20,40.5,3",
            ]
        );
    }

    #[test]
    fn xlsx_export_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.xlsx");
        export_report(&sample_report(), &path).unwrap();

        let workbook = Workbook::open(&path).unwrap();
        let sheet = workbook.worksheet(REPORT_SHEET_NAME).unwrap();
        assert_eq!(sheet.cell(1, 1), &CellValue::Text("WorkItemId".to_string()));
        assert_eq!(sheet.cell(1, 4), &CellValue::Text("Remaining Effort".to_string()));
        assert_eq!(sheet.cell(2, 1), &CellValue::Text("501 (Fix X)".to_string()));
        assert_eq!(sheet.cell(2, 3), &CellValue::Number(40.5));
    }

    #[test]
    fn transcript_has_one_line_per_diagnostic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        let mut diagnostics = Diagnostics::new();
        diagnostics.info("Starting reading of performance sheet");
        diagnostics.warn("No hours added in row 4");
        write_transcript(&diagnostics, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" : Starting reading of performance sheet"));
        assert!(lines[1].ends_with(" : No hours added in row 4"));
    }
}
