// src/timesheet.rs
use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::aggregate::{file_label, DayHours, MIN_USED_CELLS, REFERENCE_COLUMN};
use crate::calendar::{MonthPeriod, WorkingCalendar};
use crate::diagnostics::{Diagnostics, Outcome};
use crate::error::{error_chain, AbortedRun, ReportError};
use crate::work_item_ref::{extract_reference, WorkItemId};
use crate::workbook::{list_workbook_files, Workbook, Worksheet};

pub const DEFAULT_WORKBOOK_PREFIX: &str = "Work performance record ";

const DATE_COLUMN: u32 = 1;

// --- Records ---

/// One usable timesheet row.
#[derive(Debug, Clone, PartialEq)]
pub struct EffortEntry {
    pub row: u32,
    pub date: NaiveDate,
    pub hours: Decimal,
    pub work_item: Option<WorkItemId>,
}

/// Hours per work item for one developer and one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeveloperEffortRecord {
    developer_name: String,
    hours_by_work_item: BTreeMap<WorkItemId, Decimal>,
}

impl DeveloperEffortRecord {
    pub fn from_parts(
        developer_name: impl Into<String>,
        hours: impl IntoIterator<Item = (WorkItemId, Decimal)>,
    ) -> Self {
        let mut hours_by_work_item = BTreeMap::new();
        for (id, h) in hours {
            *hours_by_work_item.entry(id).or_insert(Decimal::ZERO) += h;
        }
        Self {
            developer_name: developer_name.into(),
            hours_by_work_item,
        }
    }

    pub fn developer_name(&self) -> &str {
        &self.developer_name
    }

    pub fn hours_by_work_item(&self) -> &BTreeMap<WorkItemId, Decimal> {
        &self.hours_by_work_item
    }
}

// --- Row extraction ---

/// Turns the used rows of a month sheet into entries. Rows without a date in
/// column 1 or without hours are skipped with one diagnostic each.
pub fn read_entries(sheet: &Worksheet) -> Outcome<Vec<EffortEntry>> {
    let mut entries = Vec::new();
    let mut diagnostics = Diagnostics::new();

    for row in sheet.rows_used() {
        let first = row.cell(DATE_COLUMN);
        let Some(date) = first.as_date() else {
            diagnostics.warn(format!(
                "First column of row {} with value {} is not in Date format. Excluding this row from effort calculation",
                row.number(),
                first.as_text()
            ));
            continue;
        };

        let used: Vec<_> = row.cells_used().collect();
        if used.len() < MIN_USED_CELLS {
            diagnostics.warn(format!("No hours added in row {}", row.number()));
            continue;
        }

        let hours_cell = used[MIN_USED_CELLS - 1];
        let hours = match hours_cell.as_hours() {
            Some(hours) if hours >= Decimal::ZERO => hours,
            _ => {
                diagnostics.warn(format!(
                    "Hours value '{}' in row {} is not a valid number of hours. Excluding this row from effort calculation",
                    hours_cell.as_text(),
                    row.number()
                ));
                continue;
            }
        };

        entries.push(EffortEntry {
            row: row.number(),
            date,
            hours,
            work_item: extract_reference(&row.cell(REFERENCE_COLUMN).as_text()),
        });
    }

    Outcome::new(entries, diagnostics)
}

// --- Parser ---

/// Outcome of one file: its diagnostics and either a record, `None` when the
/// month tab is missing, or the fatal error that stops the batch.
struct FileParse {
    diagnostics: Diagnostics,
    result: Result<Option<DeveloperEffortRecord>, ReportError>,
}

#[derive(Debug, Clone)]
pub struct TimesheetParser {
    workbook_prefix: String,
}

impl Default for TimesheetParser {
    fn default() -> Self {
        Self::new(DEFAULT_WORKBOOK_PREFIX)
    }
}

impl TimesheetParser {
    pub fn new(workbook_prefix: impl Into<String>) -> Self {
        Self {
            workbook_prefix: workbook_prefix.into(),
        }
    }

    /// "Work performance record Alice.xlsx" -> "Alice".
    pub fn developer_name(&self, path: &Path) -> String {
        let stem = file_label(path);
        if self.workbook_prefix.is_empty() {
            return stem;
        }
        stem.replace(&self.workbook_prefix, "").trim().to_string()
    }

    /// Parses the month tab of one workbook. `None` when the tab is missing,
    /// which excludes the file from the month.
    pub fn parse_month_sheet(
        &self,
        workbook: &Workbook,
        file_name: &str,
        developer_name: &str,
        calendar: &WorkingCalendar,
    ) -> Outcome<Option<DeveloperEffortRecord>> {
        let mut diagnostics = Diagnostics::new();
        let sheet_name = calendar.period().sheet_name();

        let Some(sheet) = workbook.worksheet(&sheet_name) else {
            diagnostics.warn(format!(
                "Sheet {} not found in {}. Excluding this file",
                sheet_name, file_name
            ));
            return Outcome::new(None, diagnostics);
        };

        // Lenient: a wrong declared total is reported, never blocking.
        let expected = calendar.expected_hours();
        let declared = sheet.cell(1, 1).as_int().map(Decimal::from);
        if declared != Some(expected) {
            diagnostics.warn(format!(
                "Total working hours in sheet {} of {} is not correct. Expected value is {}",
                sheet_name, file_name, expected
            ));
        }

        let (entries, entry_diagnostics) = read_entries(sheet).into_parts();
        diagnostics.extend(entry_diagnostics);

        let mut days = DayHours::new();
        let mut hours_by_work_item: BTreeMap<WorkItemId, Decimal> = BTreeMap::new();
        for entry in &entries {
            days.add(entry.date, entry.hours);
            if let Some(id) = entry.work_item {
                *hours_by_work_item.entry(id).or_insert(Decimal::ZERO) += entry.hours;
            }
        }
        days.validate(&mut diagnostics);

        debug!(
            "{}: {} usable rows over {} days, {} work items",
            developer_name,
            entries.len(),
            days.len(),
            hours_by_work_item.len()
        );

        Outcome::new(
            Some(DeveloperEffortRecord {
                developer_name: developer_name.to_string(),
                hours_by_work_item,
            }),
            diagnostics,
        )
    }

    fn parse_file(&self, path: &Path, calendar: &WorkingCalendar) -> FileParse {
        let file_name = file_label(path);
        let mut diagnostics = Diagnostics::new();
        diagnostics.info(format!("Reading file {}", file_name));

        let workbook = match Workbook::open(path) {
            Ok(workbook) => workbook,
            Err(e) => {
                return FileParse {
                    diagnostics,
                    result: Err(e),
                }
            }
        };

        let developer = self.developer_name(path);
        let (record, sheet_diagnostics) = self
            .parse_month_sheet(&workbook, &file_name, &developer, calendar)
            .into_parts();
        diagnostics.extend(sheet_diagnostics);
        FileParse {
            diagnostics,
            result: Ok(record),
        }
    }

    /// One record per workbook in `dir` that has the month tab.
    ///
    /// Any file that cannot be read aborts the whole batch; the returned
    /// `AbortedRun` carries the diagnostics up to and including the failure.
    pub fn efforts_for_month(
        &self,
        dir: &Path,
        period: MonthPeriod,
    ) -> Result<Outcome<Vec<DeveloperEffortRecord>>, AbortedRun> {
        let mut diagnostics = Diagnostics::new();
        diagnostics.info("Starting reading of performance sheet");

        match self.collect_month(dir, period, &mut diagnostics) {
            Ok(records) => {
                diagnostics.info("Finished reading of performance sheet");
                info!(
                    "Collected {} developer record(s) for {}",
                    records.len(),
                    period
                );
                Ok(Outcome::new(records, diagnostics))
            }
            Err(e) => {
                diagnostics.error("Finished reading of performance sheet with exception:");
                diagnostics.error(error_chain(&e));
                Err(AbortedRun::new(diagnostics, e))
            }
        }
    }

    fn collect_month(
        &self,
        dir: &Path,
        period: MonthPeriod,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<DeveloperEffortRecord>, ReportError> {
        let calendar = WorkingCalendar::for_month(period);
        let files = list_workbook_files(dir)?;

        // No data flows between files, so the scan runs in parallel and the
        // results are folded back in file order.
        let parsed: Vec<FileParse> = files
            .par_iter()
            .map(|path: &PathBuf| self.parse_file(path, &calendar))
            .collect();

        let mut records = Vec::new();
        for file in parsed {
            diagnostics.extend(file.diagnostics);
            if let Some(record) = file.result? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
