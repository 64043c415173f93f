// src/aggregate.rs
use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::calendar::HOURS_PER_WORKING_DAY;
use crate::diagnostics::{Diagnostics, Outcome};
use crate::error::ReportError;
use crate::timesheet::DeveloperEffortRecord;
use crate::work_item_ref::{extract_known_reference, WorkItemId};
use crate::workbook::{list_workbook_files, Workbook, Worksheet};

/// Column holding the free-text reference/comment.
pub const REFERENCE_COLUMN: u32 = 2;
/// A usable row has date, reference and hours: at least this many used cells.
pub const MIN_USED_CELLS: usize = 3;

// --- Day-level totals ---

/// Hours per calendar day for one developer. Only lives long enough to
/// validate the month; it is not part of the persisted record.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DayHours {
    totals: BTreeMap<NaiveDate, Decimal>,
}

impl DayHours {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, date: NaiveDate, hours: Decimal) {
        *self.totals.entry(date).or_insert(Decimal::ZERO) += hours;
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    /// Days whose total differs from a full working day, in date order.
    pub fn mismatches(&self) -> impl Iterator<Item = (NaiveDate, Decimal)> + '_ {
        self.totals
            .iter()
            .filter(|(_, total)| **total != HOURS_PER_WORKING_DAY)
            .map(|(date, total)| (*date, *total))
    }

    /// One diagnostic per day that is not exactly eight hours. Never blocks.
    pub fn validate(&self, diagnostics: &mut Diagnostics) {
        for (date, total) in self.mismatches() {
            diagnostics.warn(format!(
                "Total effort for day {} is {} and not {}. Please update.",
                date,
                total.normalize(),
                HOURS_PER_WORKING_DAY
            ));
        }
    }
}

// --- Cross-file actuals for a known id set ---

/// Individual hour contributions per work item; sum on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActualHours {
    by_item: BTreeMap<WorkItemId, Vec<Decimal>>,
}

impl ActualHours {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: WorkItemId, hours: Decimal) {
        self.by_item.entry(id).or_default().push(hours);
    }

    pub fn contributions(&self, id: WorkItemId) -> &[Decimal] {
        self.by_item.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self, id: WorkItemId) -> Option<Decimal> {
        self.by_item.get(&id).map(|hours| hours.iter().copied().sum())
    }

    pub fn len(&self) -> usize {
        self.by_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }

    /// Appends `other`'s contributions after this one's.
    pub fn merge(&mut self, other: ActualHours) {
        for (id, hours) in other.by_item {
            self.by_item.entry(id).or_default().extend(hours);
        }
    }
}

/// Scans column 2 of every worksheet for a reference to one of `known` and
/// records the third used cell of that row as hours against it.
pub fn scan_worksheet_for_known_ids(
    file_label: &str,
    sheet: &Worksheet,
    known: &HashSet<WorkItemId>,
    actuals: &mut ActualHours,
    diagnostics: &mut Diagnostics,
) {
    for (row, cell) in sheet.column_cells_used(REFERENCE_COLUMN) {
        let Some(id) = extract_known_reference(&cell.as_text(), known) else {
            continue;
        };

        let used: Vec<_> = row.cells_used().collect();
        if used.len() < MIN_USED_CELLS {
            debug!(
                "Row {} of sheet {} in {} references {} but has no hours",
                row.number(),
                sheet.name(),
                file_label,
                id
            );
            continue;
        }

        match used[MIN_USED_CELLS - 1].as_hours() {
            Some(hours) if hours >= Decimal::ZERO => actuals.record(id, hours),
            _ => diagnostics.warn(format!(
                "Hours value '{}' in row {} of sheet {} in {} is not a valid number of hours. Excluding this row",
                used[MIN_USED_CELLS - 1].as_text(),
                row.number(),
                sheet.name(),
                file_label
            )),
        }
    }
}

pub fn actuals_for_known_ids(
    file_label: &str,
    workbook: &Workbook,
    known: &HashSet<WorkItemId>,
) -> Outcome<ActualHours> {
    let mut actuals = ActualHours::new();
    let mut diagnostics = Diagnostics::new();
    for sheet in workbook.worksheets() {
        scan_worksheet_for_known_ids(file_label, sheet, known, &mut actuals, &mut diagnostics);
    }
    Outcome::new(actuals, diagnostics)
}

/// Every worksheet of every workbook in `dir`, not limited to one month or
/// one developer. Files are scanned in parallel and merged in file order.
pub fn scan_directory_for_known_ids(
    dir: &Path,
    known: &HashSet<WorkItemId>,
) -> Result<Outcome<ActualHours>, ReportError> {
    let files = list_workbook_files(dir)?;
    info!(
        "Scanning {} workbook(s) in {:?} for {} known work item(s)",
        files.len(),
        dir,
        known.len()
    );

    let scanned: Vec<Result<Outcome<ActualHours>, ReportError>> = files
        .par_iter()
        .map(|path: &PathBuf| -> Result<Outcome<ActualHours>, ReportError> {
            let workbook = Workbook::open(path)?;
            Ok(actuals_for_known_ids(&file_label(path), &workbook, known))
        })
        .collect();

    let mut actuals = ActualHours::new();
    let mut diagnostics = Diagnostics::new();
    for outcome in scanned {
        let (file_actuals, file_diagnostics) = outcome?.into_parts();
        actuals.merge(file_actuals);
        diagnostics.extend(file_diagnostics);
    }
    Ok(Outcome::new(actuals, diagnostics))
}

pub(crate) fn file_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// --- Per-developer roll-up for a month ---

/// Hours per work item summed across all developers.
pub fn combine_developer_efforts(records: &[DeveloperEffortRecord]) -> BTreeMap<WorkItemId, Decimal> {
    let mut combined = BTreeMap::new();
    for record in records {
        for (id, hours) in record.hours_by_work_item() {
            *combined.entry(*id).or_insert(Decimal::ZERO) += *hours;
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::CellValue;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn id(value: u32) -> WorkItemId {
        WorkItemId::new(value).unwrap()
    }

    #[test]
    fn day_hours_sum_duplicates_and_flag_mismatches() {
        let mut days = DayHours::new();
        days.add(d(2018, 3, 1), dec!(3));
        days.add(d(2018, 3, 1), dec!(5));
        days.add(d(2018, 3, 2), dec!(3));
        days.add(d(2018, 3, 2), dec!(4));

        assert_eq!(days.len(), 2);
        let mismatches: Vec<_> = days.mismatches().collect();
        assert_eq!(mismatches, vec![(d(2018, 3, 2), dec!(7))]);

        let mut diagnostics = Diagnostics::new();
        days.validate(&mut diagnostics);
        assert_eq!(
            diagnostics.messages(),
            vec!["Total effort for day 2018-03-02 is 7 and not 8. Please update."]
        );
    }

    #[test]
    fn combine_sums_across_developers() {
        let alice = DeveloperEffortRecord::from_parts("Alice", [(id(101), dec!(4.0))]);
        let bob = DeveloperEffortRecord::from_parts("Bob", [(id(101), dec!(4.0)), (id(7), dec!(2))]);
        let combined = combine_developer_efforts(&[alice, bob]);
        assert_eq!(combined.get(&id(101)), Some(&dec!(8.0)));
        assert_eq!(combined.get(&id(7)), Some(&dec!(2)));
        assert_eq!(combined.len(), 2);
    }

    #[test]
    fn known_id_scan_reads_third_used_cell() {
        let known: HashSet<_> = [id(101), id(205)].into_iter().collect();
        let sheet = Worksheet::new("anything")
            .with_row(1, vec![CellValue::Number(176.0)])
            .with_row(2, vec![d(2018, 3, 1).into(), "bug 101".into(), 3.5.into()])
            .with_row(3, vec![d(2018, 3, 1).into(), "101 and then 205".into(), 4.5.into()])
            .with_row(4, vec![d(2018, 3, 2).into(), "205".into()])
            .with_row(5, vec![d(2018, 3, 2).into(), "unknown 999".into(), 8.0.into()])
            .with_row(6, vec![d(2018, 3, 5).into(), "101".into(), "n/a".into()]);
        let workbook = Workbook::new(vec![sheet]);

        let (actuals, diagnostics) = actuals_for_known_ids("Bob", &workbook, &known).into_parts();
        assert_eq!(actuals.contributions(id(101)), &[dec!(3.5)]);
        assert_eq!(actuals.contributions(id(205)), &[dec!(4.5)]);
        assert_eq!(actuals.total(id(205)), Some(dec!(4.5)));
        assert_eq!(actuals.total(id(999)), None);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.messages()[0].starts_with("Hours value 'n/a' in row 6"));
    }

    #[test]
    fn known_id_scan_covers_every_sheet() {
        let known: HashSet<_> = [id(42)].into_iter().collect();
        let january = Worksheet::new("1_18")
            .with_row(2, vec![d(2018, 1, 2).into(), "#42".into(), 2.0.into()]);
        let february = Worksheet::new("2_18")
            .with_row(2, vec![d(2018, 2, 1).into(), "#42".into(), 6.0.into()]);
        let workbook = Workbook::new(vec![january, february]);

        let actuals = actuals_for_known_ids("Carol", &workbook, &known).value;
        assert_eq!(actuals.contributions(id(42)), &[dec!(2), dec!(6)]);
        assert_eq!(actuals.total(id(42)), Some(dec!(8)));
    }

    #[test]
    fn merge_appends_contributions() {
        let mut first = ActualHours::new();
        first.record(id(1), dec!(1));
        let mut second = ActualHours::new();
        second.record(id(1), dec!(2));
        second.record(id(2), dec!(3));
        first.merge(second);
        assert_eq!(first.contributions(id(1)), &[dec!(1), dec!(2)]);
        assert_eq!(first.contributions(id(2)), &[dec!(3)]);
        assert_eq!(first.len(), 2);
    }
}
