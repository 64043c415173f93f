// src/report.rs
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::aggregate::ActualHours;
use crate::calendar::MonthPeriod;
use crate::error::ReportError;
use crate::tracker::{LiveWorkItem, WorkItemSnapshot};
use crate::work_item_ref::WorkItemId;

pub const ESTIMATION_HEADERS: [&str; 4] = [
    "WorkItemId",
    "Estimated Effort",
    "Actual Effort",
    "Remaining Effort",
];
pub const MONTHLY_HEADERS: [&str; 4] = ["WorkItemId", "State", "Estimated Effort", "Actual Effort"];

// --- Request / kind ---

/// What a run produces. Both variants share extraction and aggregation and
/// differ in merge policy, label, sort order and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportRequest {
    /// Live work items against every timesheet in the input directory.
    Estimation,
    /// Month-end reconciliation of one month's timesheets.
    Monthly { period: MonthPeriod },
}

impl ReportRequest {
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportRequest::Estimation => ReportKind::Estimation,
            ReportRequest::Monthly { .. } => ReportKind::Monthly,
        }
    }
}

impl fmt::Display for ReportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportRequest::Estimation => write!(f, "estimation report"),
            ReportRequest::Monthly { period } => write!(f, "monthly report for {}", period),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportKind {
    Estimation,
    Monthly,
}

impl ReportKind {
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            ReportKind::Estimation => &ESTIMATION_HEADERS,
            ReportKind::Monthly => &MONTHLY_HEADERS,
        }
    }
}

// --- Rows ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub id: WorkItemId,
    pub title: Option<String>,
    pub state: Option<String>,
    pub estimated_effort: Decimal,
    pub actual_effort: Decimal,
    pub remaining_effort: Decimal,
}

/// One output cell; numbers stay numbers so spreadsheets can sum them.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportCell {
    Text(String),
    Number(Decimal),
}

impl fmt::Display for ReportCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportCell::Text(text) => f.write_str(text),
            ReportCell::Number(n) => write!(f, "{}", n.normalize()),
        }
    }
}

impl ReportRow {
    pub fn is_zero_zero(&self) -> bool {
        self.estimated_effort.is_zero() && self.actual_effort.is_zero()
    }

    pub fn label(&self, kind: ReportKind) -> String {
        let title = self.title.as_deref().unwrap_or_default();
        match kind {
            ReportKind::Estimation => format!("{} ({})", self.id, title),
            ReportKind::Monthly => format!("{} - {}", self.id, title),
        }
    }

    /// Cells in the column order of `kind.headers()`.
    pub fn cells(&self, kind: ReportKind) -> Vec<ReportCell> {
        let label = ReportCell::Text(self.label(kind));
        match kind {
            ReportKind::Estimation => vec![
                label,
                ReportCell::Number(self.estimated_effort),
                ReportCell::Number(self.actual_effort),
                ReportCell::Number(self.remaining_effort),
            ],
            ReportKind::Monthly => vec![
                label,
                ReportCell::Text(self.state.clone().unwrap_or_default()),
                ReportCell::Number(self.estimated_effort),
                ReportCell::Number(self.actual_effort),
            ],
        }
    }
}

/// Ordered rows of one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    kind: ReportKind,
    rows: Vec<ReportRow>,
}

impl Report {
    pub fn new(kind: ReportKind, rows: Vec<ReportRow>) -> Self {
        Self { kind, rows }
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn headers(&self) -> &'static [&'static str] {
        self.kind.headers()
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = Vec<ReportCell>> + '_ {
        self.rows.iter().map(move |row| row.cells(self.kind))
    }
}

// --- Merging ---

/// Live items joined with their recorded actual hours, in live-query order.
/// Items with neither estimate nor actual hours are left out.
pub fn merge_estimation(live: &[LiveWorkItem], actuals: &ActualHours) -> Report {
    let mut rows = Vec::with_capacity(live.len());
    for item in live {
        let snapshot = &item.snapshot;
        let row = ReportRow {
            id: snapshot.id,
            title: Some(snapshot.title.clone()),
            state: Some(snapshot.state.clone()),
            estimated_effort: snapshot.estimate(),
            actual_effort: actuals.total(snapshot.id).unwrap_or(Decimal::ZERO),
            remaining_effort: item.remaining_work_rollup,
        };
        if row.is_zero_zero() {
            debug!("Skipping {}: no estimate and no recorded effort", snapshot.id);
            continue;
        }
        rows.push(row);
    }
    Report::new(ReportKind::Estimation, rows)
}

/// Combined monthly actuals joined with the snapshots fetched for those ids,
/// sorted by title (ordinal). The snapshots must cover exactly the combined
/// ids: a combined id without a snapshot is `MissingSnapshot`, and a snapshot
/// without a combined entry is `MissingActualEffort`.
pub fn merge_monthly(
    combined: &BTreeMap<WorkItemId, Decimal>,
    snapshots: Vec<WorkItemSnapshot>,
) -> Result<Report, ReportError> {
    let mut rows = Vec::with_capacity(snapshots.len());

    if let Some(id) = combined
        .keys()
        .find(|id| !snapshots.iter().any(|s| s.id == **id))
    {
        return Err(ReportError::MissingSnapshot { id: *id });
    }

    for snapshot in snapshots {
        let actual = *combined
            .get(&snapshot.id)
            .ok_or(ReportError::MissingActualEffort { id: snapshot.id })?;
        let estimated_effort = snapshot.estimate();
        let row = ReportRow {
            id: snapshot.id,
            estimated_effort,
            actual_effort: actual,
            remaining_effort: snapshot
                .remaining_work
                .and_then(Decimal::from_f64)
                .unwrap_or(Decimal::ZERO),
            title: Some(snapshot.title),
            state: Some(snapshot.state),
        };
        if row.is_zero_zero() {
            debug!("Skipping {}: no estimate and no recorded effort", row.id);
            continue;
        }
        rows.push(row);
    }

    rows.sort_by(|a, b| a.title.cmp(&b.title));
    Ok(Report::new(ReportKind::Monthly, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn id(value: u32) -> WorkItemId {
        WorkItemId::new(value).unwrap()
    }

    fn live(snapshot: WorkItemSnapshot, rollup: Decimal) -> LiveWorkItem {
        LiveWorkItem {
            snapshot,
            remaining_work_rollup: rollup,
        }
    }

    #[test]
    fn estimation_drops_zero_zero_and_keeps_estimate_only() {
        let items = vec![
            live(WorkItemSnapshot::new(id(1), "Nothing yet", "New"), dec!(0)),
            live(
                WorkItemSnapshot::new(id(2), "Estimated", "Approved").with_estimate(5.0),
                dec!(3),
            ),
            live(WorkItemSnapshot::new(id(3), "Worked on", "Committed"), dec!(0)),
        ];
        let mut actuals = ActualHours::new();
        actuals.record(id(3), dec!(2.5));
        actuals.record(id(3), dec!(4));

        let report = merge_estimation(&items, &actuals);
        assert_eq!(report.len(), 2);

        let first = &report.rows()[0];
        assert_eq!(first.id, id(2));
        assert_eq!(first.estimated_effort, dec!(5));
        assert_eq!(first.actual_effort, dec!(0));
        assert_eq!(first.remaining_effort, dec!(3));

        assert_eq!(report.rows()[1].actual_effort, dec!(6.5));
        assert_eq!(report.rows()[1].label(ReportKind::Estimation), "3 (Worked on)");
    }

    #[test]
    fn monthly_matches_end_to_end_example() {
        let combined: BTreeMap<_, _> = [(id(501), dec!(40))].into_iter().collect();
        let snapshots = vec![WorkItemSnapshot::new(id(501), "Fix X", "Approved").with_estimate(20.0)];

        let report = merge_monthly(&combined, snapshots).unwrap();
        assert_eq!(report.len(), 1);
        let row = &report.rows()[0];
        assert_eq!(row.id, id(501));
        assert_eq!(row.title.as_deref(), Some("Fix X"));
        assert_eq!(row.state.as_deref(), Some("Approved"));
        assert_eq!(row.estimated_effort, dec!(20));
        assert_eq!(row.actual_effort, dec!(40));

        let cells: Vec<String> = row.cells(ReportKind::Monthly).iter().map(|c| c.to_string()).collect();
        assert_eq!(cells, vec!["501 - Fix X", "Approved", "20", "40"]);
    }

    #[test]
    fn monthly_sorts_by_title_ordinal() {
        let combined: BTreeMap<_, _> = [(id(1), dec!(1)), (id(2), dec!(2)), (id(3), dec!(3))]
            .into_iter()
            .collect();
        let snapshots = vec![
            WorkItemSnapshot::new(id(1), "beta", "New"),
            WorkItemSnapshot::new(id(2), "Zulu", "New"),
            WorkItemSnapshot::new(id(3), "Alpha", "New"),
        ];
        let report = merge_monthly(&combined, snapshots).unwrap();
        let titles: Vec<_> = report
            .rows()
            .iter()
            .map(|r| r.title.clone().unwrap())
            .collect();
        // Uppercase sorts before lowercase.
        assert_eq!(titles, vec!["Alpha", "Zulu", "beta"]);
    }

    #[test]
    fn monthly_rejects_missing_and_unexpected_snapshots() {
        let combined: BTreeMap<_, _> = [(id(7), dec!(8)), (id(8), dec!(4))].into_iter().collect();
        let err = merge_monthly(&combined, vec![WorkItemSnapshot::new(id(7), "Seven", "Done")]).unwrap_err();
        assert!(matches!(err, ReportError::MissingSnapshot { id: missing } if missing == id(8)));
        assert_eq!(
            err.to_string(),
            "Work item 8 has recorded effort but was not returned by the tracker"
        );

        let both = vec![
            WorkItemSnapshot::new(id(7), "Seven", "Done"),
            WorkItemSnapshot::new(id(8), "Eight", "Done"),
            WorkItemSnapshot::new(id(9), "Nine", "Done"),
        ];
        let err = merge_monthly(&combined, both).unwrap_err();
        assert!(matches!(err, ReportError::MissingActualEffort { id: missing } if missing == id(9)));
    }

    #[test]
    fn headers_follow_report_kind() {
        assert_eq!(ReportRequest::Estimation.kind().headers(), &ESTIMATION_HEADERS);
        let period = MonthPeriod::new(3, 2018).unwrap();
        assert_eq!(ReportRequest::Monthly { period }.kind().headers()[1], "State");
        assert_eq!(
            ReportRequest::Monthly { period }.to_string(),
            "monthly report for 2018-03"
        );
    }
}
