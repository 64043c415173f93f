// src/service.rs
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::task;
use tracing::{debug, error, info};

use crate::aggregate::{combine_developer_efforts, scan_directory_for_known_ids};
use crate::calendar::MonthPeriod;
use crate::config::ReportConfig;
use crate::diagnostics::{Diagnostics, Outcome};
use crate::error::{error_chain, AbortedRun, ReportError};
use crate::export::{export_report, write_transcript};
use crate::report::{merge_estimation, merge_monthly, Report, ReportRequest};
use crate::timesheet::{DeveloperEffortRecord, TimesheetParser};
use crate::tracker::{live_work_items_with_rollup, WorkItemTracker};
use crate::work_item_ref::WorkItemId;

/// Where a run reads from and writes to.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub input_dir: PathBuf,
    pub output_path: PathBuf,
    pub diagnostics_path: Option<PathBuf>,
    pub workbook_prefix: String,
}

impl ServiceSettings {
    pub fn from_config(config: &ReportConfig) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            output_path: config.output_path.clone(),
            diagnostics_path: config.diagnostics_path.clone(),
            workbook_prefix: config.workbook_prefix.clone(),
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub rows: usize,
    pub output_path: PathBuf,
    pub diagnostics: Diagnostics,
}

pub struct ReportService<T: WorkItemTracker> {
    tracker: T,
    parser: TimesheetParser,
    settings: ServiceSettings,
}

impl<T: WorkItemTracker> ReportService<T> {
    pub fn new(tracker: T, settings: ServiceSettings) -> Self {
        Self {
            tracker,
            parser: TimesheetParser::new(settings.workbook_prefix.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Ad hoc estimation: live items with rolled-up remaining work against
    /// every timesheet in the input directory.
    pub async fn create_estimate_for_existing_work_items(
        &self,
    ) -> Result<Outcome<Report>, AbortedRun> {
        let mut diagnostics = Diagnostics::new();
        diagnostics.info("Starting estimation of existing work items");

        match self.estimate(&mut diagnostics).await {
            Ok(report) => {
                diagnostics.info(format!(
                    "Finished estimation of existing work items with {} row(s)",
                    report.len()
                ));
                Ok(Outcome::new(report, diagnostics))
            }
            Err(e) => Err(abort(diagnostics, "estimation of existing work items", e)),
        }
    }

    async fn estimate(&self, diagnostics: &mut Diagnostics) -> Result<Report, ReportError> {
        let live = live_work_items_with_rollup(&self.tracker).await?;
        let known: HashSet<WorkItemId> = live.iter().map(|item| item.snapshot.id).collect();

        let input_dir = self.settings.input_dir.clone();
        let (actuals, scan_diagnostics) =
            task::spawn_blocking(move || scan_directory_for_known_ids(&input_dir, &known))
                .await??
                .into_parts();
        diagnostics.extend(scan_diagnostics);
        if actuals.is_empty() {
            info!("No timesheet row references a live work item");
        } else {
            debug!("Recorded effort for {} live work item(s)", actuals.len());
        }

        let report = merge_estimation(&live, &actuals);
        export_report(&report, &self.settings.output_path)?;
        Ok(report)
    }

    /// One record per developer workbook that has the month tab. The
    /// workbooks are read on the blocking pool.
    pub async fn efforts_for_month(
        &self,
        period: MonthPeriod,
    ) -> Result<Outcome<Vec<DeveloperEffortRecord>>, AbortedRun> {
        let parser = self.parser.clone();
        let input_dir = self.settings.input_dir.clone();
        match task::spawn_blocking(move || parser.efforts_for_month(&input_dir, period)).await {
            Ok(result) => result,
            Err(e) => Err(abort(
                Diagnostics::new(),
                "reading of performance sheet",
                ReportError::from(e),
            )),
        }
    }

    /// Month-end reconciliation of already parsed records.
    pub async fn create_report_for_month(
        &self,
        period: MonthPeriod,
        records: &[DeveloperEffortRecord],
    ) -> Result<Outcome<Report>, AbortedRun> {
        let mut diagnostics = Diagnostics::new();
        diagnostics.info(format!("Starting creation of report for {}", period));

        match self.monthly(records).await {
            Ok(report) => {
                diagnostics.info(format!(
                    "Finished creation of report for {} with {} row(s)",
                    period,
                    report.len()
                ));
                Ok(Outcome::new(report, diagnostics))
            }
            Err(e) => Err(abort(diagnostics, "creation of report", e)),
        }
    }

    async fn monthly(&self, records: &[DeveloperEffortRecord]) -> Result<Report, ReportError> {
        let combined = combine_developer_efforts(records);
        let ids: Vec<WorkItemId> = combined.keys().copied().collect();
        info!(
            "{} developer record(s) reference {} work item(s)",
            records.len(),
            ids.len()
        );

        let snapshots = if ids.is_empty() {
            Vec::new()
        } else {
            self.tracker.fetch_snapshots(&ids).await?
        };

        let report = merge_monthly(&combined, snapshots)?;
        export_report(&report, &self.settings.output_path)?;
        Ok(report)
    }

    /// Runs one request end to end. The transcript is written when a
    /// diagnostics path is configured, whether or not the run succeeds.
    pub async fn run(&self, request: ReportRequest) -> Result<RunSummary, AbortedRun> {
        info!("Running {} ({:?} columns)", request, request.kind());
        let result = match request {
            ReportRequest::Estimation => self.create_estimate_for_existing_work_items().await,
            ReportRequest::Monthly { period } => self.run_month(period).await,
        };

        match result {
            Ok(outcome) => {
                let (report, diagnostics) = outcome.into_parts();
                self.save_transcript(&diagnostics)
                    .map_err(|e| AbortedRun::new(diagnostics.clone(), e))?;
                Ok(RunSummary {
                    rows: report.len(),
                    output_path: self.settings.output_path.clone(),
                    diagnostics,
                })
            }
            Err(aborted) => {
                if let Err(e) = self.save_transcript(&aborted.diagnostics) {
                    error!("Failed to save diagnostics transcript: {}", e);
                }
                Err(aborted)
            }
        }
    }

    async fn run_month(&self, period: MonthPeriod) -> Result<Outcome<Report>, AbortedRun> {
        let (records, mut diagnostics) = self.efforts_for_month(period).await?.into_parts();
        match self.create_report_for_month(period, &records).await {
            Ok(outcome) => {
                let (report, report_diagnostics) = outcome.into_parts();
                diagnostics.extend(report_diagnostics);
                Ok(Outcome::new(report, diagnostics))
            }
            Err(mut aborted) => {
                diagnostics.extend(aborted.diagnostics);
                aborted.diagnostics = diagnostics;
                Err(aborted)
            }
        }
    }

    fn save_transcript(&self, diagnostics: &Diagnostics) -> Result<(), ReportError> {
        match &self.settings.diagnostics_path {
            Some(path) => write_transcript(diagnostics, path),
            None => Ok(()),
        }
    }
}

fn abort(mut diagnostics: Diagnostics, stage: &str, e: ReportError) -> AbortedRun {
    diagnostics.error(format!("Finished {} with exception:", stage));
    diagnostics.error(error_chain(&e));
    AbortedRun::new(diagnostics, e)
}
