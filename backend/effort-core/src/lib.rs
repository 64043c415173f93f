// src/lib.rs
//
// Reconciles developer timesheet workbooks against work-item tracker data
// and produces estimation and month-end effort reports.

pub mod aggregate;
pub mod azure_devops;
pub mod calendar;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod report;
pub mod service;
pub mod timesheet;
pub mod tracker;
pub mod work_item_ref;
pub mod workbook;


pub use aggregate::{combine_developer_efforts, scan_directory_for_known_ids, ActualHours};
pub use azure_devops::{AzureDevOpsClient, AzureDevOpsConfig};
pub use calendar::{expected_hours, expected_working_days, MonthPeriod, WorkingCalendar};
pub use config::ReportConfig;
pub use diagnostics::{Diagnostic, Diagnostics, Outcome, Severity};
pub use error::{AbortedRun, ReportError, ReportResult};
pub use export::{export_report, write_transcript, ExportFormat};
pub use report::{merge_estimation, merge_monthly, Report, ReportKind, ReportRequest, ReportRow};
pub use service::{ReportService, RunSummary, ServiceSettings};
pub use timesheet::{DeveloperEffortRecord, EffortEntry, TimesheetParser};
pub use tracker::{InMemoryTracker, LiveWorkItem, TrackerError, WorkItemSnapshot, WorkItemTracker};
pub use work_item_ref::{extract_known_reference, extract_reference, WorkItemId};
