// src/error.rs
use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::tracker::TrackerError;
use crate::work_item_ref::WorkItemId;

// --- Fatal Error Taxonomy ---

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid target period: month {month}, year {year}")]
    InvalidPeriod { month: u32, year: i32 },

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Failed to read workbook {path:?}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("Work item tracker error")]
    Tracker(#[from] TrackerError),

    #[error("Failed to write report: {0}")]
    Export(String),

    #[error("No actual effort recorded for work item {id}, although its snapshot was requested")]
    MissingActualEffort { id: WorkItemId },

    #[error("Work item {id} has recorded effort but was not returned by the tracker")]
    MissingSnapshot { id: WorkItemId },

    #[error("Timesheet scan did not complete")]
    ScanTask(#[from] tokio::task::JoinError),
}

pub type ReportResult<T> = Result<T, ReportError>;

// Helper to create context-aware IO errors
pub(crate) fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> ReportError {
    ReportError::Io {
        source,
        context: context.into(),
    }
}

impl From<rust_xlsxwriter::XlsxError> for ReportError {
    fn from(value: rust_xlsxwriter::XlsxError) -> Self {
        Self::Export(value.to_string())
    }
}

impl From<csv::Error> for ReportError {
    fn from(value: csv::Error) -> Self {
        Self::Export(value.to_string())
    }
}

/// A batch that failed part-way. The diagnostics gathered up to the failure,
/// including the terminating entry, travel with the error.
#[derive(Error, Debug)]
#[error("Run aborted: {source}")]
pub struct AbortedRun {
    pub diagnostics: Diagnostics,
    #[source]
    pub source: ReportError,
}

impl AbortedRun {
    pub fn new(diagnostics: Diagnostics, source: ReportError) -> Self {
        Self {
            diagnostics,
            source,
        }
    }
}

/// Renders an error followed by its whole `source()` chain, one cause per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str("\n  caused by: ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}
