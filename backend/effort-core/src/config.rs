// src/config.rs
use serde::Deserialize;
use std::path::PathBuf;

use crate::azure_devops::{AzureDevOpsConfig, DEFAULT_PROJECT};
use crate::timesheet::DEFAULT_WORKBOOK_PREFIX;

pub const ENV_PREFIX: &str = "EFFORT_REPORT_";
pub const DEFAULT_INPUT_DIR: &str = "./timesheets";
pub const DEFAULT_OUTPUT_PATH: &str = "./report.xlsx";
pub const DEFAULT_TRACKER_TIMEOUT_SECS: u64 = 30;

/// Settings read from `EFFORT_REPORT_*` variables (and `.env`). Command line
/// flags override them in the binary.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReportConfig {
    // Tracker
    #[serde(default)]
    pub tracker_url: String,
    #[serde(default)]
    pub tracker_token: String,
    #[serde(default = "default_project")]
    pub tracker_project: String,
    #[serde(default = "default_timeout")]
    pub tracker_timeout_secs: u64,

    // Files
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default)]
    pub diagnostics_path: Option<PathBuf>,
    #[serde(default = "default_workbook_prefix")]
    pub workbook_prefix: String,
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TRACKER_TIMEOUT_SECS
}

fn default_input_dir() -> PathBuf {
    PathBuf::from(DEFAULT_INPUT_DIR)
}

fn default_output_path() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_PATH)
}

fn default_workbook_prefix() -> String {
    DEFAULT_WORKBOOK_PREFIX.to_string()
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            tracker_url: String::new(),
            tracker_token: String::new(),
            tracker_project: default_project(),
            tracker_timeout_secs: default_timeout(),
            input_dir: default_input_dir(),
            output_path: default_output_path(),
            diagnostics_path: None,
            workbook_prefix: default_workbook_prefix(),
        }
    }
}

impl ReportConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }

    pub fn tracker_config(&self) -> AzureDevOpsConfig {
        AzureDevOpsConfig {
            organization_url: self.tracker_url.clone(),
            project: self.tracker_project.clone(),
            personal_access_token: self.tracker_token.clone(),
            timeout_secs: self.tracker_timeout_secs,
        }
    }
}
