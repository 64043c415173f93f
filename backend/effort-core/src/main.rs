// src/main.rs
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use effort_core::{
    write_transcript, AzureDevOpsClient, MonthPeriod, ReportConfig, ReportRequest, ReportService,
    ServiceSettings, TimesheetParser,
};

// --- Command line ---

#[derive(Parser, Debug)]
#[command(
    name = "effort-report",
    version,
    about = "Reconciles timesheet workbooks against work items and writes effort reports"
)]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `EFFORT_REPORT_*` settings.
#[derive(Args, Debug)]
struct PathArgs {
    /// Directory holding the timesheet workbooks
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// Report file; the extension (.xlsx or .csv) selects the format
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    /// Where to write the diagnostics transcript
    #[arg(long, global = true)]
    diagnostics: Option<PathBuf>,

    /// Tracker project to query
    #[arg(long, global = true)]
    project: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimated, actual and remaining effort of every live work item
    Estimate,
    /// Month-end report of the work items referenced in one month's timesheets
    Monthly(PeriodArgs),
    /// Parse one month's timesheets and print the per-developer hours as JSON
    Efforts(PeriodArgs),
}

#[derive(Args, Debug)]
struct PeriodArgs {
    /// Month, 1-12
    #[arg(long)]
    month: u32,
    /// Four digit year
    #[arg(long)]
    year: i32,
}

impl PeriodArgs {
    fn period(&self) -> Result<MonthPeriod> {
        MonthPeriod::new(self.month, self.year).context("Invalid target month")
    }
}

fn apply_overrides(mut config: ReportConfig, paths: PathArgs) -> ReportConfig {
    if let Some(dir) = paths.input_dir {
        config.input_dir = dir;
    }
    if let Some(output) = paths.output {
        config.output_path = output;
    }
    if let Some(diagnostics) = paths.diagnostics {
        config.diagnostics_path = Some(diagnostics);
    }
    if let Some(project) = paths.project {
        config.tracker_project = project;
    }
    config
}

// --- Main Application Logic ---

#[tokio::main]
async fn main() -> ExitCode {
    // --- Setup ---
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ReportConfig::from_env().context("Failed to read EFFORT_REPORT_* settings")?;
    let config = apply_overrides(config, cli.paths);
    info!(
        "Input directory: {}, output: {}",
        config.input_dir.display(),
        config.output_path.display()
    );

    match cli.command {
        Command::Efforts(args) => {
            let period = args.period()?;
            tokio::task::spawn_blocking(move || print_efforts(&config, period))
                .await
                .context("Timesheet reading task failed")?
        }
        Command::Estimate => run_report(&config, ReportRequest::Estimation).await,
        Command::Monthly(args) => {
            let period = args.period()?;
            run_report(&config, ReportRequest::Monthly { period }).await
        }
    }
}

async fn run_report(config: &ReportConfig, request: ReportRequest) -> Result<()> {
    let tracker = AzureDevOpsClient::new(config.tracker_config())
        .context("Failed to set up the work item tracker client")?;
    let service = ReportService::new(tracker, ServiceSettings::from_config(config));

    let summary = service
        .run(request)
        .await
        .with_context(|| format!("Failed to create {}", request))?;

    info!(
        "Created {} with {} row(s) at {}",
        request,
        summary.rows,
        summary.output_path.display()
    );
    if let Some(path) = &config.diagnostics_path {
        info!("Diagnostics written to {}", path.display());
    }
    Ok(())
}

fn print_efforts(config: &ReportConfig, period: MonthPeriod) -> Result<()> {
    let parser = TimesheetParser::new(config.workbook_prefix.clone());
    let result = parser.efforts_for_month(&config.input_dir, period);

    let diagnostics = match &result {
        Ok(outcome) => &outcome.diagnostics,
        Err(aborted) => &aborted.diagnostics,
    };
    if let Some(path) = &config.diagnostics_path {
        if let Err(e) = write_transcript(diagnostics, path) {
            warn!("Failed to save diagnostics transcript: {}", e);
        }
    }

    let records = result
        .with_context(|| format!("Failed to read timesheets for {}", period))?
        .value;
    let json = serde_json::to_string_pretty(&records).context("Failed to serialize records")?;
    println!("{}", json);
    Ok(())
}
