use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Consolidate monthly exports and serve analytics", long_about = None)]
pub struct Cli {
    /// Root directory for project storage
    #[arg(long = "data-dir", global = true, default_value = "data")]
    pub data_dir: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new project
    Create(CreateArgs),
    /// Delete a project and all of its storage
    Drop(DropArgs),
    /// List projects
    Projects,
    /// Upload one or more Excel/CSV files into a project
    Upload(UploadArgs),
    /// List a project's upload ledger
    Uploads(ProjectArgs),
    /// Undo one upload, removing exactly the rows it contributed
    Undo(UndoArgs),
    /// Delete a project's consolidated data and upload ledger
    Reset(ProjectArgs),
    /// Show or change a project's settings
    Settings(SettingsArgs),
    /// Dashboard stats: record counts plus top-10 breakdowns
    Dashboard(DashboardArgs),
    /// Top-N frequency breakdown for one column
    Top(TopArgs),
    /// Monthly trend/movement series grouped by a column
    Trend(TrendArgs),
    /// Compare a column's value counts between two periods
    Compare(CompareArgs),
    /// Compare a group-by aggregation between two periods
    Advanced(AdvancedArgs),
    /// Per-column statistics (type, fill rate, distinct values)
    Columns(ColumnsArgs),
    /// Download the consolidated dataset as xlsx or csv
    Export(ExportArgs),
    /// Run the audit checks over the consolidated dataset
    Audit(ProjectArgs),
    /// Show a project's action history
    History(ProjectArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Project name
    pub name: String,
}

#[derive(Debug, Args)]
pub struct DropArgs {
    /// Project name
    pub name: String,
}

#[derive(Debug, Args)]
pub struct ProjectArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Files to consolidate, in order
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Column mappings of the form 'incoming=canonical' (repeatable)
    #[arg(long = "map", action = clap::ArgAction::Append)]
    pub mappings: Vec<String>,
    /// Character encoding of CSV inputs (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct UndoArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Upload id from the ledger
    #[arg(long = "upload-id")]
    pub upload_id: uuid::Uuid,
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Designated date column for filtering and trends
    #[arg(long = "date-column")]
    pub date_column: Option<String>,
    /// Dashboard columns of the form 'column[=display name]' (repeatable)
    #[arg(long = "top", action = clap::ArgAction::Append)]
    pub top_columns: Vec<String>,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Period start (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,
    /// Period end (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct TopArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Column to count
    #[arg(short = 'C', long)]
    pub column: String,
    /// How many values to return
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: usize,
    /// Period start (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,
    /// Period end (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,
    /// Write an xlsx workbook with the ranked rows instead of printing
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TrendArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Column to group by
    #[arg(short = 'g', long = "group")]
    pub group_column: String,
    /// Aggregation: count, sum, average, min, max
    #[arg(long = "agg", default_value = "count")]
    pub aggregation: String,
    /// Value column (required for every aggregation except count)
    #[arg(long = "value")]
    pub value_column: Option<String>,
    /// Keep the top N groups by total aggregate
    #[arg(long = "top-n")]
    pub top_n: Option<usize>,
    /// Explicit group list (repeatable; overrides --top-n)
    #[arg(long = "group-value", action = clap::ArgAction::Append)]
    pub groups: Vec<String>,
    /// Period start (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,
    /// Period end (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,
    /// Baseline month (YYYY-MM) for the movement series
    #[arg(long = "baseline")]
    pub baseline_month: Option<String>,
    /// Write the trend workbook to this path instead of printing
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Column to compare
    #[arg(short = 'C', long)]
    pub column: String,
    /// Period 1 start (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start1: NaiveDate,
    /// Period 1 end (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end1: NaiveDate,
    /// Period 2 start (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start2: NaiveDate,
    /// Period 2 end (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end2: NaiveDate,
    /// Write the comparison workbook to this path instead of printing
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct AdvancedArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Column to group by
    #[arg(short = 'g', long = "group")]
    pub group_column: String,
    /// Numeric value column to aggregate
    #[arg(long = "value")]
    pub value_column: String,
    /// Aggregation: count, sum, average, min, max
    #[arg(long = "agg", default_value = "sum")]
    pub aggregation: String,
    /// Period 1 start (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start1: NaiveDate,
    /// Period 1 end (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end1: NaiveDate,
    /// Period 2 start (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start2: NaiveDate,
    /// Period 2 end (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end2: NaiveDate,
    /// Write the analysis workbook to this path instead of printing
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Write the column-analysis workbook to this path instead of printing
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Project name
    #[arg(short, long)]
    pub project: String,
    /// Destination file
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// Output format: xlsx or csv (defaults from the file extension)
    #[arg(long)]
    pub format: Option<String>,
    /// Period start (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,
    /// Period end (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("'{value}' is not a YYYY-MM-DD date"))
}
