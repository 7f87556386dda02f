pub mod analytics;
pub mod audit;
pub mod cache;
pub mod cli;
pub mod consolidate;
pub mod data;
pub mod engine;
pub mod error;
pub mod export;
pub mod optimize;
pub mod reader;
pub mod store;
pub mod table;
pub mod writer;

use std::{env, fs, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};
use serde::Serialize;

use crate::{
    analytics::{Aggregation, Period, TrendRequest},
    cli::{Cli, Commands},
    consolidate::ColumnMapping,
    engine::{Engine, ExportFormat},
    store::TopColumn,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("consolidata", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let engine = Engine::new(&cli.data_dir)
        .with_context(|| format!("Opening data directory {:?}", cli.data_dir))?;

    match cli.command {
        Commands::Create(args) => {
            engine.create_project(&args.name)?;
            Ok(())
        }
        Commands::Drop(args) => {
            engine.delete_project(&args.name)?;
            Ok(())
        }
        Commands::Projects => print_json(&engine.list_projects()?),
        Commands::Upload(args) => handle_upload(&engine, &args),
        Commands::Uploads(args) => print_json(&engine.uploads(&args.project)?),
        Commands::Undo(args) => {
            let removed = engine.undo_upload(&args.project, args.upload_id)?;
            info!("Upload deleted; {removed} rows removed from consolidated data");
            Ok(())
        }
        Commands::Reset(args) => {
            engine.reset(&args.project)?;
            Ok(())
        }
        Commands::Settings(args) => handle_settings(&engine, &args),
        Commands::Dashboard(args) => {
            let period = optional_period(args.start, args.end)?;
            print_json(&engine.dashboard(&args.project, period)?)
        }
        Commands::Top(args) => handle_top(&engine, &args),
        Commands::Trend(args) => handle_trend(&engine, &args),
        Commands::Compare(args) => handle_compare(&engine, &args),
        Commands::Advanced(args) => handle_advanced(&engine, &args),
        Commands::Columns(args) => handle_columns(&engine, &args),
        Commands::Export(args) => handle_export(&engine, &args),
        Commands::Audit(args) => print_json(&engine.run_audit_checks(&args.project)?),
        Commands::History(args) => print_json(&engine.audit_trail(&args.project)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn optional_period(
    start: Option<chrono::NaiveDate>,
    end: Option<chrono::NaiveDate>,
) -> Result<Option<Period>> {
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(Period::new(start, end))),
        (None, None) => Ok(None),
        _ => Err(anyhow!("--start and --end must be given together")),
    }
}

fn handle_upload(engine: &Engine, args: &cli::UploadArgs) -> Result<()> {
    let mapping = if args.mappings.is_empty() {
        None
    } else {
        Some(ColumnMapping::parse_pairs(&args.mappings)?)
    };
    let encoding = reader::resolve_encoding(args.input_encoding.as_deref())?;
    for input in &args.inputs {
        let record = engine
            .upload_file_with(&args.project, input, mapping.as_ref(), encoding)
            .with_context(|| format!("Uploading {input:?}"))?;
        info!(
            "✓ {} -> {} rows (upload {})",
            record.original_name, record.rows, record.id
        );
    }
    Ok(())
}

fn handle_settings(engine: &Engine, args: &cli::SettingsArgs) -> Result<()> {
    if args.date_column.is_none() && args.top_columns.is_empty() {
        return print_json(&engine.settings(&args.project)?);
    }
    let mut settings = engine.settings(&args.project)?;
    if let Some(date_column) = &args.date_column {
        settings.date_column = date_column.clone();
    }
    if !args.top_columns.is_empty() {
        settings.top_columns = args
            .top_columns
            .iter()
            .map(|spec| match spec.split_once('=') {
                Some((column, display)) => TopColumn {
                    column: column.trim().to_string(),
                    display_name: display.trim().to_string(),
                },
                None => TopColumn {
                    column: spec.trim().to_string(),
                    display_name: spec.trim().to_string(),
                },
            })
            .collect();
    }
    engine.update_settings(&args.project, &settings)?;
    info!("Settings saved for \"{}\"", args.project);
    Ok(())
}

fn handle_top(engine: &Engine, args: &cli::TopArgs) -> Result<()> {
    let period = optional_period(args.start, args.end)?;
    match &args.output {
        Some(path) => {
            let bytes = engine.export_top_rows(&args.project, &args.column, &args.column, period)?;
            fs::write(path, bytes.as_slice())
                .with_context(|| format!("Writing workbook to {path:?}"))?;
            info!("Wrote {} bytes to {path:?}", bytes.len());
            Ok(())
        }
        None => print_json(&engine.top_n(&args.project, &args.column, args.count, period)?),
    }
}

fn trend_request(args: &cli::TrendArgs) -> Result<TrendRequest> {
    Ok(TrendRequest {
        group_column: args.group_column.clone(),
        aggregation: args.aggregation.parse::<Aggregation>()?,
        value_column: args.value_column.clone(),
        top_n: args.top_n,
        groups: (!args.groups.is_empty()).then(|| args.groups.clone()),
        period: optional_period(args.start, args.end)?,
        baseline_month: args.baseline_month.clone(),
    })
}

fn handle_trend(engine: &Engine, args: &cli::TrendArgs) -> Result<()> {
    let request = trend_request(args)?;
    match &args.output {
        Some(path) => {
            let bytes = engine.export_trend(&args.project, &request)?;
            fs::write(path, bytes.as_slice())
                .with_context(|| format!("Writing workbook to {path:?}"))?;
            info!("Wrote {} bytes to {path:?}", bytes.len());
            Ok(())
        }
        None => print_json(&engine.trend(&args.project, &request)?),
    }
}

fn handle_compare(engine: &Engine, args: &cli::CompareArgs) -> Result<()> {
    let period1 = Period::new(args.start1, args.end1);
    let period2 = Period::new(args.start2, args.end2);
    match &args.output {
        Some(path) => {
            let bytes =
                engine.export_comparison(&args.project, &args.column, period1, period2)?;
            fs::write(path, bytes.as_slice())
                .with_context(|| format!("Writing workbook to {path:?}"))?;
            info!("Wrote {} bytes to {path:?}", bytes.len());
            Ok(())
        }
        None => print_json(&engine.compare(&args.project, &args.column, period1, period2)?),
    }
}

fn handle_advanced(engine: &Engine, args: &cli::AdvancedArgs) -> Result<()> {
    let aggregation = args.aggregation.parse::<Aggregation>()?;
    let period1 = Period::new(args.start1, args.end1);
    let period2 = Period::new(args.start2, args.end2);
    match &args.output {
        Some(path) => {
            let bytes = engine.export_grouped_comparison(
                &args.project,
                &args.group_column,
                &args.value_column,
                aggregation,
                period1,
                period2,
            )?;
            fs::write(path, bytes.as_slice())
                .with_context(|| format!("Writing workbook to {path:?}"))?;
            info!("Wrote {} bytes to {path:?}", bytes.len());
            Ok(())
        }
        None => print_json(&engine.compare_grouped(
            &args.project,
            &args.group_column,
            &args.value_column,
            aggregation,
            period1,
            period2,
        )?),
    }
}

fn handle_columns(engine: &Engine, args: &cli::ColumnsArgs) -> Result<()> {
    match &args.output {
        Some(path) => {
            let bytes = engine.export_column_stats(&args.project)?;
            fs::write(path, bytes.as_slice())
                .with_context(|| format!("Writing workbook to {path:?}"))?;
            info!("Wrote {} bytes to {path:?}", bytes.len());
            Ok(())
        }
        None => print_json(&engine.column_stats(&args.project)?),
    }
}

fn handle_export(engine: &Engine, args: &cli::ExportArgs) -> Result<()> {
    let format = match args.format.as_deref() {
        Some("xlsx") => ExportFormat::Xlsx,
        Some("csv") => ExportFormat::Csv,
        Some(other) => return Err(anyhow!("Unknown export format '{other}'")),
        None => match args.output.extension().and_then(|e| e.to_str()) {
            Some("csv") => ExportFormat::Csv,
            _ => ExportFormat::Xlsx,
        },
    };
    let period = optional_period(args.start, args.end)?;
    let bytes = engine.export_consolidated(&args.project, format, period)?;
    fs::write(&args.output, bytes.as_slice())
        .with_context(|| format!("Writing export to {:?}", args.output))?;
    info!("Wrote {} bytes to {:?}", bytes.len(), args.output);
    Ok(())
}
