// src/bin/make_results.rs
//
// Results processing CLI.
//
// Subcommands:
// - process <RUN_PATH>: collect run files, drop incomplete draw/seed pairs,
//   sum over seeds and write one long table per measure
// - columns <MEASURE>: list the wide column names a measure produces
//
// Usage:
//   cargo run -p strata --bin make_results -- process runs/2022_10_14/
//   cargo run -p strata --bin make_results -- process output.msgpack --single-run
//   cargo run -p strata --bin make_results -- columns deaths
//
// Logging is controlled by STRATA_LOG (default: info).

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use strata::pipeline::{process_results, OutputFormat, ProcessOptions};
use strata::{ColumnSchema, ResultsConfig};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    Json,
    Msgpack,
    Both,
}

impl From<FormatArg> for OutputFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Msgpack => OutputFormat::MessagePack,
            FormatArg::Both => OutputFormat::Both,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "make_results",
    about = "Aggregate stratified simulation outputs into long result tables",
    version
)]
struct Args {
    /// Results config YAML (defaults to the built-in study tables).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity: -v, -vv (overridden by STRATA_LOG)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process a run file or a directory of run files.
    Process {
        run_path: PathBuf,

        /// Input is a single non-parallel run (draw 0, seed 0, baseline).
        #[arg(long)]
        single_run: bool,

        /// Keep one row per random seed instead of summing over seeds.
        #[arg(long)]
        disaggregate_seeds: bool,

        /// Output directory (default: <RUN_PATH dir>/results).
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: FormatArg,
    },
    /// Print every column a measure produces, in schema order.
    Columns { measure: String },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ResultsConfig> {
    let config = match path {
        Some(p) => ResultsConfig::from_yaml_file(p)
            .with_context(|| format!("loading results config {}", p.display()))?,
        None => ResultsConfig::default(),
    };
    config
        .with_env_overrides()
        .context("applying STRATA_* environment overrides")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Process {
            run_path,
            single_run,
            disaggregate_seeds,
            output_dir,
            format,
        } => {
            let output_dir = output_dir.unwrap_or_else(|| {
                let base = if run_path.is_dir() {
                    run_path.clone()
                } else {
                    run_path
                        .parent()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("."))
                };
                base.join("results")
            });
            let options = ProcessOptions {
                single_run,
                disaggregate_seeds,
                exclude: Some(output_dir.clone()),
            };

            let started = Instant::now();
            let (data, summary) = process_results(&run_path, &config, &options)
                .with_context(|| format!("processing {}", run_path.display()))?;
            let manifest = data
                .dump(&output_dir, format.into())
                .with_context(|| format!("writing results to {}", output_dir.display()))?;

            println!(
                "make_results | files={} loaded={} skipped={} kept={} groups={} tables={} rows={} | {:.2}s",
                summary.files,
                summary.loaded,
                summary.skipped.len(),
                summary.kept,
                summary.groups,
                manifest.tables.len(),
                data.total_rows(),
                started.elapsed().as_secs_f64()
            );
            for skipped in &summary.skipped {
                eprintln!("  skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            if !summary.excluded_columns.is_empty() {
                eprintln!(
                    "  {} non-count columns were excluded from seed aggregation",
                    summary.excluded_columns.len()
                );
            }
            println!("Wrote {}", output_dir.display());
        }
        Command::Columns { measure } => {
            let schema = ColumnSchema::new(&config).context("building column schema")?;
            for column in schema
                .columns_for_name(&measure)
                .with_context(|| format!("listing columns of '{measure}'"))?
            {
                println!("{column}");
            }
        }
    }
    Ok(())
}
