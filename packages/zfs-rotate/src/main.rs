use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

mod backend;
mod config;
mod naming;
mod period;
mod retention;
mod rotation;
mod walker;

use backend::{DryRun, SnapshotBackend, ZfsCli};
use config::Config;
use naming::NamingCodec;
use period::Period;
use retention::{PolicyError, RetentionPolicy};
use rotation::Rotator;
use walker::DatasetTree;

/// Exit status when at least one dataset failed
const EXIT_PARTIAL_FAILURE: u8 = 1;
/// Exit status when the run could not start
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "zfs-rotate")]
#[command(about = "Grandfather-father-son snapshot rotation for ZFS", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create this period's snapshot and prune old ones
    Rotate(RotateArgs),

    /// Print the datasets a rotation would visit
    Datasets(SelectArgs),
}

#[derive(Args, Debug)]
struct SelectArgs {
    /// Dataset or volume to rotate (repeatable; default: every top-level dataset)
    #[arg(short, long = "dataset", alias = "vdev")]
    datasets: Vec<String>,

    /// Include every descendant of the selected datasets
    #[arg(short, long)]
    recursive: bool,

    /// Path to the zfs binary
    #[arg(long)]
    zfs_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RotateArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Retention period to rotate
    #[arg(short, long, value_enum, default_value_t = Period::Hourly)]
    period: Period,

    /// Number of snapshots of the selected period to keep
    #[arg(short, long, allow_negative_numbers = true)]
    keep: Option<i64>,

    /// Keep-count for any period, as PERIOD=COUNT (repeatable)
    #[arg(long = "retain", value_name = "PERIOD=COUNT", value_parser = parse_retain)]
    retain: Vec<(Period, i64)>,

    /// Prefix of the snapshot names this tool owns
    #[arg(long)]
    prefix: Option<String>,

    /// Label appended to the snapshot created by this run
    #[arg(long)]
    suffix: Option<String>,

    /// Maximum number of datasets rotated at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stamp snapshots in UTC instead of local time
    #[arg(long)]
    utc: bool,

    /// Log what would be created and destroyed without changing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_retain(value: &str) -> Result<(Period, i64), String> {
    use clap::ValueEnum;

    let (period, count) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PERIOD=COUNT, got '{value}'"))?;
    let period = Period::from_str(period.trim(), true)?;
    let count = count
        .trim()
        .parse()
        .map_err(|e| format!("invalid count '{count}': {e}"))?;
    Ok((period, count))
}

/// Merge config file counts with command line overrides, in that order
fn build_policy(config: &Config, args: &RotateArgs) -> Result<RetentionPolicy, PolicyError> {
    let mut counts = config.retention.clone();
    for (period, count) in &args.retain {
        counts.set(*period, *count);
    }
    if let Some(keep) = args.keep {
        counts.set(args.period, keep);
    }

    RetentionPolicy::from_counts(counts.counts())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Datasets(args) => {
            let backend = ZfsCli::new(args.zfs_path.as_ref().unwrap_or(&config.zfs_path));
            let tree = DatasetTree::load(&backend)
                .await
                .context("Failed to list datasets")?;

            let selection = tree.select(&args.datasets, args.recursive);
            for dataset in &selection.datasets {
                println!("{}", dataset.path());
            }
            for missing in &selection.missing {
                eprintln!("{}: dataset not found", missing);
            }

            Ok(if selection.missing.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL_FAILURE)
            })
        }
        Commands::Rotate(args) => rotate(config, args).await,
    }
}

async fn rotate(config: Config, args: RotateArgs) -> Result<ExitCode> {
    // Everything that can be validated is validated before the backend is touched.
    let policy = build_policy(&config, &args)?;
    let codec = NamingCodec::new(args.prefix.clone().unwrap_or(config.prefix.clone()))?;
    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    let utc = args.utc || config.utc;

    let zfs = ZfsCli::new(args.select.zfs_path.as_ref().unwrap_or(&config.zfs_path));
    tracing::debug!("Using {}", zfs.binary().display());
    let backend: Box<dyn SnapshotBackend> = if args.dry_run {
        tracing::info!("Dry run: no snapshots will be created or destroyed");
        Box::new(DryRun::new(zfs))
    } else {
        Box::new(zfs)
    };

    let tree = DatasetTree::load(backend.as_ref())
        .await
        .context("Failed to list datasets")?;
    let selection = tree.select(&args.select.datasets, args.select.recursive);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after in-flight commands finish");
            on_signal.cancel();
        }
    });

    let now = if utc {
        chrono::Utc::now().naive_utc()
    } else {
        chrono::Local::now().naive_local()
    };

    let report = Rotator::new(backend.as_ref(), codec, policy, args.period)
        .with_suffix(args.suffix.clone())
        .with_concurrency(concurrency)
        .with_cancellation(cancel)
        .run(selection, now)
        .await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!("{}", report);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL_FAILURE)
    })
}
