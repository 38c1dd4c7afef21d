use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use resultdb_cache::app::{App, SyncOptions};
use resultdb_cache::config::ConfigLoader;
use resultdb_cache::dataset::ViewOptions;
use resultdb_cache::domain::{AggregationLevel, ExperimentSet, RemotePartition};
use resultdb_cache::error::CacheError;
use resultdb_cache::fetch::{HttpPartitionSource, PartitionSource};
use resultdb_cache::output::{JsonOutput, LogSink};
use resultdb_cache::paths::sanitize;
use resultdb_cache::store::Cache;
use resultdb_cache::timestamp;

#[derive(Parser)]
#[command(name = "rdbc")]
#[command(about = "Local cache for result-db parquet partitions")]
#[command(version, author)]
struct Cli {
    /// Path to a JSON config file (defaults to ./rdbc.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Override the cache root directory
    #[arg(long, global = true)]
    cache_root: Option<String>,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download missing partitions listed in a manifest")]
    Sync(SyncArgs),
    #[command(about = "Summarize the filtered cached view of a level")]
    Show(ShowArgs),
    #[command(about = "Delete cached files of experiments, or the whole cache")]
    Prune(PruneArgs),
    #[command(about = "Print the local form of a remote partition path")]
    Sanitize { path: String },
    #[command(about = "Check whether a partition is cached")]
    Exists(ExistsArgs),
    #[command(about = "Normalize a timestamp to UTC")]
    Timestamp { value: String },
}

#[derive(Args)]
struct SyncArgs {
    #[arg(long)]
    level: AggregationLevel,

    /// JSON array of {"path": ..., "url": ...} objects
    #[arg(long)]
    manifest: String,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(long)]
    level: AggregationLevel,

    #[arg(long = "experiment")]
    experiments: Vec<String>,

    #[arg(long)]
    max_q_value: Option<f64>,

    #[arg(long)]
    max_global_q_value: Option<f64>,

    #[arg(long)]
    include_decoys: bool,

    #[arg(long = "include")]
    include_columns: Vec<String>,

    #[arg(long = "exclude")]
    exclude_columns: Vec<String>,

    #[arg(long)]
    exclude_array_columns: bool,
}

#[derive(Args)]
struct PruneArgs {
    #[arg(long, required_unless_present = "all")]
    level: Option<AggregationLevel>,

    #[arg(long = "experiment")]
    experiments: Vec<String>,

    #[arg(long, conflicts_with_all = ["level", "experiments"])]
    all: bool,
}

#[derive(Args)]
struct ExistsArgs {
    #[arg(long)]
    level: AggregationLevel,

    /// Remote or already sanitized partition path
    #[arg(long)]
    path: String,
}

struct NopSource;

impl PartitionSource for NopSource {
    fn download(&self, url: &str, _destination: &Path) -> Result<u64, CacheError> {
        Err(CacheError::DownloadHttp {
            url: url.to_string(),
            message: "downloads are not available for this command".to_string(),
        })
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CacheError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CacheError) -> u8 {
    match error {
        CacheError::InvalidPath(_)
        | CacheError::InvalidLevel(_)
        | CacheError::MissingColumn { .. }
        | CacheError::EmptyTimestamp
        | CacheError::UnrecognizedFormat { .. }
        | CacheError::InvalidDate { .. }
        | CacheError::InvalidType(_) => 2,
        CacheError::DownloadHttp { .. } | CacheError::DownloadStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(root) = &cli.cache_root {
        config.cache_root = root.into();
    }

    let filter = if cli.debug || config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cache = Cache::new(&config);

    match cli.command {
        Commands::Sync(args) => run_sync(args, cache),
        Commands::Show(args) => run_show(args, cache),
        Commands::Prune(args) => run_prune(args, cache),
        Commands::Sanitize { path } => {
            println!("{}", sanitize(&path)?);
            Ok(())
        }
        Commands::Exists(args) => {
            let relative = sanitize(&args.path).unwrap_or(args.path);
            let present = cache.exists(args.level, &relative);
            JsonOutput::print_json(&serde_json::json!({
                "level": args.level.to_string(),
                "path": relative,
                "exists": present,
            }))
            .into_diagnostic()
        }
        Commands::Timestamp { value } => {
            println!("{}", timestamp::normalize(value)?);
            Ok(())
        }
    }
}

fn run_sync(args: SyncArgs, cache: Cache) -> miette::Result<()> {
    let content = fs::read_to_string(&args.manifest).into_diagnostic()?;
    let partitions: Vec<RemotePartition> = serde_json::from_str(&content).into_diagnostic()?;
    let source = HttpPartitionSource::new()?;
    let app = App::new(cache, source);
    let options = SyncOptions {
        force: args.force,
        dry_run: args.dry_run,
    };
    let result = app.sync(args.level, &partitions, &options, &LogSink)?;
    JsonOutput::print_sync(&result).into_diagnostic()
}

fn run_show(args: ShowArgs, cache: Cache) -> miette::Result<()> {
    let defaults = ViewOptions::default();
    let options = ViewOptions {
        max_q_value: args.max_q_value.or(defaults.max_q_value),
        max_global_q_value: args.max_global_q_value.or(defaults.max_global_q_value),
        include_decoys: args.include_decoys,
        include_columns: (!args.include_columns.is_empty()).then_some(args.include_columns),
        exclude_columns: args.exclude_columns,
        exclude_array_columns: args.exclude_array_columns,
    };
    let experiments: ExperimentSet = args.experiments.into_iter().collect();
    let app = App::new(cache, NopSource);
    let result = app.show(
        args.level,
        (!experiments.is_empty()).then_some(&experiments),
        &options,
    )?;
    JsonOutput::print_show(&result).into_diagnostic()
}

fn run_prune(args: PruneArgs, cache: Cache) -> miette::Result<()> {
    let app = App::new(cache, NopSource);
    let result = match (args.all, args.level) {
        (true, _) => app.prune_all(&LogSink)?,
        (false, Some(level)) => {
            let experiments: ExperimentSet = args.experiments.into_iter().collect();
            app.prune(&experiments, level, &LogSink)?
        }
        (false, None) => {
            return Err(miette::Report::msg("--level or --all is required"));
        }
    };
    JsonOutput::print_prune(&result).into_diagnostic()
}
