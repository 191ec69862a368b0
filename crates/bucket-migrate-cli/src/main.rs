//! bucket-migrate CLI - staged table migration through object storage.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use bucket_migrate::config::validation;
use bucket_migrate::core::ObjectStore;
use bucket_migrate::load::read_reject_log;
use bucket_migrate::orchestrator::{connect_source, connect_target, open_reject_sink, open_staging};
use bucket_migrate::{
    health_check, AccessGrant, Config, ConfigArgs, Extractor, Format, FsObjectStore,
    LargeTextPolicy, Loader, Locator, MigrateError, Pipeline, StagingLocation,
};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "bucket-migrate")]
#[command(about = "Staged table migration through object storage")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (flags override its values)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

/// Job settings shared by run, extract and load.
#[derive(Args, Debug, Default)]
struct JobArgs {
    /// Source connection URL
    #[arg(long)]
    source: Option<String>,

    /// Target connection URL
    #[arg(long)]
    target: Option<String>,

    /// Target table, optionally schema-qualified
    #[arg(long)]
    target_table: Option<String>,

    /// Extraction query
    #[arg(long)]
    query: Option<String>,

    /// Staging location: <bucket directory>/<name or pattern>
    #[arg(long)]
    staging_location: Option<String>,

    /// Staging format: delimited or structured
    #[arg(long)]
    format: Option<Format>,

    /// Rejected records tolerated before the load is rolled back
    #[arg(long)]
    reject_limit: Option<u64>,

    /// Maximum records per shard
    #[arg(long)]
    shard_size: Option<u64>,

    /// Large-text columns in delimited output: refuse, project-out or force
    #[arg(long)]
    large_text: Option<LargeTextPolicy>,

    /// JSON Lines file receiving rejected records
    #[arg(long)]
    reject_log: Option<PathBuf>,

    /// Truncate the target inside the load transaction
    #[arg(long)]
    truncate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, load and reconcile
    Run {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Extract the source query into staged shards
    Extract {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Load staged shards into the target table
    Load {
        /// Object name or wildcard pattern inside the bucket
        /// [default: every shard of the staging destination]
        #[arg(long)]
        locator: Option<String>,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Test source, target and staging connectivity
    HealthCheck {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Print the records of a reject log
    Rejects {
        /// Reject log to read
        #[arg(long)]
        reject_log: PathBuf,
    },

    /// List staged objects matching a location
    List {
        /// <bucket directory>/<name or pattern>
        #[arg(long)]
        staging_location: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    match cli.command {
        Commands::Run { ref job } => {
            let config = load_config(cli.config.as_ref(), job)?;
            validation::require_extract(&config)?;
            validation::require_load(&config)?;
            let cancel_token = setup_signal_handler().await?;
            let pipeline = Pipeline::connect(config).await?;
            let report = pipeline.run(&cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nMigration {}!", report.status);
                println!("  Source records: {}", report.source_count);
                println!("  Committed: {}", report.target_count);
                println!("  Rejected: {}", report.rejected_count);
                println!(
                    "  Extract: {:.2}s, Load: {:.2}s",
                    report.elapsed_extract.as_secs_f64(),
                    report.elapsed_load.as_secs_f64()
                );
            }
            Ok(ExitCode::from(report.status.exit_code()))
        }

        Commands::Extract { ref job } => {
            let config = load_config(cli.config.as_ref(), job)?;
            validation::require_extract(&config)?;
            let cancel_token = setup_signal_handler().await?;
            let source = connect_source(&config).await?;
            let store = open_staging(&config);
            let artifact = Extractor::new(source.as_ref(), store.as_ref())
                .extract(&config.extract_request(), &cancel_token)
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&artifact)?);
            } else {
                println!("\nExtraction completed!");
                println!("  Records: {} (source count {})", artifact.records_written, artifact.source_count);
                println!("  Shards: {}", artifact.shards.len());
                for shard in &artifact.shards {
                    println!("    {} ({} records, {} bytes)", shard.name, shard.records, shard.bytes);
                }
                if !artifact.dropped_columns.is_empty() {
                    println!("  Dropped columns: {}", artifact.dropped_columns.join(", "));
                }
                println!("  Duration: {:.2}s", artifact.elapsed.as_secs_f64());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Load { ref locator, ref job } => {
            let config = load_config(cli.config.as_ref(), job)?;
            validation::require_load(&config)?;
            let locator = match locator {
                Some(l) => Locator::parse(l),
                None => config.staged_locator(),
            };
            let cancel_token = setup_signal_handler().await?;
            let target = connect_target(&config).await?;
            let store = open_staging(&config);
            let mut sink = open_reject_sink(&config)?;
            let result = Loader::new(store.as_ref(), target.as_ref())
                .load(&config.load_request(locator), sink.as_mut(), &cancel_token)
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\nLoad completed!");
                println!("  Shards: {}", result.shards.len());
                println!("  Records read: {}", result.records_read);
                println!("  Committed: {}", result.committed_count);
                println!("  Rejected: {}", result.rejected_count);
                println!("  Duration: {:.2}s", result.elapsed.as_secs_f64());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::HealthCheck { ref job } => {
            let config = load_config(cli.config.as_ref(), job)?;
            let result = health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                let probes = [
                    ("Source (PostgreSQL)", &result.source),
                    ("Target (PostgreSQL)", &result.target),
                    ("Staging bucket", &result.staging),
                ];
                for (label, probe) in probes {
                    println!(
                        "  {}: {} ({}ms)",
                        label,
                        if probe.ok { "OK" } else { "FAILED" },
                        probe.latency_ms
                    );
                    if let Some(ref err) = probe.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Rejects { ref reject_log } => {
            let records = read_reject_log(reject_log)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                let mut by_reason: BTreeMap<String, usize> = BTreeMap::new();
                for r in &records {
                    println!("{}:{} {}: {}", r.shard, r.line, r.reason, r.detail);
                    println!("    {}", r.raw.trim_end());
                    *by_reason.entry(r.reason.to_string()).or_default() += 1;
                }
                println!("\n{} rejected record(s)", records.len());
                for (reason, count) in by_reason {
                    println!("  {}: {}", reason, count);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::List { ref staging_location } => {
            let location = StagingLocation::parse(staging_location)?;
            let grant = match cli.config.as_ref() {
                Some(path) => Config::load(path)?.staging.grant_or_ephemeral(),
                None => AccessGrant::default(),
            };
            let store = FsObjectStore::new(location.bucket(), grant);
            info!("Listing {} in {}", location.name, location.bucket().display());
            let names = location.locator().resolve(&store).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in &names {
                    let size = store.get(name).await?.len();
                    println!("{}  {} bytes", name, size);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Resolve the job configuration: optional YAML file, then flags.
fn load_config(path: Option<&PathBuf>, job: &JobArgs) -> Result<Config, MigrateError> {
    let args = config_args(job)?;
    let config = match path {
        Some(path) => {
            let config = Config::load(path)?.with_overrides(&args);
            config.validate()?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::from_args(&args)?,
    };
    Ok(config)
}

fn config_args(job: &JobArgs) -> Result<ConfigArgs, MigrateError> {
    let location = job
        .staging_location
        .as_deref()
        .map(StagingLocation::parse)
        .transpose()?;

    Ok(ConfigArgs {
        source_url: job.source.clone(),
        query: job.query.clone(),
        target_url: job.target.clone(),
        target_table: job.target_table.clone(),
        bucket: location.as_ref().map(|l| l.bucket.clone()),
        destination: location.map(|l| l.name),
        format: job.format,
        shard_size: job.shard_size,
        reject_limit: job.reject_limit,
        large_text: job.large_text,
        reject_log: job.reject_log.clone(),
        truncate: job.truncate,
    })
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Results go to stdout, so logs go to stderr.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}' (expected text or json)", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Rolling back and shutting down..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Rolling back and shutting down..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Rolling back and shutting down...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
