//! Batch CLI for auction invoice ingestion.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use lotledger::db::default_database_path;
use lotledger::{
    load_config, Config, Database, InvoiceScanner, JobOptions, JobStatus, JobStatusReport,
    Orchestrator, Priority, SourceRef, Stores, WorkerPool,
};

/// Auction invoice ingestion: extract, classify and record inventory items
#[derive(Parser)]
#[command(name = "ledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (default: ~/.lotledger/data/lotledger.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a single invoice PDF
    Ingest(IngestArgs),

    /// Ingest every invoice PDF in a directory, skipping known documents
    Seed(SeedArgs),

    /// Print a job's status
    Status {
        job_id: String,
    },

    /// Move a failed job back to pending and run it
    Retry {
        job_id: String,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// Invoice PDF
    file: PathBuf,

    #[arg(long)]
    invoice_id: String,

    #[arg(long)]
    auction_id: Option<String>,

    /// Auction metadata spreadsheet (xlsx or csv)
    #[arg(long)]
    metadata: Option<PathBuf>,

    #[command(flatten)]
    options: OptionArgs,

    #[arg(long, default_value = "normal")]
    priority: Priority,
}

#[derive(Args)]
struct SeedArgs {
    /// Directory holding invoice PDFs named after their invoice id
    dir: PathBuf,

    #[arg(long)]
    metadata: Option<PathBuf>,

    #[command(flatten)]
    options: OptionArgs,
}

#[derive(Args)]
struct OptionArgs {
    /// Reprocess even when the document was already ingested
    #[arg(long)]
    force: bool,

    /// Run the pipeline without committing anything
    #[arg(long)]
    dry_run: bool,
}

impl OptionArgs {
    fn job_options(&self, priority: Priority) -> JobOptions {
        JobOptions {
            force: self.force,
            dry_run: self.dry_run,
            priority,
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct SeedSummary {
    completed: usize,
    duplicate: usize,
    failed: usize,
    dead: usize,
    jobs: Vec<JobStatusReport>,
}

impl SeedSummary {
    fn add(&mut self, report: JobStatusReport) {
        match report.status {
            JobStatus::Completed => {
                let duplicate = report
                    .result
                    .as_ref()
                    .is_some_and(|r| r.duplicate_of.is_some());
                if duplicate {
                    self.duplicate += 1;
                } else {
                    self.completed += 1;
                }
            }
            JobStatus::Dead => self.dead += 1,
            _ => self.failed += 1,
        }
        self.jobs.push(report);
    }

    fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.dead == 0
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    init_logging(&cli, &config)?;
    info!("Starting ledger v{}", env!("CARGO_PKG_VERSION"));

    let db_path = cli
        .database
        .clone()
        .or_else(|| config.database.path.clone())
        .or_else(default_database_path)
        .ok_or_else(|| anyhow!("Could not determine a database path; pass --database"))?;
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let orchestrator = Arc::new(Orchestrator::new(&config, Stores::sqlite(&db)));

    match cli.command {
        Commands::Ingest(args) => ingest(&config, orchestrator, args),
        Commands::Seed(args) => seed(&config, orchestrator, args),
        Commands::Status { job_id } => {
            let report = orchestrator.get_status(&job_id)?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Retry { job_id } => {
            orchestrator.retry(&job_id)?;
            let report = orchestrator.run_job(&job_id)?;
            print_json(&report)?;
            Ok(exit_code(report.status == JobStatus::Completed))
        }
    }
}

fn init_logging(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    tracing_log::LogTracer::init()?;

    let fallback = match cli.verbose {
        0 => config.logging.filter.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // Logs go to stderr; stdout carries the JSON reports
    if cli.json_logs || config.logging.json {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr));
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn ingest(
    config: &Config,
    orchestrator: Arc<Orchestrator>,
    args: IngestArgs,
) -> anyhow::Result<ExitCode> {
    let mut source = SourceRef::new(&args.file, &args.invoice_id);
    if let Some(auction_id) = &args.auction_id {
        source = source.with_auction_id(auction_id);
    }
    if let Some(metadata) = &args.metadata {
        source = source.with_metadata(metadata);
    }

    let pool = start_pool(config, orchestrator)?;
    let job_id = pool.submit(source, args.options.job_options(args.priority))?;

    let reports = collect(&pool, HashSet::from([job_id]))?;
    pool.shutdown();
    pool.wait();

    let report = reports
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Interrupted before the job finished"))?;
    print_json(&report)?;
    Ok(exit_code(report.status == JobStatus::Completed))
}

fn seed(config: &Config, orchestrator: Arc<Orchestrator>, args: SeedArgs) -> anyhow::Result<ExitCode> {
    let mut scanner = InvoiceScanner::new(&args.dir);
    if let Some(metadata) = &args.metadata {
        scanner = scanner.with_metadata(metadata);
    }
    let sources = scanner.scan()?;

    let pool = start_pool(config, orchestrator)?;
    let options = args.options.job_options(Priority::Normal);
    let mut submitted = HashSet::new();
    for source in sources {
        submitted.insert(pool.submit(source, options)?);
    }

    let expected = submitted.len();
    let reports = collect(&pool, submitted)?;
    pool.shutdown();
    pool.wait();

    let mut summary = SeedSummary::default();
    for report in reports {
        summary.add(report);
    }
    if summary.jobs.len() < expected {
        warn!(
            "Seed run interrupted: {} of {} job(s) finished",
            summary.jobs.len(),
            expected
        );
    }
    info!(
        "Seed run: {} completed, {} duplicate, {} failed, {} dead",
        summary.completed, summary.duplicate, summary.failed, summary.dead
    );

    print_json(&summary)?;
    Ok(exit_code(summary.all_succeeded() && summary.jobs.len() == expected))
}

/// Recovers jobs left over from an earlier run, then starts the workers.
fn start_pool(config: &Config, orchestrator: Arc<Orchestrator>) -> anyhow::Result<WorkerPool> {
    let recovery = orchestrator.recover()?;
    if !recovery.interrupted.is_empty() || !recovery.dead.is_empty() {
        warn!(
            "Recovered {} interrupted job(s), {} now dead",
            recovery.interrupted.len(),
            recovery.dead.len()
        );
    }
    Ok(WorkerPool::new(orchestrator, config.worker_count)?)
}

/// Waits for the given jobs, stopping early on Ctrl-C.
fn collect(pool: &WorkerPool, mut waiting: HashSet<String>) -> anyhow::Result<Vec<JobStatusReport>> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let mut reports = Vec::with_capacity(waiting.len());
    while !waiting.is_empty() {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted; {} job(s) left pending", waiting.len());
            break;
        }

        let Some(result) = pool.recv_result_timeout(Duration::from_millis(200)) else {
            continue;
        };
        match result.outcome {
            Ok(report) => {
                if waiting.remove(&result.job_id) {
                    reports.push(report);
                }
            }
            Err(e) => {
                if waiting.remove(&result.job_id) {
                    return Err(anyhow!(e).context(format!("Job {} could not run", result.job_id)));
                }
                warn!("Recovered job {} could not run: {}", result.job_id, e);
            }
        }
    }
    Ok(reports)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
