//! Command-line surface and run wiring.
//!
//! `hivebridge extract` stages tables from the query engine into
//! `{work_dir}/{table}{ext}`, `hivebridge export` uploads those files and loads
//! them into the warehouse, and `hivebridge run` does both.
//!
//! Exit codes: `0` when every requested table made it through, `1` otherwise,
//! and `-1` from `extract`/`export` when no table was selected at all. `run`
//! skips the export after such an empty extract and exits with `1`.

use crate::cloud::{
    CredentialProvider, EnvCredentialProvider, FakeCredentials, FakeObjectStore, FakeWarehouse,
    ObjectStore, WarehouseConnector,
};
use crate::config::{PipelineConfig, select_tables};
use crate::engine::{ConnectionManager, EngineConnector, FakeQueryEngine, QueryEngine};
use crate::error::{PipelineError, Result};
use crate::extract::{ExtractionOrchestrator, ExtractionReport};
use crate::pool::WorkerPool;
use crate::transfer::{ChunkedUploader, TransferOrchestrator, TransferReport, WarehouseJobRunner};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_NOTHING_TO_DO: i32 = -1;

/// Move tables from a SQL query engine into an analytical warehouse.
#[derive(Parser, Debug)]
#[command(name = "hivebridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Stage tables from the query engine as local files.
    Extract(RunArgs),
    /// Upload staged files and load them into the warehouse.
    Export(RunArgs),
    /// Extract, then export.
    Run(RunArgs),
}

impl Cli {
    #[must_use]
    pub fn args(&self) -> &RunArgs {
        match &self.command {
            Command::Extract(args) | Command::Export(args) | Command::Run(args) => args,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Source database; also the warehouse dataset and the object prefix.
    #[arg(long)]
    pub db: String,

    /// Query engine host.
    #[arg(long, default_value = "")]
    pub host: String,

    /// Engine credentials as `user,password`.
    #[arg(long, default_value = "")]
    pub creds: String,

    /// Comma-separated tables; empty selects the configured default set.
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,

    #[arg(long, default_value = "test")]
    pub bucket_name: String,

    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Extension of staged files; a trailing `.gz` stages gzip.
    #[arg(long, default_value = ".csv.gz")]
    pub expected_ext: String,

    /// YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write a JSON run summary here.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// The concrete drivers a run talks to.
#[derive(Clone)]
pub struct Backends {
    pub engine: Arc<dyn QueryEngine>,
    pub store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn WarehouseConnector>,
    /// `None` reads `{credentials_prefix}PROJECT_ID` and `TOKEN` from the environment.
    pub credentials: Option<Arc<dyn CredentialProvider>>,
}

impl Backends {
    /// Backends that keep everything in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            engine: Arc::new(FakeQueryEngine::new()),
            store: Arc::new(FakeObjectStore::new()),
            warehouse: Arc::new(FakeWarehouse::new()),
            credentials: Some(Arc::new(FakeCredentials::new("local"))),
        }
    }

    fn credential_provider(&self, config: &PipelineConfig) -> Arc<dyn CredentialProvider> {
        self.credentials.clone().unwrap_or_else(|| {
            Arc::new(EnvCredentialProvider::new(config.credentials_prefix.clone()))
        })
    }
}

/// Summary of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub tables: Vec<String>,
    pub extraction: Option<ExtractionReport>,
    pub transfer: Option<TransferReport>,
    /// Set when the run could not start or was aborted.
    pub error: Option<String>,
    exit_code: i32,
}

impl RunOutcome {
    fn aborted(tables: Vec<String>, err: &PipelineError) -> Self {
        error!(kind = err.kind_name(), "{err}");
        Self {
            tables,
            extraction: None,
            transfer: None,
            error: Some(err.to_string()),
            exit_code: EXIT_FAILED,
        }
    }

    fn nothing_to_do() -> Self {
        Self {
            tables: Vec::new(),
            extraction: None,
            transfer: None,
            error: None,
            exit_code: EXIT_NOTHING_TO_DO,
        }
    }

    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

fn status_word(exit_code: i32) -> &'static str {
    if exit_code == EXIT_OK { "OK" } else { "FAIL" }
}

/// Stage every selected table under `work_dir`.
pub fn run_extract(args: &RunArgs, config: &PipelineConfig, backends: &Backends) -> RunOutcome {
    let start = Instant::now();
    let tables = select_tables(&args.tables, config, &args.db);
    if tables.is_empty() {
        warn!(db = %args.db, "no tables selected, nothing to extract");
        return RunOutcome::nothing_to_do();
    }
    info!(db = %args.db, tables = ?tables, "extracting");

    let orchestrator = match extraction_orchestrator(args, config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => return RunOutcome::aborted(tables, &e),
    };
    let connector = EngineConnector::new(
        Arc::clone(&backends.engine),
        config.connection_params(&args.host, &args.creds, &args.db),
    );

    let report = orchestrator.extract_all(&tables, &connector, &args.work_dir, &args.expected_ext);
    for name in report.failed() {
        error!(table = %name, "not extracted");
    }
    let exit_code = if report.is_complete(&tables) {
        EXIT_OK
    } else {
        EXIT_FAILED
    };
    info!(
        elapsed_secs = start.elapsed().as_secs_f64(),
        "extract {}",
        status_word(exit_code)
    );

    RunOutcome {
        tables,
        extraction: Some(report),
        transfer: None,
        error: None,
        exit_code,
    }
}

fn extraction_orchestrator(args: &RunArgs, config: &PipelineConfig) -> Result<ExtractionOrchestrator> {
    fs::create_dir_all(&args.work_dir).map_err(|e| {
        PipelineError::Io(format!("creating {}: {e}", args.work_dir.display()))
    })?;
    let cleanup = WorkerPool::new("cleanup", config.cleanup_workers)?;
    let orchestrator = ExtractionOrchestrator::new(ConnectionManager::new(config.retry()), cleanup);
    if config.table_workers > 1 {
        let tables = WorkerPool::new("tables", Some(config.table_workers))?;
        return Ok(orchestrator.with_table_pool(tables));
    }
    Ok(orchestrator)
}

/// Staged files for `tables` that exist; missing ones are logged.
fn staged_files(tables: &[String], work_dir: &Path, ext: &str) -> Vec<PathBuf> {
    tables
        .iter()
        .filter_map(|table| {
            let path = work_dir.join(format!("{table}{ext}"));
            if path.is_file() {
                Some(path)
            } else {
                warn!(table = %table, path = %path.display(), "no staged file");
                None
            }
        })
        .collect()
}

/// Upload and load the staged file of every selected table.
pub fn run_export(args: &RunArgs, config: &PipelineConfig, backends: &Backends) -> RunOutcome {
    let start = Instant::now();
    let tables = select_tables(&args.tables, config, &args.db);
    if tables.is_empty() {
        warn!(db = %args.db, "no tables selected, nothing to export");
        return RunOutcome::nothing_to_do();
    }

    let credentials = backends.credential_provider(config);
    if let Err(e) = credentials.credentials() {
        let err = PipelineError::Config(format!("resolving warehouse credentials: {e}"));
        return RunOutcome::aborted(tables, &err);
    }

    let orchestrator = match transfer_orchestrator(config, backends, credentials) {
        Ok(orchestrator) => orchestrator,
        Err(e) => return RunOutcome::aborted(tables, &e),
    };

    let files = staged_files(&tables, &args.work_dir, &args.expected_ext);
    let report = orchestrator.transfer(
        files,
        &args.bucket_name,
        &args.db,
        &args.db,
        &args.expected_ext,
    );
    for failure in report.failures() {
        error!(table = %failure.table, "{}", failure.message);
    }
    let exit_code = if report.is_complete(&tables) {
        EXIT_OK
    } else {
        EXIT_FAILED
    };
    info!(
        elapsed_secs = start.elapsed().as_secs_f64(),
        "export {}",
        status_word(exit_code)
    );

    RunOutcome {
        tables,
        extraction: None,
        transfer: Some(report),
        error: None,
        exit_code,
    }
}

fn transfer_orchestrator(
    config: &PipelineConfig,
    backends: &Backends,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<TransferOrchestrator> {
    let uploader = ChunkedUploader::new(Arc::clone(&backends.store))
        .with_chunk_size(config.chunk_size)
        .with_retry(config.retry());
    let jobs = WarehouseJobRunner::new(Arc::clone(&backends.warehouse), credentials)
        .with_retry(config.retry())
        .with_poll_interval(config.poll_interval())
        .with_load_timeout(config.load_timeout())
        .with_scheme(backends.store.scheme());
    Ok(TransferOrchestrator::new(
        uploader,
        jobs,
        WorkerPool::new("upload", config.upload_workers)?,
        WorkerPool::new("load", config.load_workers)?,
    ))
}

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    match &args.config {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn write_report(path: &Path, outcome: &RunOutcome) -> anyhow::Result<()> {
    use anyhow::Context;

    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    serde_json::to_writer_pretty(file, outcome)
        .with_context(|| format!("write report {}", path.display()))?;
    Ok(())
}

/// Install the global fmt subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

/// Execute the parsed command against `backends`.
pub fn run(cli: &Cli, backends: &Backends) -> RunOutcome {
    let args = cli.args();
    let outcome = match load_config(args) {
        Err(e) => RunOutcome::aborted(Vec::new(), &e),
        Ok(config) => match &cli.command {
            Command::Extract(_) => run_extract(args, &config, backends),
            Command::Export(_) => run_export(args, &config, backends),
            Command::Run(_) => {
                let extracted = run_extract(args, &config, backends);
                if extracted.exit_code == EXIT_NOTHING_TO_DO {
                    info!("nothing extracted, skipping export");
                    RunOutcome {
                        exit_code: EXIT_FAILED,
                        ..extracted
                    }
                } else {
                    let exported = run_export(args, &config, backends);
                    RunOutcome {
                        extraction: extracted.extraction,
                        ..exported
                    }
                }
            }
        },
    };

    if let Some(path) = &args.report
        && let Err(e) = write_report(path, &outcome)
    {
        warn!("{e:#}");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommand_and_defaults() {
        let cli = Cli::try_parse_from(["hivebridge", "extract", "--db", "sales"]).unwrap();
        assert!(matches!(cli.command, Command::Extract(_)));
        let args = cli.args();
        assert_eq!(args.db, "sales");
        assert_eq!(args.bucket_name, "test");
        assert_eq!(args.expected_ext, ".csv.gz");
        assert_eq!(args.work_dir, PathBuf::from("."));
        assert!(args.tables.is_empty());
        assert!(args.host.is_empty());
    }

    #[test]
    fn tables_are_comma_separated() {
        let cli =
            Cli::try_parse_from(["hivebridge", "run", "--db", "d", "--tables", "a,b,c"]).unwrap();
        assert_eq!(cli.args().tables, vec!["a", "b", "c"]);
    }

    #[test]
    fn db_is_required() {
        assert!(Cli::try_parse_from(["hivebridge", "export"]).is_err());
    }

    #[test]
    fn empty_selection_is_nothing_to_do() {
        let cli = Cli::try_parse_from(["hivebridge", "extract", "--db", "d"]).unwrap();
        let outcome = run(&cli, &Backends::in_memory());
        assert_eq!(outcome.exit_code(), EXIT_NOTHING_TO_DO);

        let cli = Cli::try_parse_from(["hivebridge", "run", "--db", "d"]).unwrap();
        let outcome = run(&cli, &Backends::in_memory());
        assert_eq!(outcome.exit_code(), EXIT_FAILED);
        assert!(outcome.transfer.is_none());
    }

    #[test]
    fn bad_config_file_fails_the_run() {
        let cli = Cli::try_parse_from([
            "hivebridge",
            "extract",
            "--db",
            "d",
            "--config",
            "/nonexistent/hivebridge.yaml",
        ])
        .unwrap();
        let outcome = run(&cli, &Backends::in_memory());
        assert_eq!(outcome.exit_code(), EXIT_FAILED);
        assert!(outcome.error.unwrap().contains("configuration"));
    }
}
