//! # hivebridge
//!
//! Batch movement of tables from a SQL query engine into an analytical
//! warehouse, staged through local flat files and object storage.
//!
//! ## Stages
//!
//! 1. **Extract**: for each table, open a cursor on the query engine (with
//!    retried acquisition), run `SELECT * FROM {table}`, and pull the result in
//!    blocks. Each block is coerced against the inferred schema and written as a
//!    numbered slice file. The slices are then concatenated in numeric order
//!    into `{work_dir}/{table}{ext}` and deleted. A schema manifest
//!    (`{table}.schema`) is written beside the output.
//! 2. **Upload**: each staged file is streamed to a bucket in fixed-size
//!    chunks on a worker pool, retrying the whole transfer on failure.
//! 3. **Load**: each uploaded object is loaded into `{dataset}.{table}` with
//!    truncate semantics, using the manifest as the destination schema. Jobs
//!    are polled until they reach a terminal state.
//!
//! Failures are contained per table and per file; a run reports which tables
//! made it through instead of stopping at the first error.
//!
//! ## Example
//!
//! ```ignore
//! use hivebridge::cli::{Backends, Cli, run};
//! use clap::Parser;
//!
//! let cli = Cli::parse_from(["hivebridge", "run", "--db", "sales", "--tables", "orders"]);
//! let outcome = run(&cli, &Backends::in_memory());
//! std::process::exit(outcome.exit_code());
//! ```
//!
//! ## Drivers
//!
//! The engine, object store and warehouse are reached through the traits in
//! [`engine`] and [`cloud`]. In-memory implementations ship with the crate
//! ([`engine::FakeQueryEngine`], [`cloud::FakeObjectStore`],
//! [`cloud::FakeWarehouse`]) and back both the tests and local smoke runs.

pub mod cli;
pub mod cloud;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod pool;
pub mod retry;
pub mod schema;
pub mod staging;
pub mod transfer;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use extract::{ExtractionOrchestrator, ExtractionReport, Table, TableStatus};
pub use pool::WorkerPool;
pub use retry::{MAX_RETRY, RetryConfig, RetryState, retry};
pub use schema::{CanonicalType, SchemaField};
pub use staging::SlicePattern;
pub use transfer::{
    ChunkedUploader, FileTransfer, TransferOrchestrator, TransferReport, WarehouseJobRunner,
};
