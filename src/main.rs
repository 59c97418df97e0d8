//! hivebridge CLI: stage engine tables locally, then load them into the warehouse.

use clap::Parser;
use tracing::info;

use hivebridge::cli::{Backends, Cli, init_tracing, run};

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.args().log_level);

    // Warehouse credentials come from the environment; drivers are the in-memory ones.
    let backends = Backends {
        credentials: None,
        ..Backends::in_memory()
    };

    let outcome = run(&cli, &backends);
    info!(exit_code = outcome.exit_code(), "done");
    std::process::exit(outcome.exit_code());
}
