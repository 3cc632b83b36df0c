use clap::Parser;
use fetchr_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Log file first; stderr if the state dir is unusable.
    if let Err(e) = logging::init_logging(cli.verbose) {
        logging::init_logging_stderr(cli.verbose);
        tracing::warn!("file logging unavailable, using stderr: {:#}", e);
    }

    if let Err(err) = cli.run().await {
        eprintln!("fetchr error: {:#}", err);
        std::process::exit(1);
    }
}
