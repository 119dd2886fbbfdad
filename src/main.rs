//! Maestro binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use maestro::cli::{self, Cli};

fn init_tracing() {
    let default = if maestro::config::debug_enabled() {
        "maestro=debug"
    } else {
        "maestro=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = cli::run(cli).await;
    std::process::exit(code);
}
