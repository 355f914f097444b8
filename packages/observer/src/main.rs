//! Binary entry point: load `.env`, parse flags, set up logging, then hand off
//! to [`mempool_observer::cli::run`].

use clap::Parser;
use mempool_observer::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() {
    // Before parsing so clap's env bindings see .env values
    dotenvy::dotenv().ok();
    let args = cli::Cli::parse();

    let settings = observability::LogSettings::from_env(args.log_level.clone());
    let guard = match observability::init_tracing(&settings) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run(args).await {
        error!(error = %e, "Observer stopped");
        eprintln!("Error: {e}");
        drop(guard);
        std::process::exit(1);
    }
}
