//! Entrypoint: load configuration, wire the runner, and drive it to
//! completion or shutdown.
//!
//! Ported from `examples/avdb13-grapevine/src/main.rs`'s `try_main`/
//! `DisplayWithSources` error-printing pattern, simplified to this crate's
//! single environment-named config path instead of a `clap`+`figment`
//! layered CLI surface (see `DESIGN.md` for why `clap` was dropped).

use std::process::ExitCode;

mod admin_api;
mod auth;
mod config;
mod engine;
mod error;
mod http_client;
mod observability;
mod pipeline;
mod runner;
mod scheduler;
mod store;
mod telemetry;
mod utils;

use runner::Runner;

const CONFIG_ENV_VAR: &str = "SCRAPER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    let Err(e) = try_main().await else {
        return ExitCode::SUCCESS;
    };

    eprintln!(
        "Error: {}",
        error::DisplayWithSources { error: &e, infix: "\n    Caused by: " }
    );

    ExitCode::FAILURE
}

/// Fallible entrypoint
async fn try_main() -> Result<(), error::Main> {
    // Loading a `.env` file is optional; a missing file is not an error.
    let _ = dotenvy::dotenv();

    let config_path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
    let config = config::load(std::path::Path::new(&config_path))?;

    observability::init(&config.scraper.log_level).map_err(error::Main::Observability)?;

    tracing::info!(
        sources = config.sources.len(),
        collector = %config.scraper.otel_collector_endpoint,
        "starting otel-api-scraper"
    );

    let mut runner = Runner::build(config).await?;
    runner.start().await?;
    runner.run_until_signalled().await;

    Ok(())
}
