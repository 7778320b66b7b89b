mod ai;
mod analysis;
mod app;
mod capture;
mod cli;
mod config;
mod domain;
mod infrastructure;
mod planner;
mod proxy;
mod report;
mod session;

use anyhow::Result;
use clap::Parser;
use infrastructure::{directories, logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();

    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config, &paths)?;

    let shutdown = shutdown::Shutdown::new();
    shutdown::install_signal_handlers(&shutdown);

    let app = app::ForageScoutApp::initialize(config, paths, shutdown)?;
    app.run(cli.command).await
}
