mod api;
mod cli;
mod detector;
mod image_codec;
mod router;
mod startup;
mod state;

use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    objdet_core::config::load_dotenv();
    let config = objdet_core::Config::from_env();
    config.log_summary();

    match cli.command() {
        Command::Serve => startup::serve(config).await,
        Command::Train { run_id } => startup::train_once(config, run_id).await,
        Command::CheckConfig => startup::check_config(&config),
    }
}
