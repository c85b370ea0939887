use anyhow::Context;
use clap::Parser;
use prompter_core::app;
use prompter_core::cli::Cli;
use prompter_core::config::Config;
use prompter_core::telemetry::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("initializing logging")?;
    let config = Config::from_env();
    app::run(cli, config).await?;
    Ok(())
}
