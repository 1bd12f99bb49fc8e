use anyhow::Context;
use clap::Parser;

use logger_service::cli::{Cli, Command};
use logger_service::config_loader::load_config;
use logger_service::log_record::LogCreateRequest;
use logger_service::service;
use logger_service::telemetry::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let (config_path, command) = Cli::parse().into_parts();
    let config = load_config(config_path.as_deref()).context("failed to load configuration")?;

    match command {
        Command::Serve => service::serve(config).await.context("logger service failed")?,
        Command::Migrate => service::migrate(&config).await.context("schema setup failed")?,
        Command::Publish {
            level,
            source,
            message,
        } => {
            let request = LogCreateRequest {
                level,
                source,
                message,
            };
            service::publish_one(&config, request)
                .await
                .context("failed to publish event")?
        }
    }

    Ok(())
}
