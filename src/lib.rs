pub mod api;
pub mod cli;
pub mod core;
pub mod providers;
pub mod server;
pub mod service;

use crate::core::clock::SystemClock;
use crate::core::config::AppConfig;
use crate::core::convert::ConversionRequest;
use crate::service::ConversionService;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Serve,
    Convert {
        operation: String,
        currency: String,
        amount: String,
    },
    Rates,
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");
    Ok(config)
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    match command {
        AppCommand::Serve => {
            info!("divisa server starting...");
            server::serve(load_config(config_path)?).await
        }
        AppCommand::Convert {
            operation,
            currency,
            amount,
        } => {
            // Bad input is reported before any configuration or network work.
            let request = ConversionRequest::parse(&operation, &currency, &amount)?;
            let service = build_service(&load_config(config_path)?)?;
            cli::convert::run(&service, &request).await
        }
        AppCommand::Rates => {
            let service = build_service(&load_config(config_path)?)?;
            cli::rates::run(&service).await
        }
    }
}

fn build_service(config: &AppConfig) -> Result<ConversionService> {
    ConversionService::from_config(config, Arc::new(SystemClock))
        .context("Failed to build conversion service")
}
