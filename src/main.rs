mod cli;
mod config_loader;
mod broker_config;
mod camera_config;
mod errors;
mod core;
mod operations;
mod common;

use common::logging_setup;
use operations::reconcile_op;
use log::{info, error, debug};
use anyhow::{Context, Result};
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    let main_start_time = Instant::now();
    let matches = cli::build_cli().get_matches();
    let config_path = cli::config_path(&matches);

    let master_config = match config_loader::load_config(config_path) {
        Ok(cfg) => {
            logging_setup::initialize_logging(Some(&cfg), &matches);
            debug!("Configuration loaded from: {}", config_path);
            cfg
        }
        Err(e) => {
            logging_setup::initialize_logging(None, &matches);
            error!("❌ Failed to load configuration from '{}': {}. Exiting.", config_path, e);
            return Err(anyhow::Error::new(e).context(format!("Failed to load configuration from '{}'", config_path)));
        }
    };

    info!(
        "🚀 Publishing discovery for {} cameras under prefix '{}'",
        master_config.cameras.len(),
        master_config.mqtt.topic_prefix
    );

    let options = cli::reconcile_options(&matches);
    let report = reconcile_op::run_reconciliation(&master_config, &options)
        .await
        .context("Discovery reconciliation failed")?;

    if report.warnings > 0 {
        info!("Finished with {} publish warnings, see above.", report.warnings);
    }
    info!("🏁 Done in {:?}.", main_start_time.elapsed());
    Ok(())
}
