use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::helper_functions::project_root;

mod affinity_matrix;
mod config;
mod data_handling;
mod forest;
mod harmonizer;
mod helper_functions;
mod identifier_resolver;
mod imputer;
mod matrix;
mod missingness;
mod models;
mod normalizer;
mod pipeline;
mod response_matrix;
mod serializer;

fn main() -> Result<()> {
    // Setup logging and project configuration
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting the drug sensitivity preprocessing pipeline");

    let project_root = project_root();
    let config = PipelineConfig::load(&project_root)?;
    let output_dir = config.resolve(&project_root, &config.output_dir);
    config.write_effective(&output_dir)?;

    match pipeline::run(&config, &project_root) {
        Ok(processed) => {
            info!(
                "Done: {} drugs x {} targets, {} cell lines retained ({} dropped). Outputs in {}",
                processed.affinity.nrows(),
                processed.affinity.ncols(),
                processed.response.ncols(),
                processed.cutoff.dropped_columns.len(),
                output_dir.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Pipeline failed: {}", e);
            Err(e).context("drug sensitivity preprocessing failed")
        }
    }
}
