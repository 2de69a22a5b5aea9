//! Tripcast - Main Entry Point
//!
//! Runs the batch pipeline described by a YAML configuration file.

use clap::Parser;
use std::path::PathBuf;
use tripcast::PipelineConfig;

#[derive(Parser)]
#[command(name = "tripcast", about = "Batch taxi-demand analytics pipeline")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripcast=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_yaml_file(&cli.config)?;
    let metrics = tripcast::run(&config)?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
