///
/// This module implements the CLI interface for apel-publisher: command parsing,
/// argument validation, and wiring of the real collaborators into the core pipeline.
///
/// All accounting logic (watermarks, normalisation, aggregation, formatting) lives in
/// the [`apel-publisher-core`] crate. This module is strictly CLI glue.
///
/// ## Features
/// - `run`: long-running publisher, polling on `intervals.run_interval` and
///   publishing every `intervals.report_interval`.
/// - `republish`: one-shot re-publication of a single site and month.
/// - Both stop with a non-zero status on interrupt or on any unhandled error.
///
/// [`apel-publisher-core`]: ../../apel-publisher-core/
use crate::auditor::AuditorClient;
use crate::broker::AmsClient;
use crate::load_config::AppConfig;
use crate::sign::SmimeSigner;
use anyhow::Result;
use apel_publisher_core::publish::Publisher;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// CLI for apel-publisher: publish APEL accounting summaries.
#[derive(Parser)]
#[clap(
    name = "apel-publisher",
    version,
    about = "Aggregate metering records into APEL summaries and publish them to the accounting broker"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll the metering service and publish summary and sync messages
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Re-publish the summary of one site and month
    Republish {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Year: 2020, 2021, ...
        #[clap(short, long)]
        year: i32,
        /// Month: 4, 8, 12, ...
        #[clap(short, long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,
        /// Site name as published (GOCDB): UNI-FREIBURG, ...
        #[clap(short, long)]
        site: String,
    },
}

impl Commands {
    pub fn config_path(&self) -> &Path {
        match self {
            Commands::Run { config } | Commands::Republish { config, .. } => config,
        }
    }
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(command: Commands, config: AppConfig) -> Result<()> {
    tracing::info!("trace_initialised");
    config.publisher.trace_loaded();

    let source = AuditorClient::new(&config.auditor).map_err(|e| anyhow::anyhow!(e))?;
    let signer = SmimeSigner::from_files(&config.auth.client_cert, &config.auth.client_key)
        .map_err(|e| anyhow::anyhow!(e))?;
    let broker = AmsClient::new(&config.auth).map_err(|e| anyhow::anyhow!(e))?;
    let publisher = Publisher::new(config.publisher, source, signer, broker)?;

    match command {
        Commands::Run { .. } => {
            tokio::select! {
                served = publisher.serve(&config.time_db_path, config.publish_since) => {
                    served.map_err(anyhow::Error::from)
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::error!("User abort");
                    Err(anyhow::anyhow!("interrupted"))
                }
            }
        }
        Commands::Republish {
            year, month, site, ..
        } => {
            tokio::select! {
                sent = publisher.republish(year, month, &site, Utc::now()) => {
                    sent.map(|rows| println!("Republished {rows} summary block(s) for {site} {year}-{month:02}"))
                        .map_err(anyhow::Error::from)
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::error!("User abort");
                    Err(anyhow::anyhow!("interrupted"))
                }
            }
        }
    }
}
