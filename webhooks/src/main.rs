mod config;

use clap::{Parser, Subcommand};
use metrics_exporter_statsd::StatsdBuilder;
use receiver::metadata::MetadataRegistry;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::{Config, ConfigError, LoggingConfig, MetricsConfig};

#[derive(Parser)]
#[command(name = "webhooks", about = "Receives, verifies and dispatches third-party webhooks")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the receiver and admin listeners
    Serve,
    /// List the available receivers
    Receivers,
    /// Print the signature header a sender would attach to a payload
    Sign {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        secret: String,
        /// File holding the exact request body
        file: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("the serve command requires --config")]
    MissingConfig,
    #[error(transparent)]
    Validation(#[from] receiver::config::ValidationError),
    #[error(transparent)]
    Server(#[from] receiver::ServerError),
    #[error("could not read payload: {0}")]
    Io(#[from] std::io::Error),
    #[error("no receiver registered under '{0}'")]
    UnknownReceiver(String),
    #[error("receiver '{0}' does not use signature verification")]
    NotSigned(String),
    #[error("could not install metrics exporter: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.config.as_deref().map(Config::from_file).transpose()?;

    match cli.command {
        CliCommand::Serve => {
            let config = config.ok_or(CliError::MissingConfig)?;
            let _sentry = init_logging(config.logging.as_ref());
            if let Some(metrics) = &config.metrics {
                init_metrics(metrics)?;
            }

            tracing::info!("Starting webhooks");
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(receiver::run(config.receiver))?;
        }
        CliCommand::Receivers => {
            let registry = registry(config.as_ref())?;
            println!("{:<12} {:<5} {:<12} EVENTS", "NAME", "BODY", "VERIFICATION");
            for metadata in registry.iter() {
                let events = &metadata.events;
                let source = events
                    .query_parameter
                    .as_ref()
                    .map(|p| format!("query:{p}"))
                    .or_else(|| events.header.as_ref().map(|h| format!("header:{h}")))
                    .or_else(|| events.body_path.as_ref().map(|b| format!("body:{b}")))
                    .unwrap_or_else(|| format!("implicit:{}", metadata.implicit_action()));
                println!(
                    "{:<12} {:<5} {:<12} {}",
                    metadata.name,
                    metadata.body_type.as_str(),
                    metadata.verification.kind(),
                    source
                );
            }
        }
        CliCommand::Sign {
            receiver: name,
            secret,
            file,
        } => {
            let registry = registry(config.as_ref())?;
            let metadata = registry
                .get(&name)
                .ok_or_else(|| CliError::UnknownReceiver(name.clone()))?;
            let body = std::fs::read(&file)?;
            let (header, value) =
                receiver::verifier::signature_header(&metadata, secret.as_bytes(), &body)
                    .ok_or(CliError::NotSigned(name))?;
            println!("{header}: {value}");
        }
    }

    Ok(())
}

/// Built-in receivers, plus the custom ones when a config file was given.
fn registry(config: Option<&Config>) -> Result<MetadataRegistry, CliError> {
    match config {
        Some(config) => Ok(config.receiver.metadata_registry()?),
        None => Ok(MetadataRegistry::builtin()),
    }
}

fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = config.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(config.prefix.as_str()))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;
    shared::metrics_defs::describe_metrics(receiver::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Metrics exporter installed"
    );
    Ok(())
}
