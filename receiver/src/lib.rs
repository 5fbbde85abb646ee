pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod handler;
pub mod handlers;
pub mod metadata;
pub mod metrics_defs;
pub mod parser;
pub mod pipeline;
pub mod registration;
pub mod request;
pub mod resolver;
pub mod secrets;
pub mod service;
pub mod verifier;

#[cfg(test)]
mod testutils;

use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

use crate::config::ValidationError;
use crate::pipeline::ReceiverPipeline;
use crate::service::ReceiverService;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),
}

pub async fn run(config: config::Config) -> Result<(), ServerError> {
    config.validate()?;
    let pipeline = Arc::new(ReceiverPipeline::from_config(&config)?);
    tracing::info!(
        route_prefix = %config.route_prefix,
        handlers = pipeline.handlers().len(),
        "Starting webhook receiver"
    );

    let receiver_service = ReceiverService::<ServerError>::new(pipeline);
    let receiver_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        receiver_service,
    );

    let admin_service = AdminService::<_, ServerError>::new(|| true);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(receiver_task, admin_task)?;
    Ok(())
}
