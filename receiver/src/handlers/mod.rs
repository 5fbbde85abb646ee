//! Handlers that can be registered from the configuration file.

mod forward;
mod log;

pub use forward::ForwardHandler;
pub use log::LogHandler;

use std::sync::Arc;

use crate::config::{HandlerConfig, HandlerType, ValidationError};
use crate::handler::WebhookHandler;
use crate::registration::{ActionFilter, ReceiverFilter, Registration};

/// Builds the registration described by one `handlers` entry.
pub fn from_config(config: &HandlerConfig) -> Result<Registration, ValidationError> {
    let handler: Arc<dyn WebhookHandler> = match config.r#type {
        HandlerType::Log => Arc::new(LogHandler::new()),
        HandlerType::Forward => {
            let url = config
                .url
                .clone()
                .ok_or(ValidationError::MissingForwardUrl)?;
            let handler = ForwardHandler::new(url);
            match config.timeout_secs {
                Some(secs) => Arc::new(handler.with_timeout(secs)),
                None => Arc::new(handler),
            }
        }
    };

    let mut registration = Registration::new(ReceiverFilter::parse(&config.receiver), handler)
        .with_actions(ActionFilter::from_list(&config.actions));
    if let Some(priority) = config.priority {
        registration = registration.with_priority(priority);
    }
    Ok(registration)
}
