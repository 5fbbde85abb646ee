use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use url::Url;

use crate::metadata::{MetadataError, MetadataRegistry, ReceiverMetadata};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Route prefix must start with '/': {0}")]
    InvalidRoutePrefix(String),

    #[error("Timeout '{0}' must be positive")]
    InvalidTimeout(&'static str),

    #[error("Max body size must be positive")]
    InvalidMaxBodySize,

    #[error("Custom receiver '{0}' shadows a built-in receiver")]
    ShadowsBuiltin(String),

    #[error("Invalid custom receiver: {0}")]
    InvalidReceiver(#[from] MetadataError),

    #[error("Secrets reference unknown receiver: {0}")]
    UnknownSecretReceiver(String),

    #[error("Empty secret for receiver '{receiver}' (id: {id})")]
    EmptySecret { receiver: String, id: String },

    #[error("Handler references unknown receiver: {0}")]
    UnknownHandlerReceiver(String),

    #[error("Forward handler requires a url")]
    MissingForwardUrl,
}

/// Receiver service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming webhooks
    pub listener: Listener,
    /// Admin listener serving health and readiness probes
    pub admin_listener: Listener,
    /// Path under which receivers are mounted
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    /// Requests with larger bodies are rejected with 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Receiver name -> instance id -> secret. The implicit instance is `default`.
    #[serde(default)]
    pub secrets: HashMap<String, HashMap<String, String>>,
    /// Receivers added on top of the built-in table
    #[serde(default)]
    pub receivers: Vec<ReceiverMetadata>,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

fn default_route_prefix() -> String {
    "/api/webhooks/incoming".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Config {
    /// Validates the receiver configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.route_prefix.starts_with('/') {
            return Err(ValidationError::InvalidRoutePrefix(self.route_prefix.clone()));
        }
        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidMaxBodySize);
        }
        self.timeouts.validate()?;

        let registry = self.metadata_registry()?;

        for (receiver, instances) in &self.secrets {
            if !registry.contains(receiver) {
                return Err(ValidationError::UnknownSecretReceiver(receiver.clone()));
            }
            for (id, secret) in instances {
                if secret.is_empty() {
                    return Err(ValidationError::EmptySecret {
                        receiver: receiver.clone(),
                        id: id.clone(),
                    });
                }
            }
        }

        for handler in &self.handlers {
            handler.validate(&registry)?;
        }

        Ok(())
    }

    /// Built-in receivers extended with the custom ones.
    pub fn metadata_registry(&self) -> Result<MetadataRegistry, ValidationError> {
        let builtin = MetadataRegistry::builtin();
        let mut seen = HashSet::new();
        for receiver in &self.receivers {
            if builtin.contains(&receiver.name) {
                return Err(ValidationError::ShadowsBuiltin(receiver.name.clone()));
            }
            if !seen.insert(receiver.name.as_str()) {
                return Err(MetadataError::Duplicate(receiver.name.clone()).into());
            }
        }
        Ok(MetadataRegistry::with_custom(self.receivers.clone())?)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Upper bound for a whole request, from routing to the last handler
    pub request_secs: u64,
    pub secret_lookup_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            request_secs: 30,
            secret_lookup_secs: 5,
        }
    }
}

impl Timeouts {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.request_secs == 0 {
            return Err(ValidationError::InvalidTimeout("request_secs"));
        }
        if self.secret_lookup_secs == 0 {
            return Err(ValidationError::InvalidTimeout("secret_lookup_secs"));
        }
        Ok(())
    }
}

/// Built-in handler implementations
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    Log,
    Forward,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HandlerConfig {
    pub r#type: HandlerType,
    /// Receiver name, or `*` for every receiver
    #[serde(default = "all_receivers")]
    pub receiver: String,
    pub priority: Option<i32>,
    /// Only these actions reach the handler; empty means all
    #[serde(default)]
    pub actions: Vec<String>,
    /// Target of a forward handler
    pub url: Option<Url>,
    /// Per request timeout of a forward handler
    pub timeout_secs: Option<u64>,
}

fn all_receivers() -> String {
    "*".to_string()
}

impl HandlerConfig {
    pub fn validate(&self, registry: &MetadataRegistry) -> Result<(), ValidationError> {
        if self.receiver != "*" && !registry.contains(&self.receiver) {
            return Err(ValidationError::UnknownHandlerReceiver(self.receiver.clone()));
        }
        if self.r#type == HandlerType::Forward && self.url.is_none() {
            return Err(ValidationError::MissingForwardUrl);
        }
        if self.timeout_secs == Some(0) {
            return Err(ValidationError::InvalidTimeout("timeout_secs"));
        }
        Ok(())
    }
}
