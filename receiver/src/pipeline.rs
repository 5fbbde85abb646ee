use hyper::Request;
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, Timeouts, ValidationError};
use crate::dispatcher::{self, DispatchReport};
use crate::errors::ReceiverError;
use crate::handlers;
use crate::metadata::{Acknowledgement, MetadataRegistry};
use crate::metrics_defs::{REJECTIONS, REQUEST_DURATION, REQUESTS, REQUESTS_INFLIGHT};
use crate::parser;
use crate::registration::HandlerRegistry;
use crate::request::{InboundRequest, collect_body};
use crate::resolver::{Resolved, Resolver};
use crate::secrets::{ConfigSecretStore, SecretStore};
use crate::verifier::{self, Authenticated};

const DEFAULT_ROUTE_PREFIX: &str = "/api/webhooks/incoming";
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Result of a request that made it through the pipeline.
#[derive(Debug)]
pub enum Outcome {
    /// A GET/HEAD probe answered without verification or dispatch.
    ShortCircuited {
        receiver: String,
        challenge: Option<String>,
    },
    Dispatched {
        report: DispatchReport,
        /// Fixed success body the provider expects, if any.
        ack: Option<Acknowledgement>,
    },
}

/// resolve -> verify -> parse -> dispatch for one request at a time.
///
/// The pipeline holds no per-request state and is shared by all connections.
pub struct ReceiverPipeline {
    resolver: Resolver,
    secrets: Arc<dyn SecretStore>,
    handlers: Arc<HandlerRegistry>,
    request_timeout: Duration,
    secret_lookup_timeout: Duration,
    max_body_bytes: usize,
}

impl ReceiverPipeline {
    pub fn new(
        registry: Arc<MetadataRegistry>,
        secrets: Arc<dyn SecretStore>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let timeouts = Timeouts::default();
        Self {
            resolver: Resolver::new(registry, DEFAULT_ROUTE_PREFIX),
            secrets,
            handlers,
            request_timeout: Duration::from_secs(timeouts.request_secs),
            secret_lookup_timeout: Duration::from_secs(timeouts.secret_lookup_secs),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Builds the pipeline described by a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ValidationError> {
        let registry = Arc::new(config.metadata_registry()?);
        let secrets = Arc::new(ConfigSecretStore::new(&config.secrets));

        let handler_registry = Arc::new(HandlerRegistry::new());
        for handler in &config.handlers {
            handler.validate(&registry)?;
            handler_registry.register(handlers::from_config(handler)?);
        }

        Ok(Self {
            resolver: Resolver::new(registry, &config.route_prefix),
            secrets,
            handlers: handler_registry,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            secret_lookup_timeout: Duration::from_secs(config.timeouts.secret_lookup_secs),
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn with_route_prefix(mut self, route_prefix: &str) -> Self {
        self.resolver = self.resolver.with_prefix(route_prefix);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_secret_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.secret_lookup_timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Registry used for dispatch; handlers may be added while serving.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub async fn process<B>(&self, request: Request<B>) -> Result<Outcome, ReceiverError>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();
        let _inflight = InflightGuard::new();

        let resolved = self.resolver.resolve(request.uri().path());
        let receiver = match &resolved {
            Ok(resolved) => resolved.metadata.name.clone(),
            Err(_) => "unknown".to_string(),
        };

        let result = match resolved {
            Ok(resolved) => {
                // Dropping the pipeline future on timeout cancels any running handler
                tokio::time::timeout(self.request_timeout, self.run(resolved, request))
                    .await
                    .unwrap_or(Err(ReceiverError::Timeout))
            }
            Err(e) => Err(e),
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.reason(),
        };
        counter!(REQUESTS, "receiver" => receiver.clone(), "status" => status).increment(1);
        histogram!(REQUEST_DURATION, "receiver" => receiver.clone(), "status" => status)
            .record(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            if !matches!(e, ReceiverError::HandlerFault { .. }) {
                counter!(REJECTIONS, "receiver" => receiver.clone(), "reason" => e.reason())
                    .increment(1);
            }
            if e.status().is_server_error() {
                tracing::error!(
                    receiver = %receiver,
                    reason = e.reason(),
                    error = %e,
                    "Webhook request failed"
                );
            } else {
                tracing::warn!(
                    receiver = %receiver,
                    reason = e.reason(),
                    error = %e,
                    "Webhook request rejected"
                );
            }
        }

        result
    }

    async fn run<B>(
        &self,
        resolved: Resolved,
        request: Request<B>,
    ) -> Result<Outcome, ReceiverError>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Resolved { metadata, id } = resolved;
        let (parts, body) = request.into_parts();
        let body = collect_body(body, self.max_body_bytes).await?;
        let inbound = InboundRequest::from_parts(parts, &metadata.name, id.as_deref(), body);

        let authenticated = verifier::verify(
            &metadata,
            &inbound,
            self.secrets.as_ref(),
            self.secret_lookup_timeout,
        )
        .await?;

        if let Authenticated::ShortCircuited { challenge } = authenticated {
            tracing::debug!(receiver = %metadata.name, "Short-circuited probe request");
            return Ok(Outcome::ShortCircuited {
                receiver: metadata.name.clone(),
                challenge,
            });
        }

        let envelope = parser::parse(&metadata, &inbound)?;
        tracing::debug!(
            receiver = %metadata.name,
            actions = ?envelope.actions,
            "Parsed webhook"
        );

        // One snapshot for the whole dispatch
        let registrations = self.handlers.snapshot();
        let report = dispatcher::dispatch(Arc::new(envelope), &registrations).await?;

        Ok(Outcome::Dispatched {
            report,
            ack: metadata.ack.clone(),
        })
    }
}

struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}
