use crate::envelope::Envelope;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
}

/// Outcome of one handler invocation.
#[derive(Debug)]
pub enum HandlerSignal {
    /// Run the next handler for this action.
    Continue,
    /// Skip the remaining handlers for this action. The request still succeeds.
    StopProcessing,
    /// Abort the request; it is reported as a server error.
    Fail(HandlerError),
}

impl HandlerSignal {
    pub fn fail(message: impl Into<String>) -> Self {
        HandlerSignal::Fail(HandlerError::Failed(message.into()))
    }
}

/// Application code invoked with verified, parsed webhooks.
///
/// Handlers are shared between concurrent requests and must not assume
/// exclusive access to their own state.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    /// Name used in logs, metrics and dispatch reports.
    fn name(&self) -> &str;

    /// Handle one action of an envelope.
    ///
    /// An envelope carrying several distinct actions is delivered once per
    /// action, so a handler sees the same envelope more than once.
    async fn handle(&self, envelope: &Envelope, action: &str) -> HandlerSignal;
}
