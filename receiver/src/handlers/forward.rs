use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::envelope::Envelope;
use crate::handler::{HandlerError, HandlerSignal, WebhookHandler};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ForwardedWebhook<'a> {
    action: &'a str,
    #[serde(flatten)]
    envelope: &'a Envelope,
}

/// Posts each webhook action as JSON to a downstream URL.
///
/// Any transport error or non-2xx response fails the request.
pub struct ForwardHandler {
    name: String,
    client: reqwest::Client,
    target: Url,
    timeout: Duration,
}

impl ForwardHandler {
    pub fn new(target: Url) -> Self {
        Self {
            name: format!("forward:{target}"),
            client: reqwest::Client::new(),
            target,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }

    async fn forward(&self, envelope: &Envelope, action: &str) -> Result<(), HandlerError> {
        let response = self
            .client
            .post(self.target.clone())
            .timeout(self.timeout)
            .json(&ForwardedWebhook { action, envelope })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::UpstreamStatus(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookHandler for ForwardHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope, action: &str) -> HandlerSignal {
        match self.forward(envelope, action).await {
            Ok(()) => {
                tracing::debug!(target_url = %self.target, action, "Forwarded webhook");
                HandlerSignal::Continue
            }
            Err(e) => {
                tracing::warn!(target_url = %self.target, action, error = %e, "Forwarding failed");
                HandlerSignal::Fail(e)
            }
        }
    }
}
