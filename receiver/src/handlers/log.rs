use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::handler::{HandlerSignal, WebhookHandler};

/// Emits one structured log event per webhook action.
pub struct LogHandler {
    name: String,
}

impl LogHandler {
    pub fn new() -> Self {
        Self { name: "log".into() }
    }
}

impl Default for LogHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookHandler for LogHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope, action: &str) -> HandlerSignal {
        tracing::info!(
            receiver = %envelope.receiver,
            id = envelope.id.as_deref().unwrap_or_default(),
            action,
            body_type = envelope.payload.body_type().as_str(),
            "Received webhook"
        );
        if tracing::enabled!(tracing::Level::DEBUG)
            && let Ok(payload) = serde_json::to_string(&envelope.payload)
        {
            tracing::debug!(receiver = %envelope.receiver, action, %payload, "Webhook payload");
        }
        HandlerSignal::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use http::HeaderMap;

    #[tokio::test]
    async fn test_log_handler_continues() {
        let envelope = Envelope {
            receiver: "kudu".into(),
            id: Some("site-a".into()),
            actions: vec!["kudu".into()],
            payload: Payload::Json(serde_json::json!({"Message": "deployed"})),
            headers: HeaderMap::new(),
        };
        let handler = LogHandler::new();
        assert_eq!(handler.name(), "log");
        assert!(matches!(
            handler.handle(&envelope, "kudu").await,
            HandlerSignal::Continue
        ));
    }
}
