use crate::envelope::Envelope;
use crate::handler::{HandlerSignal, WebhookHandler};
use async_trait::async_trait;
use std::sync::Mutex;

/// Handler that records every invocation, optionally stopping or failing on
/// one action.
pub struct RecordingHandler {
    name: String,
    stop_on: Option<String>,
    fail_on: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stop_on: None,
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn stopping_on(mut self, action: &str) -> Self {
        self.stop_on = Some(action.to_string());
        self
    }

    pub fn failing_on(mut self, action: &str) -> Self {
        self.fail_on = Some(action.to_string());
        self
    }

    /// `(receiver, action)` pairs in invocation order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, action)| action).collect()
    }
}

#[async_trait]
impl WebhookHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope, action: &str) -> HandlerSignal {
        self.calls
            .lock()
            .unwrap()
            .push((envelope.receiver.clone(), action.to_string()));

        if self.fail_on.as_deref() == Some(action) {
            HandlerSignal::fail(format!("refusing {action}"))
        } else if self.stop_on.as_deref() == Some(action) {
            HandlerSignal::StopProcessing
        } else {
            HandlerSignal::Continue
        }
    }
}

pub struct PanickingHandler;

#[async_trait]
impl WebhookHandler for PanickingHandler {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _envelope: &Envelope, _action: &str) -> HandlerSignal {
        panic!("handler bug");
    }
}
