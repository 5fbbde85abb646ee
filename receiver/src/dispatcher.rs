//! Delivers a parsed envelope to the registered handlers.
//!
//! Each distinct action of the envelope gets its own handler chain, run in
//! envelope order. Inside a chain handlers run one after another in registry
//! order and every invocation goes through
//! `Pending -> Invoked -> Completed | Faulted`:
//!
//! - `Continue` completes the invocation and moves on to the next handler.
//! - `StopProcessing` completes it and ends the chain for the current action
//!   only; later actions still get their chains.
//! - `Fail` (or a panic inside the handler) faults it and aborts everything
//!   that is left. The request then fails with `HandlerFault`.

use serde::Serialize;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::envelope::Envelope;
use crate::errors::ReceiverError;
use crate::handler::{HandlerError, HandlerSignal, WebhookHandler};
use crate::metrics_defs::{HANDLER_DURATION, HANDLER_INVOCATIONS};
use crate::registration::Registration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Invoked,
    Completed,
    Faulted,
}

#[derive(Clone, Debug, Serialize)]
pub struct Invocation {
    pub handler: String,
    pub action: String,
    pub state: InvocationState,
    /// The handler asked to skip the rest of the chain.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stopped: bool,
}

/// Summary of a successful dispatch, returned to the caller as JSON.
#[derive(Clone, Debug, Serialize)]
pub struct DispatchReport {
    pub receiver: String,
    pub id: Option<String>,
    pub actions: Vec<String>,
    pub invocations: Vec<Invocation>,
}

impl DispatchReport {
    pub fn invoked(&self, handler: &str) -> bool {
        self.invocations.iter().any(|i| i.handler == handler)
    }
}

pub async fn dispatch(
    envelope: Arc<Envelope>,
    registrations: &[Registration],
) -> Result<DispatchReport, ReceiverError> {
    let mut report = DispatchReport {
        receiver: envelope.receiver.clone(),
        id: envelope.id.clone(),
        actions: envelope.actions.clone(),
        invocations: Vec::new(),
    };

    let actions: Vec<String> = envelope
        .distinct_actions()
        .into_iter()
        .map(str::to_string)
        .collect();

    for action in actions {
        let chain = registrations
            .iter()
            .filter(|r| r.applies_to(&envelope.receiver, &action));

        for registration in chain {
            let mut invocation = Invocation {
                handler: registration.handler.name().to_string(),
                action: action.clone(),
                state: InvocationState::Pending,
                stopped: false,
            };

            tracing::debug!(
                receiver = %envelope.receiver,
                handler = %invocation.handler,
                action = %action,
                "Invoking handler"
            );
            invocation.state = InvocationState::Invoked;
            let start = Instant::now();
            let signal = invoke(registration.handler.clone(), envelope.clone(), &action).await;
            histogram!(HANDLER_DURATION, "handler" => invocation.handler.clone())
                .record(start.elapsed().as_secs_f64());

            let outcome = match &signal {
                HandlerSignal::Continue => "continue",
                HandlerSignal::StopProcessing => "stop",
                HandlerSignal::Fail(_) => "fail",
            };
            counter!(
                HANDLER_INVOCATIONS,
                "receiver" => envelope.receiver.clone(),
                "handler" => invocation.handler.clone(),
                "outcome" => outcome
            )
            .increment(1);

            match signal {
                HandlerSignal::Continue => {
                    invocation.state = InvocationState::Completed;
                    report.invocations.push(invocation);
                }
                HandlerSignal::StopProcessing => {
                    tracing::debug!(
                        handler = %invocation.handler,
                        action = %action,
                        "Handler stopped processing"
                    );
                    invocation.state = InvocationState::Completed;
                    invocation.stopped = true;
                    report.invocations.push(invocation);
                    break;
                }
                HandlerSignal::Fail(error) => {
                    invocation.state = InvocationState::Faulted;
                    tracing::error!(
                        receiver = %envelope.receiver,
                        invocation = ?invocation,
                        error = %error,
                        "Handler failed, aborting dispatch"
                    );
                    return Err(ReceiverError::HandlerFault {
                        handler: invocation.handler,
                        action,
                        source: error,
                    });
                }
            }
        }
    }

    Ok(report)
}

/// Runs one handler on its own task so a panic surfaces as a failure.
///
/// Dropping the returned future aborts the task.
async fn invoke(
    handler: Arc<dyn WebhookHandler>,
    envelope: Arc<Envelope>,
    action: &str,
) -> HandlerSignal {
    let action = action.to_string();
    let mut tasks = JoinSet::new();
    tasks.spawn(async move { handler.handle(&envelope, &action).await });

    match tasks.join_next().await {
        Some(Ok(signal)) => signal,
        Some(Err(e)) => HandlerSignal::Fail(HandlerError::Panicked(e.to_string())),
        None => HandlerSignal::Fail(HandlerError::Failed("handler task vanished".into())),
    }
}
