use hyper::StatusCode;
use thiserror::Error;

use crate::handler::HandlerError;
use crate::secrets::SecretStoreError;

/// Result type alias for receiver operations
pub type Result<T, E = ReceiverError> = std::result::Result<T, E>;

/// Errors that terminate the processing of an inbound webhook request.
///
/// Everything except `HandlerFault` is raised before any handler runs.
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("No route matched for request")]
    NotFound,

    #[error("No receiver registered under '{0}'")]
    UnknownReceiver(String),

    #[error("Method {method} is not supported by receiver '{receiver}'")]
    MethodNotAllowed { receiver: String, method: String },

    #[error("No secret configured for receiver '{receiver}' (id: {id})")]
    MisconfiguredSecret { receiver: String, id: String },

    #[error("The request did not carry a valid code for receiver '{0}'")]
    InvalidCode(String),

    #[error("The request signature is missing or invalid for receiver '{0}'")]
    InvalidSignature(String),

    #[error("Receiver '{receiver}' expects {expected} content but got '{actual}'")]
    UnsupportedMediaType {
        receiver: String,
        expected: &'static str,
        actual: String,
    },

    #[error("Could not find an event name for receiver '{0}'")]
    MissingEventName(String),

    #[error("Failed to parse request body: {0}")]
    ParseError(String),

    #[error("Request body exceeds the limit of {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Secret store error: {0}")]
    SecretStore(#[from] SecretStoreError),

    #[error("Request processing timed out")]
    Timeout,

    #[error("Handler '{handler}' failed on action '{action}': {source}")]
    HandlerFault {
        handler: String,
        action: String,
        #[source]
        source: HandlerError,
    },
}

impl ReceiverError {
    /// Machine-readable reason code sent back to the caller.
    pub fn reason(&self) -> &'static str {
        match self {
            ReceiverError::NotFound => "not_found",
            ReceiverError::UnknownReceiver(_) => "unknown_receiver",
            ReceiverError::MethodNotAllowed { .. } => "method_not_allowed",
            ReceiverError::MisconfiguredSecret { .. } => "misconfigured_secret",
            ReceiverError::InvalidCode(_) => "invalid_code",
            ReceiverError::InvalidSignature(_) => "invalid_signature",
            ReceiverError::UnsupportedMediaType { .. } => "unsupported_media_type",
            ReceiverError::MissingEventName(_) => "missing_event_name",
            ReceiverError::ParseError(_) => "parse_error",
            ReceiverError::PayloadTooLarge(_) => "payload_too_large",
            ReceiverError::RequestBody(_) => "request_body",
            ReceiverError::SecretStore(_) => "secret_store",
            ReceiverError::Timeout => "timeout",
            ReceiverError::HandlerFault { .. } => "handler_fault",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ReceiverError::NotFound | ReceiverError::UnknownReceiver(_) => StatusCode::NOT_FOUND,
            ReceiverError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ReceiverError::InvalidCode(_)
            | ReceiverError::InvalidSignature(_)
            | ReceiverError::UnsupportedMediaType { .. }
            | ReceiverError::MissingEventName(_)
            | ReceiverError::ParseError(_)
            | ReceiverError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ReceiverError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ReceiverError::MisconfiguredSecret { .. }
            | ReceiverError::SecretStore(_)
            | ReceiverError::HandlerFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ReceiverError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the request was turned away because it could not be authenticated.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ReceiverError::InvalidCode(_) | ReceiverError::InvalidSignature(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ReceiverError::UnknownReceiver("nope".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ReceiverError::InvalidCode("kudu".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ReceiverError::MissingEventName("wordpress".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ReceiverError::MisconfiguredSecret {
                receiver: "github".into(),
                id: "default".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ReceiverError::Timeout.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_auth_failures_are_distinct_from_misconfiguration() {
        assert!(ReceiverError::InvalidSignature("github".into()).is_auth_failure());
        assert!(
            !ReceiverError::MisconfiguredSecret {
                receiver: "github".into(),
                id: "default".into()
            }
            .is_auth_failure()
        );
        assert_eq!(
            ReceiverError::InvalidSignature("github".into()).reason(),
            "invalid_signature"
        );
    }
}
