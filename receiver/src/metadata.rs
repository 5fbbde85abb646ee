//! Receiver metadata registry
//!
//! Every supported provider is described by one [`ReceiverMetadata`] record:
//! how its request body is encoded, how requests are authenticated and where
//! the event name lives. Records are plain data; the verifier and parser
//! interpret them, so adding a provider never needs new code paths.
//!
//! The [`MetadataRegistry`] is built once at startup (built-in table plus any
//! receivers declared in the config file) and shared read-only afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("Receiver name '{0}' must be lowercase alphanumeric, '-' or '_'")]
    InvalidName(String),

    #[error("Receiver '{0}' is registered more than once")]
    Duplicate(String),

    #[error("Receiver '{name}' is inconsistent: {reason}")]
    Inconsistent { name: String, reason: &'static str },
}

/// Encoding of the request body a receiver accepts.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Json,
    Form,
    Xml,
    None,
}

impl BodyType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BodyType::Json => "json",
            BodyType::Form => "form",
            BodyType::Xml => "xml",
            BodyType::None => "none",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignatureEncoding {
    #[default]
    Hex,
    Base64,
}

/// Where a static code is carried on the request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum CodeSource {
    Query { name: String },
    Header { name: String },
}

impl Default for CodeSource {
    fn default() -> Self {
        CodeSource::Query {
            name: "code".into(),
        }
    }
}

/// How the requests of a receiver are authenticated.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verification {
    None,
    StaticCode {
        #[serde(default)]
        source: CodeSource,
    },
    /// HMAC over the raw body, carried in `header`.
    Signature {
        algorithm: SignatureAlgorithm,
        header: String,
        /// Stripped from the header value before decoding, e.g. `sha256=`.
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        encoding: SignatureEncoding,
    },
    QueryToken {
        parameter: String,
    },
    /// Token carried inside the body, located with a payload path.
    BodyToken {
        path: String,
    },
}

impl Verification {
    pub fn static_code() -> Self {
        Verification::StaticCode {
            source: CodeSource::default(),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Verification::None => "none",
            Verification::StaticCode { .. } => "static_code",
            Verification::Signature { .. } => "signature",
            Verification::QueryToken { .. } => "query_token",
            Verification::BodyToken { .. } => "body_token",
        }
    }

    pub fn requires_secret(&self) -> bool {
        !matches!(self, Verification::None)
    }
}

/// Rule for extracting action names from a request.
///
/// Sources are consulted in field order: query parameter, header, body path,
/// and finally the implicit action (`constant` or the receiver name).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventSource {
    /// Multi-valued: repeated parameters and comma separated values both count.
    pub query_parameter: Option<String>,
    pub header: Option<String>,
    pub body_path: Option<String>,
    /// Fall back to the implicit action when `body_path` yields nothing.
    pub allow_missing: bool,
    pub constant: Option<String>,
}

/// Fixed body returned on success, for providers that expect an acknowledgement.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Acknowledgement {
    pub content_type: String,
    pub body: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReceiverMetadata {
    pub name: String,
    pub body_type: BodyType,
    pub verification: Verification,
    /// GET and HEAD requests succeed immediately without verification.
    #[serde(default)]
    pub short_circuit_get: bool,
    /// Query parameter echoed back on a short-circuited GET.
    #[serde(default)]
    pub get_challenge: Option<String>,
    #[serde(default)]
    pub events: EventSource,
    #[serde(default)]
    pub ack: Option<Acknowledgement>,
}

impl ReceiverMetadata {
    pub fn new(name: impl Into<String>, body_type: BodyType, verification: Verification) -> Self {
        Self {
            name: name.into(),
            body_type,
            verification,
            short_circuit_get: false,
            get_challenge: None,
            events: EventSource::default(),
            ack: None,
        }
    }

    pub fn with_short_circuit_get(mut self, challenge: Option<&str>) -> Self {
        self.short_circuit_get = true;
        self.get_challenge = challenge.map(Into::into);
        self
    }

    pub fn with_query_events(mut self, parameter: &str) -> Self {
        self.events.query_parameter = Some(parameter.into());
        self
    }

    pub fn with_header_event(mut self, header: &str) -> Self {
        self.events.header = Some(header.into());
        self
    }

    pub fn with_body_event(mut self, path: &str, allow_missing: bool) -> Self {
        self.events.body_path = Some(path.into());
        self.events.allow_missing = allow_missing;
        self
    }

    pub fn with_constant_event(mut self, action: &str) -> Self {
        self.events.constant = Some(action.into());
        self
    }

    pub fn with_ack(mut self, content_type: &str, body: &str) -> Self {
        self.ack = Some(Acknowledgement {
            content_type: content_type.into(),
            body: body.into(),
        });
        self
    }

    /// The action used when no explicit event name is extracted.
    pub fn implicit_action(&self) -> &str {
        self.events.constant.as_deref().unwrap_or(&self.name)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid_name {
            return Err(MetadataError::InvalidName(self.name.clone()));
        }

        let inconsistent = |reason| MetadataError::Inconsistent {
            name: self.name.clone(),
            reason,
        };

        if self.body_type == BodyType::None {
            if self.events.body_path.is_some() {
                return Err(inconsistent("body_path requires a body type"));
            }
            if matches!(self.verification, Verification::BodyToken { .. }) {
                return Err(inconsistent("body_token verification requires a body type"));
            }
        }

        if self.get_challenge.is_some() && !self.short_circuit_get {
            return Err(inconsistent("get_challenge requires short_circuit_get"));
        }

        Ok(())
    }
}

const SALESFORCE_ACK: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">"#,
    r#"<soapenv:Body><notificationsResponse xmlns="http://soap.sforce.com/2005/09/outbound">"#,
    r#"<Ack>true</Ack></notificationsResponse></soapenv:Body></soapenv:Envelope>"#
);

/// The compiled-in provider table.
pub fn builtin_receivers() -> Vec<ReceiverMetadata> {
    use BodyType::{Form, Json, Xml};

    let signature = |algorithm, header: &str, prefix: Option<&str>| Verification::Signature {
        algorithm,
        header: header.into(),
        prefix: prefix.map(Into::into),
        encoding: SignatureEncoding::Hex,
    };

    vec![
        ReceiverMetadata::new("azurealert", Json, Verification::static_code())
            .with_body_event("status", false),
        ReceiverMetadata::new("bitbucket", Json, Verification::static_code())
            .with_header_event("X-Event-Key"),
        ReceiverMetadata::new(
            "dropbox",
            Json,
            signature(SignatureAlgorithm::Sha256, "X-Dropbox-Signature", None),
        )
        .with_short_circuit_get(Some("challenge"))
        .with_constant_event("change"),
        ReceiverMetadata::new("genericjson", Json, Verification::static_code())
            .with_query_events("action")
            .with_body_event("action", true),
        ReceiverMetadata::new(
            "github",
            Json,
            signature(
                SignatureAlgorithm::Sha256,
                "X-Hub-Signature-256",
                Some("sha256="),
            ),
        )
        .with_header_event("X-GitHub-Event"),
        ReceiverMetadata::new(
            "instagram",
            Json,
            signature(SignatureAlgorithm::Sha1, "X-Hub-Signature", Some("sha1=")),
        )
        .with_short_circuit_get(Some("hub.challenge"))
        .with_body_event("entry/changes/field", false),
        ReceiverMetadata::new("kudu", Json, Verification::static_code()),
        ReceiverMetadata::new("mailchimp", Form, Verification::static_code())
            .with_short_circuit_get(None)
            .with_body_event("type", false),
        ReceiverMetadata::new(
            "pusher",
            Json,
            signature(SignatureAlgorithm::Sha256, "X-Pusher-Signature", None),
        )
        .with_body_event("events/name", false),
        ReceiverMetadata::new(
            "salesforce",
            Xml,
            Verification::BodyToken {
                path: "Envelope/Body/notifications/OrganizationId".into(),
            },
        )
        .with_body_event("Envelope/Body/notifications/ActionId", false)
        .with_ack("text/xml; charset=utf-8", SALESFORCE_ACK),
        ReceiverMetadata::new(
            "slack",
            Form,
            Verification::BodyToken {
                path: "token".into(),
            },
        )
        .with_body_event("trigger_word", true),
        ReceiverMetadata::new("wordpress", Form, Verification::static_code())
            .with_body_event("hook", false),
    ]
}

/// Read-only lookup table from receiver name to metadata.
#[derive(Clone, Debug, Default)]
pub struct MetadataRegistry {
    receivers: IndexMap<String, Arc<ReceiverMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the compiled-in provider table.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for metadata in builtin_receivers() {
            // The built-in table is unique and valid by construction
            registry
                .receivers
                .insert(metadata.name.clone(), Arc::new(metadata));
        }
        registry
    }

    /// Builds the built-in registry extended with custom receivers.
    pub fn with_custom(custom: Vec<ReceiverMetadata>) -> Result<Self, MetadataError> {
        let mut registry = Self::builtin();
        for metadata in custom {
            registry.register(metadata)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, metadata: ReceiverMetadata) -> Result<(), MetadataError> {
        metadata.validate()?;
        if self.receivers.contains_key(&metadata.name) {
            return Err(MetadataError::Duplicate(metadata.name));
        }
        self.receivers
            .insert(metadata.name.clone(), Arc::new(metadata));
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<Arc<ReceiverMetadata>> {
        self.receivers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.receivers.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReceiverMetadata>> {
        self.receivers.values()
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }
}
