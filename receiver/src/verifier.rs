use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use hyper::Method;
use sha1::Sha1;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::errors::ReceiverError;
use crate::metadata::{
    CodeSource, ReceiverMetadata, SignatureAlgorithm, SignatureEncoding, Verification,
};
use crate::parser;
use crate::request::InboundRequest;
use crate::secrets::{DEFAULT_INSTANCE, Secret, SecretStore};

/// Outcome of a successful verification.
#[derive(Debug, PartialEq, Eq)]
pub enum Authenticated {
    /// A probe answered without looking at secrets or handlers.
    ShortCircuited { challenge: Option<String> },
    /// Credentials matched the instance secret.
    Verified,
    /// The receiver does not authenticate requests.
    Unverified,
}

/// Authenticates a request against the secret of its receiver instance.
///
/// Any error is terminal: the request must not reach the parser or handlers.
pub async fn verify(
    metadata: &ReceiverMetadata,
    request: &InboundRequest,
    secrets: &dyn SecretStore,
    lookup_timeout: Duration,
) -> Result<Authenticated, ReceiverError> {
    if request.is_safe_read() && metadata.short_circuit_get {
        let challenge = metadata
            .get_challenge
            .as_deref()
            .and_then(|parameter| request.query_value(parameter))
            .map(str::to_string);
        return Ok(Authenticated::ShortCircuited { challenge });
    }

    if request.method != Method::POST {
        return Err(ReceiverError::MethodNotAllowed {
            receiver: metadata.name.clone(),
            method: request.method.to_string(),
        });
    }

    if !metadata.verification.requires_secret() {
        return Ok(Authenticated::Unverified);
    }

    let secret = lookup_secret(metadata, request.id.as_deref(), secrets, lookup_timeout).await?;
    let invalid_code = || ReceiverError::InvalidCode(metadata.name.clone());

    match &metadata.verification {
        Verification::None => Ok(Authenticated::Unverified),
        Verification::StaticCode { source } => {
            let code = match source {
                CodeSource::Query { name } => request.query_value(name),
                CodeSource::Header { name } => request.header(name),
            };
            check_token(&secret, code).ok_or_else(invalid_code)
        }
        Verification::QueryToken { parameter } => {
            check_token(&secret, request.query_value(parameter)).ok_or_else(invalid_code)
        }
        Verification::BodyToken { path } => {
            let payload = parser::decode_body(metadata, request)?;
            let token = payload.select(path).into_iter().next();
            check_token(&secret, token.as_deref()).ok_or_else(invalid_code)
        }
        Verification::Signature {
            algorithm,
            header,
            prefix,
            encoding,
        } => {
            let invalid = || ReceiverError::InvalidSignature(metadata.name.clone());
            let provided = request.header(header).ok_or_else(invalid)?;
            let provided = strip_prefix(provided.trim(), prefix.as_deref()).ok_or_else(invalid)?;
            let provided = decode_signature(*encoding, provided).ok_or_else(invalid)?;

            if signature_matches(*algorithm, &secret, &request.body, &provided) {
                Ok(Authenticated::Verified)
            } else {
                tracing::debug!(receiver = %metadata.name, "Signature mismatch");
                Err(invalid())
            }
        }
    }
}

async fn lookup_secret(
    metadata: &ReceiverMetadata,
    id: Option<&str>,
    secrets: &dyn SecretStore,
    lookup_timeout: Duration,
) -> Result<Secret, ReceiverError> {
    let secret = tokio::time::timeout(lookup_timeout, secrets.get_secret(&metadata.name, id))
        .await
        .map_err(|_| ReceiverError::Timeout)??;

    match secret {
        Some(secret) if !secret.is_empty() => Ok(secret),
        _ => {
            tracing::error!(
                receiver = %metadata.name,
                id = id.unwrap_or(DEFAULT_INSTANCE),
                "No secret configured for receiver instance"
            );
            Err(ReceiverError::MisconfiguredSecret {
                receiver: metadata.name.clone(),
                id: id.unwrap_or(DEFAULT_INSTANCE).to_string(),
            })
        }
    }
}

fn check_token(secret: &Secret, provided: Option<&str>) -> Option<Authenticated> {
    let provided = provided?;
    bool::from(secret.as_bytes().ct_eq(provided.as_bytes())).then_some(Authenticated::Verified)
}

fn strip_prefix<'a>(value: &'a str, prefix: Option<&str>) -> Option<&'a str> {
    match prefix {
        None => Some(value),
        Some(prefix) => {
            let head = value.get(..prefix.len())?;
            head.eq_ignore_ascii_case(prefix)
                .then(|| &value[prefix.len()..])
        }
    }
}

fn decode_signature(encoding: SignatureEncoding, value: &str) -> Option<Vec<u8>> {
    match encoding {
        SignatureEncoding::Hex => hex::decode(value).ok(),
        SignatureEncoding::Base64 => BASE64.decode(value).ok(),
    }
}

fn signature_matches(
    algorithm: SignatureAlgorithm,
    secret: &Secret,
    body: &[u8],
    provided: &[u8],
) -> bool {
    match algorithm {
        SignatureAlgorithm::Sha1 => {
            let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret.as_bytes()) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(provided).is_ok()
        }
        SignatureAlgorithm::Sha256 => {
            let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(provided).is_ok()
        }
    }
}

/// HMAC of `body` under `secret`, encoded the way the provider sends it.
pub fn compute_signature(
    algorithm: SignatureAlgorithm,
    encoding: SignatureEncoding,
    secret: &[u8],
    body: &[u8],
) -> Result<String, InvalidLength> {
    let digest = match algorithm {
        SignatureAlgorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret)?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret)?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
    };

    Ok(match encoding {
        SignatureEncoding::Hex => hex::encode(digest),
        SignatureEncoding::Base64 => BASE64.encode(digest),
    })
}

/// Header name and value a sender attaches for a signature-verified receiver.
pub fn signature_header(
    metadata: &ReceiverMetadata,
    secret: &[u8],
    body: &[u8],
) -> Option<(String, String)> {
    let Verification::Signature {
        algorithm,
        header,
        prefix,
        encoding,
    } = &metadata.verification
    else {
        return None;
    };

    let signature = compute_signature(*algorithm, *encoding, secret, body).ok()?;
    let value = format!("{}{}", prefix.as_deref().unwrap_or_default(), signature);
    Some((header.clone(), value))
}
