use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use shared::http::{full_body, make_boxed_error_response, make_boxed_response};
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::ReceiverError;
use crate::pipeline::{Outcome, ReceiverPipeline};

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    error_message: String,
}

#[derive(Serialize)]
struct ProbeBody<'a> {
    receiver: &'a str,
    status: &'static str,
}

/// Serves webhook requests by running them through the pipeline.
pub struct ReceiverService<E> {
    pipeline: Arc<ReceiverPipeline>,
    _error: std::marker::PhantomData<fn() -> E>,
}

impl<E> ReceiverService<E>
where
    E: 'static,
{
    pub fn new(pipeline: Arc<ReceiverPipeline>) -> Self {
        Self {
            pipeline,
            _error: std::marker::PhantomData,
        }
    }
}

impl<E> Service<Request<Incoming>> for ReceiverService<E>
where
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let pipeline = self.pipeline.clone();
        Box::pin(async move { Ok(respond(&pipeline, req).await) })
    }
}

/// Runs one request through the pipeline and renders the HTTP response.
pub async fn respond<B, E>(
    pipeline: &ReceiverPipeline,
    req: Request<B>,
) -> Response<BoxBody<Bytes, E>>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    E: 'static,
{
    match pipeline.process(req).await {
        Ok(Outcome::ShortCircuited {
            challenge: Some(challenge),
            ..
        }) => make_boxed_response(StatusCode::OK, "text/plain", challenge),
        Ok(Outcome::ShortCircuited { receiver, .. }) => json_response(
            StatusCode::OK,
            &ProbeBody {
                receiver: &receiver,
                status: "ok",
            },
        ),
        Ok(Outcome::Dispatched { ack: Some(ack), .. }) => {
            let mut response = Response::new(full_body(ack.body));
            let content_type = HeaderValue::from_str(&ack.content_type)
                .unwrap_or(HeaderValue::from_static("text/plain"));
            response.headers_mut().insert(CONTENT_TYPE, content_type);
            response
        }
        Ok(Outcome::Dispatched { report, ack: None }) => json_response(StatusCode::OK, &report),
        Err(e) => error_response(&e),
    }
}

fn error_response<E: 'static>(error: &ReceiverError) -> Response<BoxBody<Bytes, E>> {
    json_response(
        error.status(),
        &ErrorBody {
            error: error.reason(),
            error_message: error.to_string(),
        },
    )
}

fn json_response<E: 'static>(
    status: StatusCode,
    value: &impl Serialize,
) -> Response<BoxBody<Bytes, E>> {
    match serde_json::to_vec(value) {
        Ok(body) => make_boxed_response(status, "application/json", body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataRegistry;
    use crate::registration::{HandlerRegistry, ReceiverFilter, Registration};
    use crate::secrets::{ConfigSecretStore, Secret};
    use crate::testutils::RecordingHandler;
    use crate::verifier::signature_header;
    use http_body_util::{BodyExt, Full};
    use hyper::Method;
    use std::convert::Infallible;

    fn pipeline(handler: Arc<RecordingHandler>) -> ReceiverPipeline {
        let mut secrets = ConfigSecretStore::default();
        secrets.insert("salesforce", None, Secret::new("00D000000000001"));
        secrets.insert("github", None, Secret::new("gh-secret"));
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(Registration::new(ReceiverFilter::All, handler));
        ReceiverPipeline::new(
            Arc::new(MetadataRegistry::builtin()),
            Arc::new(secrets),
            handlers,
        )
    }

    async fn call(
        pipeline: &ReceiverPipeline,
        req: Request<Full<Bytes>>,
    ) -> (StatusCode, Option<String>, Bytes) {
        let response = respond::<_, Infallible>(pipeline, req).await;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, body)
    }

    #[tokio::test]
    async fn test_error_body() {
        let pipeline = pipeline(Arc::new(RecordingHandler::new("h")));
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/incoming/unknown")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (status, content_type, body) = call(&pipeline, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "unknown_receiver");
        assert!(body["error_message"].as_str().unwrap().contains("unknown"));
    }

    #[tokio::test]
    async fn test_dropbox_challenge() {
        let pipeline = pipeline(Arc::new(RecordingHandler::new("h")));
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/webhooks/incoming/dropbox?challenge=xyz")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (status, content_type, body) = call(&pipeline, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(body, Bytes::from_static(b"xyz"));
    }

    #[tokio::test]
    async fn test_salesforce_ack() {
        let handler = Arc::new(RecordingHandler::new("h"));
        let pipeline = pipeline(handler.clone());
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
 <soapenv:Body>
  <notifications xmlns="http://soap.sforce.com/2005/09/outbound">
   <OrganizationId>00D000000000001</OrganizationId>
   <ActionId>04k000000000001</ActionId>
  </notifications>
 </soapenv:Body>
</soapenv:Envelope>"#;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/incoming/salesforce")
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap();

        let (status, content_type, body) = call(&pipeline, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/xml; charset=utf-8"));
        assert!(String::from_utf8_lossy(&body).contains("<Ack>true</Ack>"));
        assert_eq!(handler.actions(), vec!["04k000000000001"]);
    }

    #[tokio::test]
    async fn test_dispatch_summary() {
        let handler = Arc::new(RecordingHandler::new("h"));
        let pipeline = pipeline(handler.clone());
        let payload = br#"{"zen":"Keep it logically awesome."}"#;
        let github = MetadataRegistry::builtin().get("github").unwrap();
        let (header, value) = signature_header(&github, b"gh-secret", payload).unwrap();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/incoming/github")
            .header("Content-Type", "application/json")
            .header("X-GitHub-Event", "ping")
            .header(header, value)
            .body(Full::new(Bytes::from_static(payload)))
            .unwrap();

        let (status, _, body) = call(&pipeline, req).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["receiver"], "github");
        assert_eq!(body["actions"], serde_json::json!(["ping"]));
        assert_eq!(body["invocations"][0]["handler"], "h");
        assert_eq!(body["invocations"][0]["state"], "completed");
    }

    #[tokio::test]
    async fn test_handler_fault_is_server_error() {
        let handler = Arc::new(RecordingHandler::new("h").failing_on("ping"));
        let pipeline = pipeline(handler);
        let payload = b"{}";
        let github = MetadataRegistry::builtin().get("github").unwrap();
        let (header, value) = signature_header(&github, b"gh-secret", payload).unwrap();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/incoming/github")
            .header("Content-Type", "application/json")
            .header("X-GitHub-Event", "ping")
            .header(header, value)
            .body(Full::new(Bytes::from_static(payload)))
            .unwrap();

        let (status, _, body) = call(&pipeline, req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "handler_fault");
    }
}
