use crate::errors::ReceiverError;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::Method;
use hyper::body::Bytes;

/// A webhook request, fully buffered, as seen by the verifier and parser.
#[derive(Clone, Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub receiver: String,
    pub id: Option<String>,
    pub headers: HeaderMap,
    /// Decoded query pairs in request order; repeated keys are kept.
    pub query: Vec<(String, String)>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, receiver: impl Into<String>, id: Option<&str>) -> Self {
        Self {
            method,
            receiver: receiver.into(),
            id: id.map(Into::into),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Builds the request from the head of an HTTP request and its collected body.
    pub fn from_parts(parts: Parts, receiver: &str, id: Option<&str>, body: Bytes) -> Self {
        Self {
            query: parse_query(parts.uri.query()),
            method: parts.method,
            receiver: receiver.to_string(),
            id: id.map(Into::into),
            headers: parts.headers,
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_content_type(self, content_type: &str) -> Self {
        self.with_header(CONTENT_TYPE.as_str(), content_type)
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// All values of a query parameter, in order.
    pub fn query_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.query
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query_values(name).next()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// GET and HEAD, the methods providers use to probe an endpoint.
    pub fn is_safe_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Collects a request body, failing once it grows past `limit` bytes.
pub async fn collect_body<B>(body: B, limit: usize) -> Result<Bytes, ReceiverError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ReceiverError::PayloadTooLarge(limit))
        }
        Err(e) => Err(ReceiverError::RequestBody(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    #[test]
    fn test_parse_query() {
        let query = parse_query(Some("code=abc%20def&action=a,b&action=c"));
        assert_eq!(
            query,
            vec![
                ("code".to_string(), "abc def".to_string()),
                ("action".to_string(), "a,b".to_string()),
                ("action".to_string(), "c".to_string()),
            ]
        );
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_from_parts() {
        let (parts, _) = hyper::Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/incoming/github/team-a?code=123")
            .header("X-GitHub-Event", "push")
            .body(())
            .unwrap()
            .into_parts();

        let request = InboundRequest::from_parts(parts, "github", Some("team-a"), Bytes::new());
        assert_eq!(request.receiver, "github");
        assert_eq!(request.id.as_deref(), Some("team-a"));
        assert_eq!(request.query_value("code"), Some("123"));
        assert_eq!(request.header("x-github-event"), Some("push"));
        assert!(!request.is_safe_read());
    }

    #[tokio::test]
    async fn test_collect_body_limit() {
        let body = Full::new(Bytes::from_static(b"0123456789"));
        let bytes = collect_body(body, 10).await.unwrap();
        assert_eq!(bytes.len(), 10);

        let body = Full::new(Bytes::from_static(b"0123456789"));
        let err = collect_body(body, 5).await.unwrap_err();
        assert!(matches!(err, ReceiverError::PayloadTooLarge(5)));
    }
}
