use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::envelope::{Envelope, FormData, Payload, XmlElement};
use crate::errors::ReceiverError;
use crate::metadata::{BodyType, ReceiverMetadata};
use crate::request::InboundRequest;

/// Parses the request body according to the receiver's declared body type and
/// extracts the action names.
///
/// Actions are taken from the first source that yields something: query
/// parameter, header, body path, then the implicit action.
pub fn parse(
    metadata: &ReceiverMetadata,
    request: &InboundRequest,
) -> Result<Envelope, ReceiverError> {
    let payload = decode_body(metadata, request)?;
    let actions = extract_actions(metadata, request, &payload)?;

    Ok(Envelope {
        receiver: metadata.name.clone(),
        id: request.id.clone(),
        actions,
        payload,
        headers: request.headers.clone(),
    })
}

/// Decodes the body without extracting actions.
pub fn decode_body(
    metadata: &ReceiverMetadata,
    request: &InboundRequest,
) -> Result<Payload, ReceiverError> {
    if metadata.body_type == BodyType::None {
        return Ok(Payload::Empty);
    }

    check_content_type(metadata, request.content_type())?;
    decode_as(metadata.body_type, &request.body)
}

pub fn decode_as(body_type: BodyType, body: &[u8]) -> Result<Payload, ReceiverError> {
    match body_type {
        BodyType::Json => serde_json::from_slice(body)
            .map(Payload::Json)
            .map_err(|e| ReceiverError::ParseError(e.to_string())),
        BodyType::Form => Ok(Payload::Form(FormData::parse(body))),
        BodyType::Xml => parse_xml(body).map(Payload::Xml),
        BodyType::None => Ok(Payload::Empty),
    }
}

fn check_content_type(
    metadata: &ReceiverMetadata,
    content_type: Option<&str>,
) -> Result<(), ReceiverError> {
    let actual = content_type.unwrap_or_default();
    if media_type_matches(metadata.body_type, actual) {
        return Ok(());
    }

    Err(ReceiverError::UnsupportedMediaType {
        receiver: metadata.name.clone(),
        expected: metadata.body_type.as_str(),
        actual: actual.to_string(),
    })
}

/// Whether a `Content-Type` header value denotes the given body type.
pub fn media_type_matches(body_type: BodyType, content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match body_type {
        BodyType::Json => {
            essence == "application/json" || essence == "text/json" || essence.ends_with("+json")
        }
        BodyType::Form => essence == "application/x-www-form-urlencoded",
        BodyType::Xml => {
            essence == "application/xml" || essence == "text/xml" || essence.ends_with("+xml")
        }
        BodyType::None => true,
    }
}

fn extract_actions(
    metadata: &ReceiverMetadata,
    request: &InboundRequest,
    payload: &Payload,
) -> Result<Vec<String>, ReceiverError> {
    let events = &metadata.events;

    if let Some(parameter) = &events.query_parameter {
        let actions: Vec<String> = request
            .query_values(parameter)
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|action| !action.is_empty())
            .map(str::to_string)
            .collect();
        if !actions.is_empty() {
            return Ok(actions);
        }
    }

    if let Some(header) = &events.header
        && let Some(action) = request.header(header).map(str::trim)
        && !action.is_empty()
    {
        return Ok(vec![action.to_string()]);
    }

    if let Some(path) = &events.body_path {
        let actions = payload.select(path);
        if !actions.is_empty() {
            return Ok(actions);
        }
        if !events.allow_missing {
            return Err(ReceiverError::MissingEventName(metadata.name.clone()));
        }
    }

    Ok(vec![metadata.implicit_action().to_string()])
}

/// Deepest element nesting accepted in an XML body.
pub const MAX_XML_DEPTH: usize = 128;

/// Parses an XML document into an element tree.
pub fn parse_xml(body: &[u8]) -> Result<XmlElement, ReceiverError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    // Open elements; the root is the first completed element at depth zero.
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(start) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(ReceiverError::ParseError("document nested too deeply".into()));
                }
                stack.push(element_from(&start)?);
            }
            Event::Empty(start) => {
                let element = element_from(&start)?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ReceiverError::ParseError("unbalanced end tag".into()))?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(parse_error)?;
                append_text(&mut stack, &text);
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data).map_err(parse_error)?;
                append_text(&mut stack, text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ReceiverError::ParseError("unexpected end of document".into()));
    }
    root.ok_or_else(|| ReceiverError::ParseError("document has no root element".into()))
}

fn parse_error(e: impl std::fmt::Display) -> ReceiverError {
    ReceiverError::ParseError(e.to_string())
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, ReceiverError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut element = XmlElement::new(name);

    for attribute in start.attributes() {
        let attribute = attribute.map_err(parse_error)?;
        // Namespace declarations carry no payload data
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(parse_error)?
            .into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn close_element(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), ReceiverError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(ReceiverError::ParseError(
                "document has more than one root element".into(),
            ));
        }
    }
    Ok(())
}

fn append_text(stack: &mut [XmlElement], text: &str) {
    if let Some(current) = stack.last_mut() {
        current.text.push_str(text.trim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataRegistry, Verification};
    use hyper::Method;
    use serde_json::json;

    fn registry() -> MetadataRegistry {
        MetadataRegistry::builtin()
    }

    fn post(receiver: &str, content_type: &str, body: &'static [u8]) -> InboundRequest {
        InboundRequest::new(Method::POST, receiver, None)
            .with_content_type(content_type)
            .with_body(body)
    }

    #[test]
    fn test_parse_kudu_json() {
        let kudu = registry().get("kudu").unwrap();
        let request = post(
            "kudu",
            "application/json; charset=utf-8",
            br#"{"Message":"m","Author":"a"}"#,
        );

        let envelope = parse(&kudu, &request).unwrap();
        assert_eq!(envelope.receiver, "kudu");
        assert_eq!(envelope.actions, vec!["kudu"]);
        assert_eq!(
            envelope.payload,
            Payload::Json(json!({"Message": "m", "Author": "a"}))
        );
        assert_eq!(envelope.payload.as_json().unwrap()["Author"], "a");
        assert!(envelope.payload.as_xml().is_none());
    }

    #[test]
    fn test_media_type_mismatch() {
        let kudu = registry().get("kudu").unwrap();
        let request = post("kudu", "application/x-www-form-urlencoded", b"Message=m");
        assert!(matches!(
            parse(&kudu, &request).unwrap_err(),
            ReceiverError::UnsupportedMediaType { .. }
        ));

        let missing = InboundRequest::new(Method::POST, "kudu", None).with_body(&b"{}"[..]);
        assert!(matches!(
            parse(&kudu, &missing).unwrap_err(),
            ReceiverError::UnsupportedMediaType { .. }
        ));
    }

    #[test]
    fn test_declared_type_never_unsupported() {
        let cases = [
            (BodyType::Json, "application/json"),
            (BodyType::Json, "application/vnd.github+json"),
            (BodyType::Json, "text/json"),
            (BodyType::Form, "application/x-www-form-urlencoded; charset=utf-8"),
            (BodyType::Xml, "text/xml; charset=utf-8"),
            (BodyType::Xml, "application/soap+xml"),
        ];
        for (body_type, content_type) in cases {
            assert!(media_type_matches(body_type, content_type), "{content_type}");
            for other in [BodyType::Json, BodyType::Form, BodyType::Xml] {
                if other != body_type {
                    assert!(!media_type_matches(other, content_type), "{content_type}");
                }
            }
        }
    }

    #[test]
    fn test_malformed_json() {
        let kudu = registry().get("kudu").unwrap();
        let request = post("kudu", "application/json", b"{not json");
        assert!(matches!(
            parse(&kudu, &request).unwrap_err(),
            ReceiverError::ParseError(_)
        ));
    }

    #[test]
    fn test_wordpress_missing_hook() {
        let wordpress = registry().get("wordpress").unwrap();
        let request = post(
            "wordpress",
            "application/x-www-form-urlencoded",
            b"post_id=1&post_title=hello",
        );
        assert!(matches!(
            parse(&wordpress, &request).unwrap_err(),
            ReceiverError::MissingEventName(name) if name == "wordpress"
        ));

        let request = post(
            "wordpress",
            "application/x-www-form-urlencoded",
            b"hook=publish_post&post_id=1",
        );
        let envelope = parse(&wordpress, &request).unwrap();
        assert_eq!(envelope.actions, vec!["publish_post"]);
        assert_eq!(
            envelope.payload.as_form().unwrap().get("post_id"),
            Some("1")
        );
    }

    #[test]
    fn test_query_actions_take_precedence() {
        let generic = registry().get("genericjson").unwrap();
        let request = post("genericjson", "application/json", br#"{"action":"body"}"#)
            .with_query("action", "a, b")
            .with_query("action", "c");
        let envelope = parse(&generic, &request).unwrap();
        assert_eq!(envelope.actions, vec!["a", "b", "c"]);

        // Falls back to the body path, then to the receiver name
        let request = post("genericjson", "application/json", br#"{"action":"body"}"#);
        assert_eq!(parse(&generic, &request).unwrap().actions, vec!["body"]);

        let request = post("genericjson", "application/json", br#"{}"#);
        assert_eq!(
            parse(&generic, &request).unwrap().actions,
            vec!["genericjson"]
        );
    }

    #[test]
    fn test_header_and_constant_actions() {
        let github = registry().get("github").unwrap();
        let request = post("github", "application/json", br#"{"zen":"hi"}"#)
            .with_header("X-GitHub-Event", "ping");
        assert_eq!(parse(&github, &request).unwrap().actions, vec!["ping"]);

        let dropbox = registry().get("dropbox").unwrap();
        let request = post("dropbox", "application/json", br#"{"list_folder":{}}"#);
        assert_eq!(parse(&dropbox, &request).unwrap().actions, vec!["change"]);
    }

    #[test]
    fn test_batched_json_actions() {
        let pusher = registry().get("pusher").unwrap();
        let request = post(
            "pusher",
            "application/json",
            br#"{"time_ms":1,"events":[{"name":"channel_occupied"},{"name":"channel_vacated"}]}"#,
        );
        assert_eq!(
            parse(&pusher, &request).unwrap().actions,
            vec!["channel_occupied", "channel_vacated"]
        );
    }

    #[test]
    fn test_parse_salesforce_xml() {
        let salesforce = registry().get("salesforce").unwrap();
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope
    xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
 <soapenv:Body>
  <notifications xmlns="http://soap.sforce.com/2005/09/outbound">
   <OrganizationId>00D000000000001</OrganizationId>
   <ActionId>04k000000000001</ActionId>
   <Notification>
    <Id>04l000000000001</Id>
    <sObject xsi:type="sf:Contact"><sf:Name>Jane &amp; John</sf:Name></sObject>
   </Notification>
   <Notification>
    <Id>04l000000000002</Id>
    <sObject xsi:type="sf:Contact"><sf:Name><![CDATA[Bob]]></sf:Name></sObject>
   </Notification>
  </notifications>
 </soapenv:Body>
</soapenv:Envelope>"#;
        let request = post("salesforce", "text/xml; charset=utf-8", body);
        let envelope = parse(&salesforce, &request).unwrap();

        assert_eq!(envelope.actions, vec!["04k000000000001"]);
        let notifications = envelope
            .payload
            .as_xml()
            .and_then(|root| root.child("Body"))
            .and_then(|body| body.child("notifications"))
            .unwrap();
        assert_eq!(
            notifications.child("OrganizationId").unwrap().text,
            "00D000000000001"
        );
        assert!(notifications.child("Missing").is_none());
        assert_eq!(
            envelope
                .payload
                .select("Envelope/Body/notifications/Notification/Id"),
            vec!["04l000000000001", "04l000000000002"]
        );
        assert_eq!(
            envelope
                .payload
                .select("Envelope/Body/notifications/Notification/sObject/Name"),
            vec!["Jane & John", "Bob"]
        );
        assert_eq!(
            envelope
                .payload
                .select("Envelope/Body/notifications/Notification/sObject/@type"),
            vec!["sf:Contact", "sf:Contact"]
        );
    }

    #[test]
    fn test_malformed_xml() {
        assert!(parse_xml(b"<a><b></a>").is_err());
        assert!(parse_xml(b"<a></a><b></b>").is_err());
        assert!(parse_xml(b"").is_err());
        assert!(parse_xml(b"<a>").is_err());
    }

    #[test]
    fn test_xml_nesting_limit() {
        let nested = |depth: usize| format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));

        let root = parse_xml(nested(MAX_XML_DEPTH).as_bytes()).unwrap();
        assert_eq!(root.name, "a");

        let err = parse_xml(nested(MAX_XML_DEPTH + 1).as_bytes()).unwrap_err();
        assert!(matches!(err, ReceiverError::ParseError(ref m) if m.contains("nested too deeply")));

        // Far beyond the limit, still rejected without building the tree
        let err = parse_xml(nested(100_000).as_bytes()).unwrap_err();
        assert!(matches!(err, ReceiverError::ParseError(_)));
    }

    #[test]
    fn test_no_body_type() {
        let ping = ReceiverMetadata::new("ping", BodyType::None, Verification::None);
        let request = InboundRequest::new(Method::POST, "ping", None).with_body(&b"ignored"[..]);
        let envelope = parse(&ping, &request).unwrap();
        assert_eq!(envelope.payload, Payload::Empty);
        assert_eq!(envelope.actions, vec!["ping"]);
    }
}
