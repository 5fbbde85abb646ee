//! Provider-agnostic representation of a parsed webhook.
//!
//! # Payload paths
//!
//! Event names and body tokens are located with `/`-separated paths:
//!
//! ```text
//! JSON  "events/name"      {"events": [{"name": "a"}, {"name": "b"}]}  -> ["a", "b"]
//! Form  "hook"             hook=post_published                          -> ["post_published"]
//! XML   "Envelope/Body/notifications/ActionId"                          -> text of every match
//! XML   "feed/entry/@type" attribute of every matching element
//! ```
//!
//! JSON arrays are flattened at every level. XML segments match local names,
//! namespace prefixes are ignored.

use http::HeaderMap;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use std::collections::HashSet;

use crate::metadata::BodyType;

/// Parsed webhook handed to every handler.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    pub receiver: String,
    pub id: Option<String>,
    /// Extracted action names in request order. Never empty after parsing.
    pub actions: Vec<String>,
    pub payload: Payload,
    #[serde(skip)]
    pub headers: HeaderMap,
}

impl Envelope {
    /// Actions with duplicates removed, keeping first occurrence order.
    pub fn distinct_actions(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.actions
            .iter()
            .map(String::as_str)
            .filter(|action| seen.insert(*action))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
pub enum Payload {
    Json(serde_json::Value),
    Form(FormData),
    Xml(XmlElement),
    Empty,
}

impl Payload {
    pub fn body_type(&self) -> BodyType {
        match self {
            Payload::Json(_) => BodyType::Json,
            Payload::Form(_) => BodyType::Form,
            Payload::Xml(_) => BodyType::Xml,
            Payload::Empty => BodyType::None,
        }
    }

    /// All non-empty values found at `path`, in document order.
    pub fn select(&self, path: &str) -> Vec<String> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut out = Vec::new();
        match self {
            Payload::Json(value) => select_json(value, &segments, &mut out),
            Payload::Form(form) => out.extend(form.get_all(path).map(str::to_string)),
            Payload::Xml(root) => select_xml(root, &segments, &mut out),
            Payload::Empty => {}
        }
        out.retain(|v| !v.is_empty());
        out
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormData> {
        match self {
            Payload::Form(form) => Some(form),
            _ => None,
        }
    }

    pub fn as_xml(&self) -> Option<&XmlElement> {
        match self {
            Payload::Xml(root) => Some(root),
            _ => None,
        }
    }
}

fn select_json(value: &serde_json::Value, segments: &[&str], out: &mut Vec<String>) {
    use serde_json::Value;

    match (value, segments.split_first()) {
        (Value::Array(items), _) => {
            for item in items {
                select_json(item, segments, out);
            }
        }
        (Value::Object(map), Some((head, rest))) => {
            if let Some(child) = map.get(*head) {
                select_json(child, rest, out);
            }
        }
        (Value::String(s), None) => out.push(s.clone()),
        (Value::Number(n), None) => out.push(n.to_string()),
        (Value::Bool(b), None) => out.push(b.to_string()),
        _ => {}
    }
}

fn select_xml(element: &XmlElement, segments: &[&str], out: &mut Vec<String>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if local_name(head) != element.name {
        return;
    }
    select_xml_children(element, rest, out);
}

fn select_xml_children(element: &XmlElement, segments: &[&str], out: &mut Vec<String>) {
    match segments.split_first() {
        None => out.push(element.text.clone()),
        Some((attr, [])) if attr.starts_with('@') => {
            if let Some(value) = element.attribute(&attr[1..]) {
                out.push(value.to_string());
            }
        }
        Some((head, rest)) => {
            for child in element.children_named(local_name(head)) {
                select_xml_children(child, rest, out);
            }
        }
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Decoded `application/x-www-form-urlencoded` body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormData {
    fields: Vec<(String, String)>,
}

impl FormData {
    pub fn parse(body: &[u8]) -> Self {
        Self {
            fields: url::form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

// Serialized as a map; repeated fields become arrays.
impl Serialize for FormData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut keys: Vec<&str> = Vec::new();
        for (key, _) in &self.fields {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }

        let mut map = serializer.serialize_map(Some(keys.len()))?;
        for key in keys {
            let values: Vec<&str> = self.get_all(key).collect();
            match values.as_slice() {
                [single] => map.serialize_entry(key, single)?,
                _ => map.serialize_entry(key, &values)?,
            }
        }
        map.end()
    }
}

/// Element of a parsed XML document.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct XmlElement {
    /// Local name, without namespace prefix.
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, String)>,
    /// Concatenated, trimmed character data directly inside the element.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children_named(name).next()
    }
}
