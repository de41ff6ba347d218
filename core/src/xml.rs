//! XML documents as exchanged with the service.
//!
//! Reads go through `quick-xml` into a small owned tree. `XmlNode::to_record`
//! flattens an element into the same `serde_json::Value` record shape JSON
//! endpoints produce, so resource mappers deserialize both the same way:
//! attributes and leaf children become string fields, nested elements become
//! objects and repeated children become arrays. Text of an element that also
//! carries attributes or children is kept under `TEXT_KEY`.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use crate::error::ApiError;

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Record key holding the text of a non-leaf element.
pub const TEXT_KEY: &str = "$text";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn is_leaf(&self) -> bool {
        self.attributes.is_empty() && self.children.is_empty()
    }

    /// Record form of this element. A bare leaf still becomes an object when
    /// called directly, so every item record is a JSON object.
    pub fn to_record(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.attributes {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        if !self.text.is_empty() {
            map.insert(TEXT_KEY.to_string(), Value::String(self.text.clone()));
        }
        for child in &self.children {
            let value = if child.is_leaf() {
                Value::String(child.text.clone())
            } else {
                child.to_record()
            };
            match map.get_mut(&child.name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

fn xml_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::Deserialization(format!("invalid XML: {err}"))
}

fn open_node(start: &BytesStart<'_>) -> Result<XmlNode, ApiError> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..XmlNode::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// Parses `xml` and returns its root element.
pub fn parse(xml: &str) -> Result<XmlNode, ApiError> {
    let mut reader = Reader::from_str(xml.trim());
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => stack.push(open_node(&start)?),
            Event::Empty(start) => {
                let node = open_node(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| xml_error("unbalanced end tag"))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_error("unexpected end of document"));
    }
    root.ok_or_else(|| xml_error("no root element"))
}

/// Escaping writer for `<api>`-rooted request documents.
///
/// Calls chain; the first write failure is kept and reported by `finish`.
pub struct XmlWriter {
    writer: Writer<Vec<u8>>,
    error: Option<String>,
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlWriter {
    pub fn new() -> Self {
        let mut w = Self {
            writer: Writer::new(Vec::new()),
            error: None,
        };
        w.write(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));
        w
    }

    fn write(&mut self, event: Event<'_>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.writer.write_event(event) {
            self.error = Some(e.to_string());
        }
    }

    fn start<'a>(name: &'a str, attributes: &'a [(&str, String)]) -> BytesStart<'a> {
        let mut start = BytesStart::new(name);
        for (key, value) in attributes {
            start.push_attribute((*key, value.as_str()));
        }
        start
    }

    pub fn open(&mut self, name: &str, attributes: &[(&str, String)]) -> &mut Self {
        self.write(Event::Start(Self::start(name, attributes)));
        self
    }

    pub fn close(&mut self, name: &str) -> &mut Self {
        self.write(Event::End(BytesEnd::new(name)));
        self
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, String)]) -> &mut Self {
        self.write(Event::Empty(Self::start(name, attributes)));
        self
    }

    pub fn leaf(&mut self, name: &str, text: &str) -> &mut Self {
        self.open(name, &[]);
        self.write(Event::Text(BytesText::new(text)));
        self.close(name)
    }

    pub fn finish(self) -> Result<String, ApiError> {
        if let Some(err) = self.error {
            return Err(ApiError::Serialization(format!("xml: {err}")));
        }
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| ApiError::Serialization(format!("xml: {e}")))
    }
}
