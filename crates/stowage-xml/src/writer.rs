//! Grammar-guided XML writer.
//!
//! Declared children are written in grammar order, then any extra keys in
//! key order. Lists repeat their tag; wrappers nest their members.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::XmlError;
use crate::grammar::{ElementKind, ElementRule, Grammar};
use crate::value::Value;

/// Namespace of storage service documents.
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Serialize `value` as a document whose root element is `root`.
///
/// # Examples
///
/// ```
/// use stowage_xml::{ElementRule, Grammar, Value, to_xml};
///
/// let grammar = Grammar::new().element("Size", ElementRule::integer());
/// let value: Value = [("Size", Value::Integer(3))].into_iter().collect();
/// let xml = to_xml("Object", &value, &grammar).unwrap();
/// assert!(String::from_utf8(xml).unwrap().ends_with("<Object><Size>3</Size></Object>"));
/// ```
pub fn to_xml(root: &str, value: &Value, grammar: &Grammar) -> Result<Vec<u8>, XmlError> {
    write_document(root, None, value, grammar)
}

/// Like [`to_xml`] with an `xmlns` attribute on the root element.
pub fn to_xml_with_namespace(
    root: &str,
    namespace: &str,
    value: &Value,
    grammar: &Grammar,
) -> Result<Vec<u8>, XmlError> {
    write_document(root, Some(namespace), value, grammar)
}

fn write_document(
    root: &str,
    namespace: Option<&str>,
    value: &Value,
    grammar: &Grammar,
) -> Result<Vec<u8>, XmlError> {
    let mut writer = Writer::new(Vec::with_capacity(256));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut start = BytesStart::new(root);
    if let Some(ns) = namespace {
        start.push_attribute(("xmlns", ns));
    }
    writer.write_event(Event::Start(start))?;
    if let Value::Map(map) = value {
        write_structure(&mut writer, map, Some(grammar))?;
    }
    writer.write_event(Event::End(BytesEnd::new(root)))?;

    Ok(writer.into_inner())
}

fn write_structure<W: Write>(
    writer: &mut Writer<W>,
    map: &BTreeMap<String, Value>,
    grammar: Option<&Grammar>,
) -> Result<(), XmlError> {
    let mut written: BTreeSet<&str> = BTreeSet::new();

    if let Some(grammar) = grammar {
        for (tag, rule) in grammar.elements() {
            let key = rule.key(tag);
            if let Some(value) = map.get(key) {
                write_member(writer, tag, value, Some(rule))?;
                written.insert(key);
            }
        }
    }

    for (key, value) in map {
        if !written.contains(key.as_str()) {
            write_member(writer, key, value, None)?;
        }
    }
    Ok(())
}

fn write_member<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: &Value,
    rule: Option<&ElementRule>,
) -> Result<(), XmlError> {
    let repeated = rule.map_or(matches!(value, Value::List(_)), ElementRule::is_list);
    match value {
        Value::List(items) if repeated => {
            for item in items {
                write_element(writer, tag, item, rule)?;
            }
            Ok(())
        }
        _ => write_element(writer, tag, value, rule),
    }
}

fn write_element<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: &Value,
    rule: Option<&ElementRule>,
) -> Result<(), XmlError> {
    match (rule.map(ElementRule::kind), value) {
        (Some(ElementKind::Wrapper { member, rule }), _) => {
            writer.write_event(Event::Start(BytesStart::new(tag)))?;
            let items = value.as_list().unwrap_or(std::slice::from_ref(value));
            for item in items {
                write_element(writer, member, item, Some(rule.as_ref()))?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        (Some(ElementKind::Structure(grammar)), Value::Map(map)) => {
            writer.write_event(Event::Start(BytesStart::new(tag)))?;
            write_structure(writer, map, Some(grammar))?;
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        (_, Value::Map(map)) => {
            writer.write_event(Event::Start(BytesStart::new(tag)))?;
            write_structure(writer, map, None)?;
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        (_, Value::List(items)) => {
            for item in items {
                write_element(writer, tag, item, None)?;
            }
        }
        (_, scalar) => {
            writer.write_event(Event::Start(BytesStart::new(tag)))?;
            let text = scalar_text(scalar);
            if !text.is_empty() {
                writer.write_event(Event::Text(BytesText::new(&text)))?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
    }
    Ok(())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Integer(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Timestamp(t) => t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        Value::List(_) | Value::Map(_) => String::new(),
    }
}
