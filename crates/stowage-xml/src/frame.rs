//! Arena-backed stack of open elements.
//!
//! Frames live in a `Vec`; each records its parent by index. Because the
//! stack only grows on an opening tag and only shrinks on the matching
//! closing tag, its length is always the current nesting depth and frames
//! are finalized strictly last-in first-out. A finalized frame becomes a
//! [`Value`] that is moved into its parent's child list.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::XmlError;
use crate::grammar::{ElementKind, ElementRule, Grammar};
use crate::value::Value;

/// Where a frame's shape comes from.
#[derive(Debug, Clone, Copy)]
enum Shape<'g> {
    Root(&'g Grammar),
    Rule(&'g ElementRule),
    Unknown,
}

impl<'g> Shape<'g> {
    fn child(self, tag: &str) -> Self {
        let rule = match self {
            Self::Root(grammar) => grammar.rule(tag),
            Self::Rule(rule) => rule.child(tag),
            Self::Unknown => None,
        };
        rule.map_or(Self::Unknown, Self::Rule)
    }
}

#[derive(Debug)]
struct Frame<'g> {
    name: String,
    shape: Shape<'g>,
    text: String,
    children: Vec<Child>,
    parent: Option<usize>,
}

#[derive(Debug)]
struct Child {
    key: String,
    value: Value,
    list: bool,
    known: bool,
}

/// A fully closed element.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    /// Tag name.
    pub name: String,
    /// Structured value.
    pub value: Value,
}

/// Stack of open elements.
#[derive(Debug)]
pub struct FrameStack<'g> {
    grammar: &'g Grammar,
    frames: Vec<Frame<'g>>,
}

impl<'g> FrameStack<'g> {
    /// Create an empty stack whose root element is described by `grammar`.
    #[must_use]
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            grammar,
            frames: Vec::new(),
        }
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Slash-separated path of open elements, e.g. `ListBucketResult/Contents/Size`.
    #[must_use]
    pub fn path(&self) -> String {
        let mut names = Vec::with_capacity(self.frames.len());
        let mut cursor = self.frames.len().checked_sub(1);
        while let Some(idx) = cursor {
            names.push(self.frames[idx].name.as_str());
            cursor = self.frames[idx].parent;
        }
        names.reverse();
        names.join("/")
    }

    /// Open an element.
    pub fn open(&mut self, name: String) {
        let parent = self.frames.len().checked_sub(1);
        let shape = match parent {
            Some(idx) => self.frames[idx].shape.child(&name),
            None => Shape::Root(self.grammar),
        };
        self.frames.push(Frame {
            name,
            shape,
            text: String::new(),
            children: Vec::new(),
            parent,
        });
    }

    /// Append character data to the innermost element.
    ///
    /// Text outside any element must be whitespace.
    pub fn text(&mut self, text: &str) -> Result<(), XmlError> {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.text.push_str(text);
                Ok(())
            }
            None if text.trim().is_empty() => Ok(()),
            None => Err(XmlError::Syntax(format!(
                "text outside the root element: {:?}",
                text.trim()
            ))),
        }
    }

    /// Close the innermost element.
    ///
    /// Returns the finalized root once the outermost element closes, `None`
    /// for inner elements, whose values move into their parent.
    pub fn close(&mut self, name: &str) -> Result<Option<Finalized>, XmlError> {
        let Some(top) = self.frames.last() else {
            return Err(XmlError::Syntax(format!("unexpected closing tag </{name}>")));
        };
        if top.name != name {
            return Err(XmlError::MismatchedTag {
                path: self.path(),
                expected: top.name.clone(),
                found: name.to_owned(),
            });
        }

        let value = self.finalize_top()?;
        let Some(frame) = self.frames.pop() else {
            return Ok(None);
        };

        match frame.parent {
            Some(idx) => {
                let (key, list, known) = match frame.shape {
                    Shape::Rule(rule) => (rule.key(&frame.name).to_owned(), rule.is_list(), true),
                    _ => (frame.name, false, false),
                };
                self.frames[idx].children.push(Child {
                    key,
                    value,
                    list,
                    known,
                });
                Ok(None)
            }
            None => Ok(Some(Finalized {
                name: frame.name,
                value,
            })),
        }
    }

    fn finalize_top(&mut self) -> Result<Value, XmlError> {
        let path = self.path();
        let Some(frame) = self.frames.last_mut() else {
            return Err(XmlError::Syntax("no open element".to_owned()));
        };
        let text = std::mem::take(&mut frame.text);
        let children = std::mem::take(&mut frame.children);

        match frame.shape {
            Shape::Root(_) if children.is_empty() && !text.trim().is_empty() => {
                Ok(Value::Text(text))
            }
            Shape::Root(grammar) => Ok(group(children, Some(grammar))),
            Shape::Rule(rule) => finalize_rule(rule, text, children, &path),
            Shape::Unknown if children.is_empty() => Ok(Value::Text(text)),
            Shape::Unknown => Ok(group(children, None)),
        }
    }
}

fn finalize_rule(
    rule: &ElementRule,
    text: String,
    children: Vec<Child>,
    path: &str,
) -> Result<Value, XmlError> {
    let parse_err = |message: String| XmlError::Parse {
        path: path.to_owned(),
        message,
    };

    match rule.kind() {
        ElementKind::Text => Ok(Value::Text(text)),
        ElementKind::Integer => text
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| parse_err(format!("invalid integer {text:?}: {e}"))),
        ElementKind::Float => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| parse_err(format!("invalid float {text:?}: {e}"))),
        ElementKind::Boolean => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(parse_err(format!("invalid boolean {text:?}"))),
        },
        ElementKind::Timestamp => parse_timestamp(text.trim())
            .map(Value::Timestamp)
            .ok_or_else(|| parse_err(format!("invalid timestamp {text:?}"))),
        ElementKind::Structure(grammar) => Ok(group(children, Some(grammar))),
        ElementKind::Wrapper { .. } => Ok(Value::List(
            children
                .into_iter()
                .filter(|child| child.known)
                .map(|child| child.value)
                .collect(),
        )),
    }
}

/// Group children by key. Keys declared as lists, or repeated in the
/// document, become lists in document order. Declared lists that never
/// occurred become empty lists.
fn group(children: Vec<Child>, grammar: Option<&Grammar>) -> Value {
    let mut slots: BTreeMap<String, (Vec<Value>, bool)> = BTreeMap::new();
    for child in children {
        let slot = slots.entry(child.key).or_default();
        slot.0.push(child.value);
        slot.1 |= child.list;
    }

    if let Some(grammar) = grammar {
        for (tag, rule) in grammar.elements() {
            if rule.is_list() {
                slots.entry(rule.key(tag).to_owned()).or_insert((Vec::new(), true));
            }
        }
    }

    Value::Map(
        slots
            .into_iter()
            .map(|(key, (mut values, list))| {
                let value = if list || values.len() != 1 {
                    Value::List(values)
                } else {
                    values.remove(0)
                };
                (key, value)
            })
            .collect(),
    )
}

/// Parse ISO 8601 (with or without fractional seconds) or an HTTP date.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
        .or_else(|| {
            DateTime::parse_from_rfc2822(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}
