//! Static shape descriptors for response documents.
//!
//! A [`Grammar`] lists the child elements of one structure. Each child has an
//! [`ElementRule`] saying whether it is a scalar (and which coercion applies),
//! a nested structure, or a wrapper around repeated members, and whether it
//! repeats directly inside its parent.
//!
//! ```
//! use stowage_xml::{ElementRule, Grammar};
//!
//! let owner = Grammar::new()
//!     .element("ID", ElementRule::text())
//!     .element("DisplayName", ElementRule::text());
//! let bucket = Grammar::new()
//!     .element("Name", ElementRule::text())
//!     .element("CreationDate", ElementRule::timestamp());
//! let result = Grammar::new()
//!     .element("Owner", ElementRule::structure(owner))
//!     .element("Buckets", ElementRule::wrapper("Bucket", ElementRule::structure(bucket)));
//! assert!(result.rule("Buckets").is_some());
//! ```

/// How an element's content is turned into a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    /// Raw text, kept verbatim.
    Text,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// `true` or `false`.
    Boolean,
    /// ISO 8601 or HTTP date.
    Timestamp,
    /// Nested element with its own grammar.
    Structure(Grammar),
    /// Container whose `member` children form a list.
    Wrapper {
        /// Tag name of the repeated member.
        member: String,
        /// Rule applied to each member.
        rule: Box<ElementRule>,
    },
}

/// Rule for one element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRule {
    kind: ElementKind,
    list: bool,
    rename: Option<String>,
}

impl ElementRule {
    fn of(kind: ElementKind) -> Self {
        Self {
            kind,
            list: false,
            rename: None,
        }
    }

    /// Verbatim text.
    #[must_use]
    pub fn text() -> Self {
        Self::of(ElementKind::Text)
    }

    /// Integer coercion.
    #[must_use]
    pub fn integer() -> Self {
        Self::of(ElementKind::Integer)
    }

    /// Float coercion.
    #[must_use]
    pub fn float() -> Self {
        Self::of(ElementKind::Float)
    }

    /// Boolean coercion.
    #[must_use]
    pub fn boolean() -> Self {
        Self::of(ElementKind::Boolean)
    }

    /// Timestamp coercion.
    #[must_use]
    pub fn timestamp() -> Self {
        Self::of(ElementKind::Timestamp)
    }

    /// Nested structure.
    #[must_use]
    pub fn structure(grammar: Grammar) -> Self {
        Self::of(ElementKind::Structure(grammar))
    }

    /// Wrapper element holding repeated `member` children.
    #[must_use]
    pub fn wrapper(member: impl Into<String>, rule: Self) -> Self {
        Self::of(ElementKind::Wrapper {
            member: member.into(),
            rule: Box::new(rule),
        })
    }

    /// The element repeats directly inside its parent and always yields a list.
    #[must_use]
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// Store the value under `key` instead of the tag name.
    #[must_use]
    pub fn rename(mut self, key: impl Into<String>) -> Self {
        self.rename = Some(key.into());
        self
    }

    /// The content kind.
    #[must_use]
    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    /// Whether the element is a flattened list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Output key for an element with this rule.
    #[must_use]
    pub fn key<'a>(&'a self, tag: &'a str) -> &'a str {
        self.rename.as_deref().unwrap_or(tag)
    }

    /// Rule for a child element, when this rule describes children.
    #[must_use]
    pub fn child(&self, tag: &str) -> Option<&Self> {
        match &self.kind {
            ElementKind::Structure(grammar) => grammar.rule(tag),
            ElementKind::Wrapper { member, rule } if member == tag => Some(rule.as_ref()),
            _ => None,
        }
    }
}

/// Ordered set of element rules for one structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grammar {
    elements: Vec<(String, ElementRule)>,
}

impl Grammar {
    /// An empty grammar. Every child is then unknown and kept as text or map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a child element.
    #[must_use]
    pub fn element(mut self, tag: impl Into<String>, rule: ElementRule) -> Self {
        let tag = tag.into();
        self.elements.retain(|(t, _)| *t != tag);
        self.elements.push((tag, rule));
        self
    }

    /// Rule for a child tag.
    #[must_use]
    pub fn rule(&self, tag: &str) -> Option<&ElementRule> {
        self.elements
            .iter()
            .find_map(|(t, rule)| (t == tag).then_some(rule))
    }

    /// Declared elements in declaration order.
    pub fn elements(&self) -> impl Iterator<Item = (&str, &ElementRule)> {
        self.elements.iter().map(|(t, r)| (t.as_str(), r))
    }
}
