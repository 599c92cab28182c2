//! Chunk-fed streaming parser.
//!
//! Bytes arrive in arbitrary pieces. A small lexical scanner tracks whether
//! the buffered tail sits inside text, a tag (including quoted attribute
//! values), a comment or a CDATA section, and remembers the position right
//! after the last complete markup item. Only bytes up to that boundary are
//! handed to `quick-xml`; the rest waits for the next chunk. The result is
//! independent of where the body was split.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::trace;

use crate::error::XmlError;
use crate::frame::{Finalized, FrameStack};
use crate::grammar::Grammar;
use crate::value::Value;

/// A parsed response document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Tag name of the root element.
    pub root: String,
    /// Finalized root value.
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ScanState {
    #[default]
    Text,
    Markup {
        start: usize,
        quote: Option<u8>,
    },
    Comment {
        start: usize,
    },
    CData {
        start: usize,
    },
}

#[derive(Debug, Default)]
struct Scanner {
    state: ScanState,
    pos: usize,
}

impl Scanner {
    /// Scan newly buffered bytes and return the end of the last complete
    /// markup item, if any was completed.
    fn scan(&mut self, buf: &[u8]) -> Option<usize> {
        let mut boundary = None;
        while self.pos < buf.len() {
            let i = self.pos;
            let b = buf[i];
            self.state = match self.state {
                ScanState::Text if b == b'<' => ScanState::Markup {
                    start: i,
                    quote: None,
                },
                ScanState::Text => ScanState::Text,
                ScanState::Markup {
                    start,
                    quote: Some(q),
                } => ScanState::Markup {
                    start,
                    quote: (b != q).then_some(q),
                },
                ScanState::Markup { start, quote: None } => {
                    let head = &buf[start..=i];
                    if head == b"<!--" {
                        ScanState::Comment { start }
                    } else if head == b"<![CDATA[" {
                        ScanState::CData { start }
                    } else if b == b'>' {
                        boundary = Some(i + 1);
                        ScanState::Text
                    } else if b == b'"' || b == b'\'' {
                        ScanState::Markup {
                            start,
                            quote: Some(b),
                        }
                    } else {
                        ScanState::Markup { start, quote: None }
                    }
                }
                ScanState::Comment { start } => {
                    if b == b'>' && i >= start + 6 && &buf[i - 2..i] == b"--" {
                        boundary = Some(i + 1);
                        ScanState::Text
                    } else {
                        ScanState::Comment { start }
                    }
                }
                ScanState::CData { start } => {
                    if b == b'>' && i >= start + 11 && &buf[i - 2..i] == b"]]" {
                        boundary = Some(i + 1);
                        ScanState::Text
                    } else {
                        ScanState::CData { start }
                    }
                }
            };
            self.pos += 1;
        }
        boundary
    }

    /// Rebase positions after `by` bytes were drained from the buffer front.
    fn shift(&mut self, by: usize) {
        self.pos -= by;
        self.state = match self.state {
            ScanState::Text => ScanState::Text,
            ScanState::Markup { start, quote } => ScanState::Markup {
                start: start - by,
                quote,
            },
            ScanState::Comment { start } => ScanState::Comment { start: start - by },
            ScanState::CData { start } => ScanState::CData { start: start - by },
        };
    }
}

/// Incremental parser for one response body.
///
/// A parser is single-use: create a fresh one per body, [`feed`] it chunks
/// and call [`finish`] once the body ends.
///
/// [`feed`]: StreamingParser::feed
/// [`finish`]: StreamingParser::finish
///
/// # Examples
///
/// ```
/// use stowage_xml::{ElementRule, Grammar, StreamingParser};
///
/// let grammar = Grammar::new().element("Size", ElementRule::integer());
/// let mut parser = StreamingParser::new(&grammar);
/// parser.feed(b"<Object><Si").unwrap();
/// parser.feed(b"ze>42</Size></Object>").unwrap();
///
/// let doc = parser.finish().unwrap();
/// assert_eq!(doc.root, "Object");
/// assert_eq!(doc.value.get("Size").and_then(|v| v.as_i64()), Some(42));
/// ```
#[derive(Debug)]
pub struct StreamingParser<'g> {
    stack: FrameStack<'g>,
    pending: Vec<u8>,
    scanner: Scanner,
    root: Option<Finalized>,
}

impl<'g> StreamingParser<'g> {
    /// Create a parser whose root element is described by `grammar`.
    #[must_use]
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            stack: FrameStack::new(grammar),
            pending: Vec::new(),
            scanner: Scanner::default(),
            root: None,
        }
    }

    /// Consume the next chunk of the body.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), XmlError> {
        self.pending.extend_from_slice(chunk);
        let Some(boundary) = self.scanner.scan(&self.pending) else {
            return Ok(());
        };

        trace!(bytes = boundary, depth = self.stack.depth(), "parsing xml segment");
        process_segment(&mut self.stack, &mut self.root, &self.pending[..boundary])?;
        self.pending.drain(..boundary);
        self.scanner.shift(boundary);
        Ok(())
    }

    /// Current element nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Whether the root element has been closed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    /// End of body: return the finalized root.
    pub fn finish(self) -> Result<Document, XmlError> {
        if self.stack.depth() > 0 {
            return Err(XmlError::Truncated {
                depth: self.stack.depth(),
                path: self.stack.path(),
            });
        }
        if !self.pending.iter().all(u8::is_ascii_whitespace) {
            return Err(XmlError::Syntax(format!(
                "unterminated content after the root element: {:?}",
                String::from_utf8_lossy(&self.pending)
            )));
        }
        self.root
            .map(|root| Document {
                root: root.name,
                value: root.value,
            })
            .ok_or_else(|| XmlError::MissingElement("root element".to_owned()))
    }
}

/// Parse a complete body in one call.
pub fn parse(body: &[u8], grammar: &Grammar) -> Result<Document, XmlError> {
    let mut parser = StreamingParser::new(grammar);
    parser.feed(body)?;
    parser.finish()
}

fn process_segment(
    stack: &mut FrameStack<'_>,
    root: &mut Option<Finalized>,
    segment: &[u8],
) -> Result<(), XmlError> {
    let mut reader = Reader::from_reader(segment);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.expand_empty_elements = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                ensure_single_root(root)?;
                stack.open(utf8_name(e.local_name().as_ref())?);
            }
            Event::Empty(e) => {
                ensure_single_root(root)?;
                let name = utf8_name(e.local_name().as_ref())?;
                stack.open(name.clone());
                if let Some(done) = stack.close(&name)? {
                    *root = Some(done);
                }
            }
            Event::End(e) => {
                let name = utf8_name(e.local_name().as_ref())?;
                if let Some(done) = stack.close(&name)? {
                    *root = Some(done);
                }
            }
            Event::Text(e) => {
                let decoded = e.decode().map_err(|err| XmlError::Syntax(err.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|err| XmlError::Syntax(err.to_string()))?;
                stack.text(&unescaped)?;
            }
            Event::CData(e) => stack.text(&String::from_utf8_lossy(&e))?,
            Event::GeneralRef(e) => stack.text(&resolve_reference(&e)?)?,
            Event::Eof => return Ok(()),
            _ => {}
        }
    }
}

fn ensure_single_root(root: &Option<Finalized>) -> Result<(), XmlError> {
    match root {
        Some(done) => Err(XmlError::Syntax(format!(
            "element after the closed root <{}>",
            done.name
        ))),
        None => Ok(()),
    }
}

fn utf8_name(raw: &[u8]) -> Result<String, XmlError> {
    std::str::from_utf8(raw)
        .map(ToOwned::to_owned)
        .map_err(|e| XmlError::Syntax(format!("tag name is not UTF-8: {e}")))
}

/// Resolve `&name;` for the predefined entities and character references.
fn resolve_reference(raw: &[u8]) -> Result<String, XmlError> {
    let name = std::str::from_utf8(raw)
        .map_err(|e| XmlError::Syntax(format!("entity name is not UTF-8: {e}")))?;
    let resolved = match name {
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "apos" => '\'',
        "quot" => '"',
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
                .ok_or_else(|| XmlError::Syntax(format!("unknown entity &{name};")))?
        }
    };
    Ok(resolved.to_string())
}
