//! Streaming XML for Stowage responses.
//!
//! Response bodies are parsed incrementally: [`StreamingParser::feed`] takes
//! chunks as they arrive from the network and closes elements as soon as
//! their end tag is seen. A [`Grammar`] tells the parser which elements are
//! scalars (and how to coerce them), which are nested structures and which
//! repeat, so values are typed at the moment their element closes and a bad
//! value is reported with its tag path.
//!
//! Elements the grammar does not mention are kept: leaves as text, elements
//! with children as maps.
//!
//! [`to_xml`] writes a [`Value`] back out, guided by the same grammar.

pub mod error;
pub mod frame;
pub mod grammar;
pub mod parser;
pub mod value;
pub mod writer;

pub use error::XmlError;
pub use frame::{Finalized, FrameStack};
pub use grammar::{ElementKind, ElementRule, Grammar};
pub use parser::{Document, StreamingParser, parse};
pub use value::Value;
pub use writer::{S3_NAMESPACE, to_xml, to_xml_with_namespace};
