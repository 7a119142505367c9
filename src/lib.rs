//! # xmlquill
//!
//! A handle-based object model over XML and HTML documents, with `XPath` 1.0
//! queries.
//!
//! Documents are parsed into an arena tree ([`tree::Document`]) owned by an
//! [`XmlDocument`]. Nodes are reached through [`Element`] handles that read
//! the tree on demand, so a handle always reflects the current structure and
//! reports [`Error::NodeInvalid`] once its node has been removed.
//!
//! ## Quick Start
//!
//! ```
//! use xmlquill::{Mode, XmlDocument};
//!
//! let doc = XmlDocument::parse_str("<shelf><book year='1999'>Alpha</book></shelf>", Mode::Xml).unwrap();
//! let root = doc.root().unwrap();
//!
//! let book = root.child("book").unwrap().unwrap();
//! assert_eq!(book.attribute_as_int("year", None).unwrap(), 1999);
//!
//! book.set_attribute("year", None, "2001").unwrap();
//! let titles = root.query_strings("book[@year > 2000]").unwrap();
//! assert_eq!(titles, ["Alpha"]);
//! ```
//!
//! ## Layout
//!
//! - [`element`]: the handle API (`XmlDocument`, `Element`, iteration).
//! - [`xpath`]: `XPath` 1.0 compiler and evaluator.
//! - [`tree`]: the arena tree the handles point into.
//! - [`parser`], [`html`]: strict XML and lenient HTML parsers.
//! - [`encoding`]: input encoding detection and transcoding.
//! - [`serial`]: markup serialization.
//! - [`error`]: error types.

pub mod element;
pub mod encoding;
pub mod error;
pub mod html;
pub mod parser;
pub mod serial;
pub mod tree;
pub mod xpath;

pub use element::{Element, LoadOptions, Mode, NodeType, QueryIter, XmlDocument};
pub use error::{Error, ParseError, Result};
pub use tree::{Attribute, Document, NodeId};
pub use xpath::{CompiledQuery, NamespaceBindings, XPathValue};
