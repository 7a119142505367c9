//! Markup serialization.
//!
//! Serializes a `Document`, or a single subtree of it, back to XML text.
//! Output is always UTF-8.

pub mod xml;

pub use xml::{
    serialize, serialize_node, serialize_node_with_options, serialize_with_options,
    SerializeOptions,
};
