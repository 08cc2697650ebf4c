//! Report parsers. Each turns a tool's raw artifact into structured results.
//!
//! Parsers are pure: they take the raw text (and the working-copy root to
//! strip from file paths) and return either a report or a
//! [`ReportParseError`](crate::error::ReportParseError) carrying the raw input.

pub mod duplication;
pub mod spec;
pub mod unit_test;

use std::str::FromStr;

/// Parse an XML attribute, treating absent or malformed values as `None`.
pub(crate) fn attr<T: FromStr>(node: &roxmltree::Node<'_, '_>, name: &str) -> Option<T> {
    node.attribute(name).and_then(|v| v.trim().parse().ok())
}
