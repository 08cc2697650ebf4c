//! Build engine data model: projects, builds, diagnostics, pipeline definitions.

pub mod build;
pub mod build_error;
pub mod pipeline;
pub mod project;
