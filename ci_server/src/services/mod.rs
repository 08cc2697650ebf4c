//! Build engine services.

pub mod build_report;
pub mod build_service;
pub mod checkout;
pub mod command;
pub mod error_service;
pub mod executor;
pub mod pipeline;
pub mod project_service;
pub mod tool_locator;
