//! Sentinel CI — build pipeline engine.
//!
//! Checks out a project's repository, runs its configured plugins stage by
//! stage, turns tool reports into build errors and drives each build to a
//! terminal status. Storage, triggers and dashboards sit behind
//! [`services::build_service::BuildStore`] and [`services::build_report`].

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod plugins;
pub mod reports;
pub mod services;
