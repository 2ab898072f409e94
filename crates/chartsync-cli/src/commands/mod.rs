//! CLI command implementations

pub mod agent;
pub mod auth;
pub mod completions;
pub mod config;
pub mod history;
pub mod queue;
pub mod status;
pub mod sync;
