//! CLI command implementations

pub mod config;
pub mod flash;
pub mod list;
