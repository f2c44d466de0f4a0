//! CLI command implementations

pub mod config;
pub mod exempt;
pub mod preview;
