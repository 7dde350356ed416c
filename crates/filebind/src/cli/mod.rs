//! CLI command implementations.

pub mod build;
pub mod check_name;
pub mod context;
pub mod download;
pub mod error;
pub mod show;
