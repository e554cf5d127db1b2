//! # ls2old Common Library
//!
//! Shared code for the LingSync-to-OLD migrator:
//! - Error and result types
//! - TOML bootstrap configuration and work directory resolution
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
