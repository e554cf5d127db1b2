//! Tracing subscriber setup
//!
//! Level precedence: `RUST_LOG` → `--verbose` (debug) → TOML `[logging] level`.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Effective filter directive for the given logging section and verbosity
pub fn filter_directive(logging: &LoggingConfig, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        logging.level.clone()
    }
}

/// Install the global tracing subscriber
pub fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let directive = filter_directive(logging, verbose);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", directive, e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Tracing init failed: {}", e)))
}
