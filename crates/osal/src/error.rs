use std::io;

use thiserror::Error;

/// Errors reported by the platform layer.
#[derive(Error, Debug)]
pub enum OsalError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("thread `{0}` panicked")]
    Panicked(String),
    #[error("a global logger is already installed")]
    LoggerInstalled,
}
