//! Fatal error taxonomy for a conversion run.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while obtaining or validating the input scene.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read scene '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scene parse error: {0}")]
    Parse(String),
    #[error("invalid scene: {what}")]
    Invalid { what: String },
}

impl ImportError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        ImportError::Invalid { what: what.into() }
    }
}

/// Errors that abort a conversion. Every variant carries enough context
/// (node, bone, file) to locate the offending input.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("import failed: {0}")]
    Import(#[from] ImportError),
    #[error("duplicate bone name '{name}' makes weight bindings ambiguous")]
    NameCollision { name: String },
    #[error("transform cache has no entry for node '{node}'; the cache was recorded for a different scene")]
    CacheIncompatible { node: String },
    #[error("transform cache i/o on '{path}': {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transform cache format: {0}")]
    CacheFormat(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("export failed: {0}")]
    Export(String),
    #[error("conversion cancelled")]
    Cancelled,
}

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;
