//! Cluster model errors

use thiserror::Error;

/// Errors raised while loading or parsing cluster model documents
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML document could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File could not be read
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Unknown node role string
    #[error("Unknown node role: {0}")]
    UnknownRole(String),
}
