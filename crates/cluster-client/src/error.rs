//! Collaborator client errors

use thiserror::Error;

/// Errors that can occur when talking to a cluster collaborator
#[derive(Debug, Error)]
pub enum ClientError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON deserialization error (RKE state file)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local IO error (config files, process spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Provider rejected the request; retrying will not help
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider failed in a way that may succeed on retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// External command exited unsuccessfully
    #[error("Command `{command}` failed (exit code {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl ClientError {
    /// Whether the failure is worth retrying
    ///
    /// API rejections, missing resources and local IO problems are permanent;
    /// transport failures, timeouts and failed `rke up` runs (usually SSH or
    /// docker hiccups on a node) are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transient(_) | ClientError::Timeout(_) | ClientError::CommandFailed { .. } => true,
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Kube(e) => !matches!(e, kube::Error::Api(_)),
            ClientError::Yaml(_)
            | ClientError::Json(_)
            | ClientError::Io(_)
            | ClientError::Provider(_)
            | ClientError::NotFound(_) => false,
        }
    }
}
