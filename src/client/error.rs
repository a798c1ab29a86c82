//! # Client Errors
//!
//! Classification of object store failures. The reconciler matches on
//! `NotFound`, `AlreadyExists` and `Conflict` explicitly; everything else is
//! transient and propagated.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Stale resourceVersion; re-read and retry
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),
}

impl ClientError {
    /// Classify a kube error for the object `kind`/`name`
    #[must_use]
    pub fn from_kube(kind: &str, name: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: api_err.message,
            },
            other => Self::Kube(other),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
