//! Gang scheduling error types

#[derive(Debug, thiserror::Error)]
pub enum GangError {
    #[error("unknown gang scheduling backend '{0}'")]
    UnknownBackend(String),

    #[error("invalid replica spec for role '{role}': {reason}")]
    InvalidReplicaSpec { role: String, reason: String },

    #[error("job has no namespace")]
    MissingNamespace,

    #[error("invalid gang scheduling configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("conflict updating gang resource '{name}'")]
    Conflict { name: String },

    #[error("gang resource '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: Box<GangError>,
    },
}

impl GangError {
    /// Whether re-running the reconcile pass can fix this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            GangError::Conflict { .. }
            | GangError::AlreadyExists { .. }
            | GangError::Timeout { .. }
            | GangError::RetriesExhausted { .. } => true,
            GangError::Kube(e) => kube_error_is_transient(e),
            GangError::UnknownBackend(_)
            | GangError::InvalidReplicaSpec { .. }
            | GangError::MissingNamespace
            | GangError::Config(_)
            | GangError::Serialization(_) => false,
        }
    }
}

fn kube_error_is_transient(error: &kube::Error) -> bool {
    match error {
        kube::Error::Api(ae) => ae.code == 409 || ae.code == 429 || ae.code >= 500,
        kube::Error::SerdeError(_) => false,
        _ => true,
    }
}
