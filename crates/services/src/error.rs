use crate::common::RepositoryError;

/// Error taxonomy shared by every engine. The HTTP layer maps each variant
/// to a status code; no handler branches on error text.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidArgument(String),

    /// Unique or foreign-key constraint violation.
    #[error("{0}")]
    Conflict(String),

    /// Operation rejected because of the current lifecycle state,
    /// e.g. a bulk batch against a closed crawl round.
    #[error("{0}")]
    ConflictingState(String),

    #[error("{0}")]
    Unauthorized(String),

    /// STS, object store, or search engine failure. The upstream code is
    /// preserved in the message for diagnosis.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(entity) => ServiceError::NotFound(entity),
            RepositoryError::AlreadyExists => {
                ServiceError::Conflict("resource already exists".to_string())
            }
            RepositoryError::ForeignKeyViolation(msg) => ServiceError::Conflict(msg),
            RepositoryError::DependencyExists(msg) => ServiceError::Conflict(msg),
            RepositoryError::ValidationFailed(msg) => ServiceError::InvalidArgument(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}
