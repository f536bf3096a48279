use services::RepositoryError;
use tokio_postgres::error::SqlState;

/// Map a postgres error onto the shared repository taxonomy. Constraint
/// violations become typed variants; everything else is opaque.
pub fn map_pg_error(err: tokio_postgres::Error) -> RepositoryError {
    if let Some(state) = err.code() {
        match *state {
            SqlState::UNIQUE_VIOLATION => return RepositoryError::AlreadyExists,
            SqlState::FOREIGN_KEY_VIOLATION => {
                return RepositoryError::ForeignKeyViolation(err.to_string())
            }
            SqlState::CHECK_VIOLATION | SqlState::NOT_NULL_VIOLATION => {
                return RepositoryError::ValidationFailed(err.to_string())
            }
            _ => {}
        }
    }
    RepositoryError::DatabaseError(err.into())
}

pub fn pool_error(err: deadpool_postgres::PoolError) -> RepositoryError {
    RepositoryError::PoolError(anyhow::anyhow!(err.to_string()))
}
