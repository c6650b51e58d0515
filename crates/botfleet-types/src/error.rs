use thiserror::Error;

/// Errors from repository operations (used by trait definitions in
/// botfleet-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        assert_eq!(RepositoryError::NotFound.to_string(), "entity not found");
        assert!(
            RepositoryError::Conflict("duplicate name".to_string())
                .to_string()
                .contains("duplicate name")
        );
    }
}
