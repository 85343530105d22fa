//! Registry error types.

use thiserror::Error;

/// Errors returned by registry operations, local or remote
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another live peer already holds this username
    #[error("username already registered: {0}")]
    DuplicateUsername(String),

    /// No live record for this username
    #[error("peer not found: {0}")]
    NotFound(String),

    /// Registry could not be reached within the retry budget
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    /// Username fails validation
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
}

impl RegistryError {
    /// Stable machine-readable reason code, used on the wire and by bridges
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            RegistryError::DuplicateUsername(_) => "duplicate-username",
            RegistryError::NotFound(_) => "not-found",
            RegistryError::Unreachable(_) => "unreachable",
            RegistryError::InvalidUsername(_) => "invalid-username",
        }
    }

    /// Returns true if retrying later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Unreachable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            RegistryError::DuplicateUsername("a".into()).reason(),
            "duplicate-username"
        );
        assert_eq!(RegistryError::NotFound("a".into()).reason(), "not-found");
        assert_eq!(RegistryError::Unreachable("x".into()).reason(), "unreachable");
        assert_eq!(
            RegistryError::InvalidUsername("".into()).reason(),
            "invalid-username"
        );
    }

    #[test]
    fn test_only_unreachable_is_transient() {
        assert!(RegistryError::Unreachable("down".into()).is_transient());
        assert!(!RegistryError::NotFound("bob".into()).is_transient());
        assert!(!RegistryError::DuplicateUsername("bob".into()).is_transient());
    }

    #[test]
    fn test_display() {
        let err = RegistryError::NotFound("carol".into());
        assert!(err.to_string().contains("carol"));
    }
}
