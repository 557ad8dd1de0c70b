//! Storage error types.

/// Errors that can occur during entry store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An entry with the same key already exists.
    #[error("Entry already exists: {key}")]
    AlreadyExists {
        /// The conflicting entry key.
        key: String,
    },

    /// The requested entry was not found where the operation requires it.
    ///
    /// Point lookups return `Option` instead; this variant is reserved for
    /// operations like `merge` that update an existing entry.
    #[error("Entry not found: {key}")]
    NotFound {
        /// The missing entry key.
        key: String,
    },

    /// The entry payload could not be serialized or deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The backing store is unreachable or failed mid-operation.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns `true` if the error indicates a missing entry.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found("grant:abc");
        assert_eq!(err.to_string(), "Entry not found: grant:abc");
        assert!(err.is_not_found());

        let err = StorageError::backend("connection refused");
        assert_eq!(err.to_string(), "Backend error: connection refused");
        assert!(!err.is_not_found());
    }
}
