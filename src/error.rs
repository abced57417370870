//! Error types for feedrelay.

use thiserror::Error;

/// Common error type for feedrelay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Database error.
    ///
    /// Errors from sqlx are automatically converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feed could not be retrieved or parsed.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// A subscription for this URL already exists.
    #[error("subscription already exists: {0}")]
    Duplicate(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Validation error for input or state transitions.
    #[error("validation error: {0}")]
    Validation(String),

    /// The delivery sink rejected an item.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for RelayError {
    fn from(e: sqlx::Error) -> Self {
        RelayError::Database(e.to_string())
    }
}

/// Result type alias for feedrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = RelayError::Fetch("HTTP error: 503".to_string());
        assert_eq!(err.to_string(), "fetch error: HTTP error: 503");
    }

    #[test]
    fn test_duplicate_error_display() {
        let err = RelayError::Duplicate("https://example.com/feed.xml".to_string());
        assert_eq!(
            err.to_string(),
            "subscription already exists: https://example.com/feed.xml"
        );
    }

    #[test]
    fn test_not_found_error_display() {
        let err = RelayError::NotFound("subscription".to_string());
        assert_eq!(err.to_string(), "subscription not found");
    }

    #[test]
    fn test_delivery_error_display() {
        let err = RelayError::Delivery("endpoint returned 500".to_string());
        assert_eq!(err.to_string(), "delivery error: endpoint returned 500");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let err: RelayError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, RelayError::Database(_)));
    }
}
