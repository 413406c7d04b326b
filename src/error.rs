//! Error Types
//!
//! One error sum for the whole engine. Binder, catalog and planner errors
//! surface synchronously from `prepare()`; runtime errors are raised on
//! worker threads, the first one wins and cancels the query.

use thiserror::Error;

/// Engine errors
#[derive(Error, Debug, Clone)]
pub enum QuiverError {
    /// Statement could not be parsed (surfaced by the external parser)
    #[error("Parser exception: {0}")]
    Parser(String),

    /// Name resolution, typing or overload failure
    #[error("Binder exception: {0}")]
    Binder(String),

    /// Catalog lookup or mutation failure
    #[error("Catalog exception: {0}")]
    Catalog(String),

    /// No viable plan for the bound statement
    #[error("Planner exception: {0}")]
    Planner(String),

    /// Execution failure: arithmetic, I/O, key conflicts, out of memory
    #[error("Runtime exception: {0}")]
    Runtime(String),

    /// Cooperative cancellation (timeout or explicit interrupt)
    #[error("Interrupted")]
    Interrupted,

    /// Invariant violation. Never raised by well-formed queries; aborts
    /// the transaction.
    #[error("Internal exception: {0}")]
    Internal(String),
}

impl QuiverError {
    pub fn binder(msg: impl Into<String>) -> Self {
        QuiverError::Binder(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        QuiverError::Catalog(msg.into())
    }

    pub fn planner(msg: impl Into<String>) -> Self {
        QuiverError::Planner(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        QuiverError::Runtime(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        QuiverError::Internal(msg.into())
    }
}

impl From<std::io::Error> for QuiverError {
    fn from(e: std::io::Error) -> Self {
        QuiverError::Runtime(format!("I/O error: {e}"))
    }
}

impl From<arrow::error::ArrowError> for QuiverError {
    fn from(e: arrow::error::ArrowError) -> Self {
        QuiverError::Runtime(format!("Arrow error: {e}"))
    }
}

impl From<parquet::errors::ParquetError> for QuiverError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        QuiverError::Runtime(format!("Parquet error: {e}"))
    }
}

/// Result type for engine operations
pub type QuiverResult<T> = Result<T, QuiverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = QuiverError::binder("variable a is not in scope");
        assert_eq!(e.to_string(), "Binder exception: variable a is not in scope");

        let e = QuiverError::Interrupted;
        assert_eq!(e.to_string(), "Interrupted");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: QuiverError = io.into();
        assert!(matches!(e, QuiverError::Runtime(_)));
        assert!(e.to_string().contains("gone"));
    }
}
