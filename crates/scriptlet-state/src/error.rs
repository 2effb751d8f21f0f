//! Errors raised by the cluster and node stores.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// A failed store operation. Backend failures carry redb's message; record
/// failures name the table the record lives in.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open scriptlet database: {0}")]
    Open(String),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("store table unavailable: {0}")]
    Table(String),

    #[error("reading from store failed: {0}")]
    Read(String),

    #[error("writing to store failed: {0}")]
    Write(String),

    /// A record could not be encoded for storage.
    #[error("cannot encode {table} record: {reason}")]
    Encode { table: String, reason: String },

    /// A stored record no longer decodes as its type.
    #[error("corrupt record in {table}: {reason}")]
    Corrupt { table: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_errors_name_their_table() {
        let err = StateError::Corrupt {
            table: "projects".to_string(),
            reason: "expected value at line 1 column 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt record in projects: expected value at line 1 column 1"
        );
        assert_eq!(
            StateError::NotFound("project \"prod\"".to_string()).to_string(),
            "project \"prod\" not found"
        );
    }
}
