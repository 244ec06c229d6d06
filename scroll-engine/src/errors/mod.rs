//! Error types for the bulk-by-scroll engine.

use scroll_client::SearchError;
use thiserror::Error;

/// Errors that can occur while validating or running a bulk-by-scroll
/// request.
///
/// Validation errors are raised before any I/O. Everything else funnels
/// through the driver's termination path, which still releases the scroll
/// cursor before surfacing the error.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// One or more request-validation failures, aggregated.
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The cluster is too old to run this request safely.
    #[error("Refusing to execute [{request}] because the entire cluster has not been upgraded to 2.3")]
    ClusterNotUpgraded {
        /// Rendered form of the refused request.
        request: String,
    },

    /// A script mutated a document identity or routing field.
    #[error("Modifying [{field}] not allowed")]
    ForbiddenFieldMutation {
        /// The field the script tried to change.
        field: &'static str,
    },

    /// A status snapshot was constructed with a negative counter.
    #[error("{name} must be greater than 0 but was [{value}]")]
    NegativeCounter {
        /// Name of the offending counter.
        name: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// An invalid value for the `conflicts` request option.
    #[error("conflicts may only be \"proceed\" or \"abort\" but was [{0}]")]
    InvalidConflicts(String),

    /// A bulk item's outcome does not match its op type.
    #[error("Bulk item op type [{op_type}] does not match its outcome")]
    BulkItemMismatch {
        /// Wire name of the op type.
        op_type: &'static str,
    },

    /// The generic worker pool refused to run the batch handler.
    #[error("Batch handler rejected: {0}")]
    BatchRejected(String),

    /// An error from the search backend.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Failed to serialize or deserialize structured data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failed to encode or decode the binary wire form.
    #[error("Wire error: {0}")]
    Wire(String),

    /// A user script failed.
    #[error("Script error: {0}")]
    Script(String),

    /// Invariant violation inside the engine.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create an aggregated validation error.
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation(errors)
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a wire error.
    pub fn wire(msg: impl Into<String>) -> Self {
        Self::Wire(msg.into())
    }

    /// Create a script error.
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_aggregates_messages() {
        let err = EngineError::validation(vec![
            "retries cannot be negative".to_string(),
            "search source must be valid JSON".to_string(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("retries cannot be negative"));
        assert!(rendered.contains("search source must be valid JSON"));
    }

    #[test]
    fn test_cluster_refusal_message() {
        let err = EngineError::ClusterNotUpgraded {
            request: "update-by-query [docs]".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Refusing to execute [update-by-query [docs]] because the entire cluster has not been upgraded to 2.3"
        );
    }

    #[test]
    fn test_forbidden_field_message_names_the_field() {
        let err = EngineError::ForbiddenFieldMutation { field: "_id" };
        assert_eq!(err.to_string(), "Modifying [_id] not allowed");
    }
}
