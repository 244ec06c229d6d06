//! Search backend error types.
//!
//! This module defines the unified error type for all operations a
//! `SearchClient` implementation can perform. Rejections are the one
//! transient class: they signal backpressure from the backend's bulk
//! executor and are the only errors the engine retries.

use thiserror::Error;

/// Unified errors from search backend operations.
///
/// Used by the `SearchClient` trait for all sub-requests the engine issues.
/// Every variant except `Rejected` is terminal from the engine's point of
/// view; `Rejected` is retried with backoff until the retry policy is
/// exhausted.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// Failed to reach the search backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Transient backpressure from the backend's bulk executor.
    #[error("Rejected execution: {0}")]
    Rejected(String),

    /// A search or scroll request failed outright.
    #[error("Search error: {0}")]
    SearchError(String),

    /// A bulk request failed outright (not per-item failures).
    #[error("Bulk error: {0}")]
    BulkError(String),

    /// A refresh request failed.
    #[error("Refresh error: {0}")]
    RefreshError(String),

    /// Failed to parse a response from the backend.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A bulk item reported an op type outside the closed set.
    #[error("Unknown op type [{0}]")]
    UnknownOpType(String),

    /// Unknown error.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SearchError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a rejected-execution error.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create a search error.
    pub fn search(msg: impl Into<String>) -> Self {
        Self::SearchError(msg.into())
    }

    /// Create a bulk error.
    pub fn bulk(msg: impl Into<String>) -> Self {
        Self::BulkError(msg.into())
    }

    /// Create a refresh error.
    pub fn refresh(msg: impl Into<String>) -> Self {
        Self::RefreshError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create an unknown error.
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Whether this error is the transient rejection class.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}
