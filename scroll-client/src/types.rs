//! Request and response types exchanged with the search backend.
//!
//! These are deliberately backend-neutral: a `SearchClient` implementation
//! translates them to whatever wire protocol its cluster speaks. The engine
//! only relies on the shapes defined here.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::errors::SearchError;

/// HTTP-like status carried by an optimistic-concurrency failure.
pub const STATUS_CONFLICT: u16 = 409;
/// HTTP-like status carried by a rejected (backpressured) bulk item.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Context and header maps attached to a request.
///
/// The engine copies these verbatim from the request envelope onto every
/// sub-request it issues, so that authentication, tracing, and deprecation
/// state survive the whole scroll/bulk cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Opaque per-request context values.
    pub values: BTreeMap<String, String>,
    /// Transport headers.
    pub headers: BTreeMap<String, String>,
}

/// The search that selects documents to process.
///
/// `source` is an opaque JSON payload; the engine merges its own defaults
/// into it before dispatch but otherwise does not interpret it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    /// Indices to search. Empty means all indices.
    pub indices: Vec<String>,
    /// Document types to search. Empty means all types.
    pub doc_types: Vec<String>,
    /// Opaque search source (JSON bytes).
    pub source: Option<Vec<u8>>,
    /// How long the backend keeps the scroll cursor alive between fetches.
    pub scroll_keepalive: Option<Duration>,
    /// Context propagated from the request envelope.
    pub context: RequestContext,
}

impl SearchRequest {
    /// Create a search over the given indices.
    pub fn new(indices: Vec<String>) -> Self {
        Self {
            indices,
            ..Self::default()
        }
    }

    /// Validate the embedded search source.
    ///
    /// Returns one message per violation; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(source) = &self.source {
            if serde_json::from_slice::<Value>(source).is_err() {
                errors.push("search source must be valid JSON".to_string());
            }
        }
        errors
    }
}

/// Continuation of an existing scroll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollRequest {
    /// Cursor returned by the previous search or scroll response.
    pub scroll_id: String,
    /// Keepalive for the next fetch.
    pub keepalive: Duration,
    /// Context propagated from the request envelope.
    pub context: RequestContext,
}

/// Release of one or more scroll cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearScrollRequest {
    /// Cursors to release.
    pub scroll_ids: Vec<String>,
    /// Context propagated from the request envelope.
    pub context: RequestContext,
}

/// Response to a clear-scroll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearScrollResponse {
    /// Whether the release succeeded.
    pub succeeded: bool,
    /// Number of search contexts freed.
    pub num_freed: u64,
}

/// Refresh of the named indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Indices to refresh.
    pub indices: Vec<String>,
    /// Context propagated from the request envelope.
    pub context: RequestContext,
}

/// Response to a refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResponse {
    /// Shards the refresh was attempted on.
    pub total_shards: u32,
    /// Shards that refreshed successfully.
    pub successful_shards: u32,
    /// Shards that failed to refresh.
    pub failed_shards: u32,
}

/// One document returned by a search or scroll response.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollHit {
    /// Index the document lives in.
    pub index: String,
    /// Mapping type of the document.
    pub doc_type: String,
    /// Document id.
    pub id: String,
    /// Document version at read time.
    pub version: i64,
    /// Routing value, when the document was routed.
    pub routing: Option<String>,
    /// Parent id, when the document has one.
    pub parent: Option<String>,
    /// Timestamp field, when stored.
    pub timestamp: Option<i64>,
    /// TTL field, when stored.
    pub ttl: Option<i64>,
    /// The document body.
    pub source: Value,
}

/// Failure of one shard while serving a search or scroll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    /// Index of the failed shard, when known.
    pub index: Option<String>,
    /// Shard number, when known.
    pub shard_id: Option<u32>,
    /// Human-readable reason.
    pub reason: String,
}

/// Response to a search or scroll request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Cursor for the next fetch, when the backend kept one open.
    pub scroll_id: Option<String>,
    /// Total number of documents matching the query.
    pub total_hits: u64,
    /// The documents in this batch.
    pub hits: Vec<ScrollHit>,
    /// Per-shard failures, when any shard could not serve the request.
    pub shard_failures: Vec<ShardFailure>,
    /// Whether the search timed out on the backend.
    pub timed_out: bool,
}

/// Write-consistency level for mutating requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteConsistency {
    /// Use the backend's configured default.
    #[default]
    Default,
    /// One shard copy must be available.
    One,
    /// A quorum of shard copies must be available.
    Quorum,
    /// All shard copies must be available.
    All,
}

impl WriteConsistency {
    /// Wire id of this level.
    pub fn id(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::One => 1,
            Self::Quorum => 2,
            Self::All => 3,
        }
    }

    /// Decode a wire id.
    pub fn from_id(id: u8) -> Result<Self, SearchError> {
        match id {
            0 => Ok(Self::Default),
            1 => Ok(Self::One),
            2 => Ok(Self::Quorum),
            3 => Ok(Self::All),
            other => Err(SearchError::parse(format!(
                "No write consistency match for id [{}]",
                other
            ))),
        }
    }
}

/// Versioning semantics for an index operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionType {
    /// The backend's internal optimistic-concurrency versioning.
    #[default]
    Internal,
    /// Caller-supplied external versioning.
    External,
}

/// Operation kind of a bulk item.
///
/// This is a closed set: op types arriving from the wire outside it are a
/// hard error, never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Index the document, overwriting any existing version.
    Index,
    /// Create the document, failing if it already exists.
    Create,
    /// Delete the document.
    Delete,
}

impl OpType {
    /// Decode a wire op-type string.
    pub fn from_wire(s: &str) -> Result<Self, SearchError> {
        match s {
            "index" => Ok(Self::Index),
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            other => Err(SearchError::UnknownOpType(other.to_string())),
        }
    }

    /// Wire name of this op type.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

/// A single document write within a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOperation {
    /// Destination index.
    pub index: String,
    /// Destination mapping type.
    pub doc_type: String,
    /// Document id. `None` lets the backend assign one.
    pub id: Option<String>,
    /// Routing value.
    pub routing: Option<String>,
    /// Parent id.
    pub parent: Option<String>,
    /// Timestamp field.
    pub timestamp: Option<i64>,
    /// TTL field.
    pub ttl: Option<i64>,
    /// Expected version, when using optimistic concurrency.
    pub version: Option<i64>,
    /// Versioning semantics for `version`.
    pub version_type: VersionType,
    /// Whether this is an index (overwrite) or create (fail-if-exists).
    pub op_type: OpType,
    /// The document body.
    pub source: Value,
}

/// A single document delete within a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOperation {
    /// Index holding the document.
    pub index: String,
    /// Mapping type of the document.
    pub doc_type: String,
    /// Document id.
    pub id: String,
    /// Routing value.
    pub routing: Option<String>,
    /// Expected version, when using optimistic concurrency.
    pub version: Option<i64>,
}

/// One operation within a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// An index or create.
    Index(IndexOperation),
    /// A delete.
    Delete(DeleteOperation),
}

impl BulkOperation {
    /// Op type of this operation.
    pub fn op_type(&self) -> OpType {
        match self {
            Self::Index(op) => op.op_type,
            Self::Delete(_) => OpType::Delete,
        }
    }
}

/// One RPC mutating many documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkRequest {
    /// The operations to apply, in order.
    pub operations: Vec<BulkOperation>,
    /// How long to wait for shards to become available.
    pub timeout: Option<Duration>,
    /// Write-consistency level for the whole request.
    pub consistency: WriteConsistency,
    /// Context propagated from the request envelope.
    pub context: RequestContext,
}

impl BulkRequest {
    /// Whether this request carries no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Failure detail for one bulk item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Index the operation targeted.
    pub index: String,
    /// Mapping type the operation targeted.
    pub doc_type: String,
    /// Document id the operation targeted.
    pub id: String,
    /// HTTP-like status of the failure.
    pub status: u16,
    /// Human-readable reason.
    pub message: String,
}

/// Outcome of one bulk item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkItemOutcome {
    /// An index or create acknowledged by the backend. `created` is true when
    /// the document did not previously exist.
    Indexed {
        /// Whether the write created the document.
        created: bool,
    },
    /// A delete acknowledged by the backend.
    Deleted,
    /// The backend decided the operation required no change.
    Noop,
    /// An optimistic-concurrency failure.
    VersionConflict(ItemFailure),
    /// A transient rejection from the backend's bulk executor. Retryable.
    Rejected(ItemFailure),
    /// Any other per-item failure. Never retried.
    Failed(ItemFailure),
}

impl BulkItemOutcome {
    /// Whether this outcome is a failure of any kind.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict(_) | Self::Rejected(_) | Self::Failed(_)
        )
    }
}

/// One item of a bulk response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    /// Operation kind that was attempted.
    pub op_type: OpType,
    /// Index the operation targeted.
    pub index: String,
    /// Mapping type the operation targeted.
    pub doc_type: String,
    /// Document id the operation targeted.
    pub id: String,
    /// What happened.
    pub outcome: BulkItemOutcome,
}

/// Response to a bulk request: one item per operation, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Per-operation outcomes.
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// Whether any item failed.
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|item| item.outcome.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_type_wire_round_trip() {
        for op in [OpType::Index, OpType::Create, OpType::Delete] {
            assert_eq!(OpType::from_wire(op.as_wire()).unwrap(), op);
        }
    }

    #[test]
    fn test_op_type_unknown_is_an_error() {
        let err = OpType::from_wire("update").unwrap_err();
        assert!(matches!(err, SearchError::UnknownOpType(_)));
        assert!(err.to_string().contains("Unknown op type [update]"));
    }

    #[test]
    fn test_write_consistency_ids() {
        for level in [
            WriteConsistency::Default,
            WriteConsistency::One,
            WriteConsistency::Quorum,
            WriteConsistency::All,
        ] {
            assert_eq!(WriteConsistency::from_id(level.id()).unwrap(), level);
        }
        assert!(WriteConsistency::from_id(9).is_err());
    }

    #[test]
    fn test_search_request_validates_source_json() {
        let mut request = SearchRequest::new(vec!["docs".to_string()]);
        assert!(request.validate().is_empty());

        request.source = Some(b"{not json".to_vec());
        let errors = request.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("valid JSON"));
    }

    #[test]
    fn test_bulk_response_failure_detection() {
        let ok = BulkItem {
            op_type: OpType::Index,
            index: "docs".to_string(),
            doc_type: "doc".to_string(),
            id: "1".to_string(),
            outcome: BulkItemOutcome::Indexed { created: true },
        };
        let mut response = BulkResponse {
            items: vec![ok.clone()],
        };
        assert!(!response.has_failures());

        response.items.push(BulkItem {
            outcome: BulkItemOutcome::Failed(ItemFailure {
                index: "docs".to_string(),
                doc_type: "doc".to_string(),
                id: "2".to_string(),
                status: 500,
                message: "boom".to_string(),
            }),
            ..ok
        });
        assert!(response.has_failures());
    }
}
