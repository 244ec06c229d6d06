//! # Scroll Client
//!
//! This crate defines the contract between the bulk-by-scroll engine and the
//! search backend it drives. It includes the `SearchClient` trait, the
//! request/response value types exchanged over it, and the error type shared
//! by all backend operations.

pub mod errors;
pub mod interfaces;
pub mod types;

pub use errors::SearchError;
pub use interfaces::SearchClient;
pub use types::{
    BulkItem, BulkItemOutcome, BulkOperation, BulkRequest, BulkResponse, ClearScrollRequest,
    ClearScrollResponse, DeleteOperation, IndexOperation, ItemFailure, OpType, RefreshRequest,
    RefreshResponse, RequestContext, ScrollHit, ScrollRequest, SearchRequest, SearchResponse,
    ShardFailure, VersionType, WriteConsistency, STATUS_CONFLICT, STATUS_TOO_MANY_REQUESTS,
};
