//! Search client trait definition.
//!
//! This module defines the abstract interface the engine drives. A concrete
//! implementation translates these calls onto a live cluster; tests inject
//! mock implementations.

use async_trait::async_trait;

use crate::errors::SearchError;
use crate::types::{
    BulkRequest, BulkResponse, ClearScrollRequest, ClearScrollResponse, RefreshRequest,
    RefreshResponse, ScrollRequest, SearchRequest, SearchResponse,
};

/// Abstracts the search backend the engine runs against.
///
/// The engine treats this as an opaque async RPC surface: it never assumes
/// anything about transport, retries, or connection pooling beyond what the
/// error type expresses. Implementations must preserve the `RequestContext`
/// maps carried by every request.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Execute the initial search, opening a scroll cursor when the request
    /// asks for one.
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError>;

    /// Fetch the next batch from an open scroll cursor.
    async fn scroll(&self, request: ScrollRequest) -> Result<SearchResponse, SearchError>;

    /// Release scroll cursors.
    ///
    /// Callers may treat this as fire-and-forget; a failed release only leaks
    /// a server-side context until its keepalive lapses.
    async fn clear_scroll(
        &self,
        request: ClearScrollRequest,
    ) -> Result<ClearScrollResponse, SearchError>;

    /// Make recent writes to the named indices visible to search.
    async fn refresh(&self, request: RefreshRequest) -> Result<RefreshResponse, SearchError>;

    /// Apply a batch of document mutations.
    ///
    /// Per-item failures are reported in the response, not as an `Err`; an
    /// `Err` means the request as a whole could not be executed.
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse, SearchError>;
}
