//! # Scroll Engine
//!
//! The bulk-by-scroll engine: a cooperative state machine that streams a
//! potentially unbounded result set through a scroll cursor, turns each
//! batch into a bulk mutation, retries under rejection pressure, accounts
//! progress for external observation, supports mid-flight cancellation, and
//! releases the scroll cursor on every exit path.

pub mod backoff;
pub mod cancel;
pub mod driver;
pub mod errors;
pub mod progress;
pub mod request;
pub mod transform;
pub mod version;

pub use backoff::BackoffPolicy;
pub use cancel::CancellationHandle;
pub use driver::{BulkByScrollResponse, ScrollDriver};
pub use errors::EngineError;
pub use progress::{ProgressRecord, Status};
pub use request::{BulkByScrollRequest, ReindexDestination, ReindexRequest, UpdateByQueryRequest};
pub use transform::{
    DocumentScript, DocumentTransform, ReindexTransform, ScriptContext, ScriptOp,
    UpdateByQueryTransform,
};
pub use version::ClusterVersion;
