//! The scroll driver: the engine's control loop.
//!
//! One driver owns one request, one scroll cursor, one in-flight bulk at a
//! time, and one progress record. The loop is a state machine advanced by
//! one handler per event: `Initial → Scrolling → Bulking → Scrolling → … →
//! Terminating → Done`. Batches are strictly sequential: the next scroll
//! is not issued until the current bulk has fully acknowledged, so memory
//! stays bounded to one batch and backpressure is absorbed entirely by the
//! bulk retry executor.
//!
//! Whatever the exit path (success, failure, cancellation), the driver
//! fires a clear-scroll for any cursor it ever held before handing back its
//! terminal result.

use std::cmp::min;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scroll_client::{
    BulkItemOutcome, BulkRequest, BulkResponse, ClearScrollRequest, ItemFailure, OpType,
    RefreshRequest, ScrollRequest, SearchClient, SearchResponse, ShardFailure,
    STATUS_TOO_MANY_REQUESTS,
};
use tracing::{debug, warn};

use crate::backoff::{execute_with_retry, CountingBackoff};
use crate::cancel::CancellationHandle;
use crate::errors::EngineError;
use crate::progress::{ProgressRecord, Status};
use crate::request::{BulkByScrollRequest, DEFAULT_SCROLL_KEEPALIVE, SIZE_ALL_MATCHES};
use crate::transform::DocumentTransform;
use crate::version::ClusterVersion;

/// Terminal result of a bulk-by-scroll request.
#[derive(Debug, Clone)]
pub struct BulkByScrollResponse {
    /// Wall-clock time from `run` to termination.
    pub took: Duration,
    /// Final progress snapshot.
    pub status: Status,
    /// Per-item bulk failures accumulated before termination.
    pub indexing_failures: Vec<ItemFailure>,
    /// Shard-level search failures accumulated before termination.
    pub search_failures: Vec<ShardFailure>,
    /// Whether any sub-request timed out.
    pub timed_out: bool,
}

impl BulkByScrollResponse {
    /// The cancellation reason, when the request was cancelled mid-flight.
    pub fn reason_cancelled(&self) -> Option<&str> {
        self.status.reason_cancelled()
    }
}

enum State {
    Initial,
    Scrolling(Box<SearchResponse>),
    Bulking(Box<BulkRequest>),
    Terminating(Box<Termination>),
}

#[derive(Default)]
struct Termination {
    error: Option<EngineError>,
    indexing_failures: Vec<ItemFailure>,
    search_failures: Vec<ShardFailure>,
    timed_out: bool,
}

impl Termination {
    fn normal() -> Self {
        Self::default()
    }

    fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    fn fatal(error: EngineError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// What the batch handler decided to do with a scroll response.
enum BatchOutcome {
    /// The batch was empty: the cursor is drained.
    Finished,
    /// Every hit was a noop: skip the bulk, advance the scroll.
    SkipBulk,
    /// Dispatch this bulk.
    Bulk(BulkRequest),
}

/// Drives one bulk-by-scroll request to completion.
///
/// Construction validates the request, applies the default search source,
/// and refuses to run against clusters older than
/// [`ClusterVersion::V2_3_0`]. [`run`] consumes the driver and resolves to
/// exactly one terminal outcome: a [`BulkByScrollResponse`] or an error,
/// never both.
///
/// Cancellation is cooperative: the [`CancellationHandle`] shared with the
/// progress record is consulted at every state transition, never mid-RPC.
///
/// [`run`]: ScrollDriver::run
pub struct ScrollDriver {
    request: BulkByScrollRequest,
    client: Arc<dyn SearchClient>,
    transform: Arc<dyn DocumentTransform>,
    progress: Arc<ProgressRecord>,
    cancellation: CancellationHandle,
    started_at: Instant,
    scroll_id: Option<String>,
    destination_indices: BTreeSet<String>,
}

impl std::fmt::Debug for ScrollDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrollDriver")
            .field("request", &self.request)
            .field("started_at", &self.started_at)
            .field("scroll_id", &self.scroll_id)
            .field("destination_indices", &self.destination_indices)
            .finish_non_exhaustive()
    }
}

impl ScrollDriver {
    /// Create a driver for `request`.
    ///
    /// Fails synchronously, before any I/O, when the request is invalid or
    /// the cluster has nodes older than 2.3.0.
    pub fn new(
        mut request: BulkByScrollRequest,
        client: Arc<dyn SearchClient>,
        transform: Arc<dyn DocumentTransform>,
        progress: Arc<ProgressRecord>,
        smallest_cluster_version: ClusterVersion,
    ) -> Result<Self, EngineError> {
        if smallest_cluster_version < ClusterVersion::V2_3_0 {
            return Err(EngineError::ClusterNotUpgraded {
                request: request.to_string(),
            });
        }
        request.validate()?;
        request.apply_defaults()?;
        let cancellation = progress.cancellation();
        Ok(Self {
            request,
            client,
            transform,
            progress,
            cancellation,
            started_at: Instant::now(),
            scroll_id: None,
            destination_indices: BTreeSet::new(),
        })
    }

    /// The progress record status readers can snapshot mid-flight.
    pub fn progress(&self) -> Arc<ProgressRecord> {
        Arc::clone(&self.progress)
    }

    /// The handle used to cancel this request.
    pub fn cancellation(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Run the request to its terminal outcome.
    pub async fn run(mut self) -> Result<BulkByScrollResponse, EngineError> {
        self.started_at = Instant::now();
        let mut state = State::Initial;
        loop {
            state = match state {
                State::Initial => self.start().await,
                State::Scrolling(response) => self.on_search_response(*response).await,
                State::Bulking(bulk) => self.send_bulk(*bulk).await,
                State::Terminating(termination) => return self.finish(*termination).await,
            };
        }
    }

    /// Cancellation and timeout are observed here, at every transition.
    fn check_interrupts(&self) -> Option<State> {
        if self.cancellation.is_cancelled() {
            debug!(reason = ?self.cancellation.reason(), "request cancelled, terminating");
            return Some(State::Terminating(Box::new(Termination::normal())));
        }
        if self.cancellation.is_timed_out() {
            debug!("request timed out, terminating");
            return Some(State::Terminating(Box::new(Termination::timed_out())));
        }
        None
    }

    async fn start(&mut self) -> State {
        if let Some(interrupted) = self.check_interrupts() {
            return interrupted;
        }
        debug!(
            indices = ?self.request.search.indices,
            doc_types = ?self.request.search.doc_types,
            "executing initial scroll"
        );
        let mut search = self.request.search.clone();
        search.context = self.request.context.clone();
        match self.client.search(search).await {
            Ok(response) => {
                debug!(total_hits = response.total_hits, "documents match query");
                State::Scrolling(Box::new(response))
            }
            Err(error) => State::Terminating(Box::new(Termination::fatal(error.into()))),
        }
    }

    async fn on_search_response(&mut self, response: SearchResponse) -> State {
        if let Some(interrupted) = self.check_interrupts() {
            return interrupted;
        }
        if response.scroll_id.is_some() {
            self.scroll_id = response.scroll_id.clone();
        }
        if !response.shard_failures.is_empty() || response.timed_out {
            return State::Terminating(Box::new(Termination {
                search_failures: response.shard_failures,
                timed_out: response.timed_out,
                ..Termination::default()
            }));
        }
        let mut total = response.total_hits;
        if self.request.size > 0 {
            total = min(total, self.request.size as u64);
        }
        self.progress.set_total(total);

        // The batch handler runs on the worker pool so a heavy transform
        // cannot starve the network reply path.
        let transform = Arc::clone(&self.transform);
        let progress = Arc::clone(&self.progress);
        let size = self.request.size;
        let hits = response.hits;
        let scroll_id = response.scroll_id;
        let batch = tokio::task::spawn_blocking(move || -> Result<BatchOutcome, EngineError> {
            debug!(hits = hits.len(), scroll_id = ?scroll_id, "scroll returned documents");
            if hits.is_empty() {
                return Ok(BatchOutcome::Finished);
            }
            progress.count_batch();
            let mut hits = hits;
            if size != SIZE_ALL_MATCHES {
                let remaining = (size - progress.successfully_processed() as i64).max(0) as usize;
                if remaining < hits.len() {
                    hits.truncate(remaining);
                }
            }
            let bulk = transform.build_bulk(hits)?;
            Ok(if bulk.is_empty() {
                BatchOutcome::SkipBulk
            } else {
                BatchOutcome::Bulk(bulk)
            })
        });
        match batch.await {
            Err(rejected) => State::Terminating(Box::new(Termination::fatal(
                EngineError::BatchRejected(rejected.to_string()),
            ))),
            Ok(Err(error)) => State::Terminating(Box::new(Termination::fatal(error))),
            Ok(Ok(BatchOutcome::Finished)) => State::Terminating(Box::new(Termination::normal())),
            Ok(Ok(BatchOutcome::SkipBulk)) => self.start_next_scroll().await,
            Ok(Ok(BatchOutcome::Bulk(mut bulk))) => {
                bulk.timeout = Some(self.request.timeout);
                bulk.consistency = self.request.consistency;
                bulk.context = self.request.context.clone();
                debug!(operations = bulk.operations.len(), "sending bulk request");
                State::Bulking(Box::new(bulk))
            }
        }
    }

    async fn send_bulk(&mut self, bulk: BulkRequest) -> State {
        if let Some(interrupted) = self.check_interrupts() {
            return interrupted;
        }
        let delays = CountingBackoff::new(
            self.request.backoff_policy().iter(),
            Arc::clone(&self.progress),
        );
        match execute_with_retry(self.client.as_ref(), &bulk, delays).await {
            Ok(response) => self.on_bulk_response(response).await,
            Err(error) => State::Terminating(Box::new(Termination::fatal(error.into()))),
        }
    }

    async fn on_bulk_response(&mut self, response: BulkResponse) -> State {
        if let Some(interrupted) = self.check_interrupts() {
            return interrupted;
        }
        let mut failures = Vec::new();
        let mut batch_indices = BTreeSet::new();
        for item in response.items {
            match item.outcome {
                BulkItemOutcome::Indexed { created } => {
                    match item.op_type {
                        OpType::Index | OpType::Create => {
                            if created {
                                self.progress.count_created();
                            } else {
                                self.progress.count_updated();
                            }
                        }
                        OpType::Delete => {
                            return State::Terminating(Box::new(Termination::fatal(
                                EngineError::BulkItemMismatch {
                                    op_type: item.op_type.as_wire(),
                                },
                            )));
                        }
                    }
                    batch_indices.insert(item.index);
                }
                BulkItemOutcome::Deleted => {
                    if item.op_type != OpType::Delete {
                        return State::Terminating(Box::new(Termination::fatal(
                            EngineError::BulkItemMismatch {
                                op_type: item.op_type.as_wire(),
                            },
                        )));
                    }
                    self.progress.count_deleted();
                    batch_indices.insert(item.index);
                }
                BulkItemOutcome::Noop => self.progress.count_noop(),
                BulkItemOutcome::VersionConflict(failure) => {
                    self.progress.count_version_conflict();
                    if self.request.abort_on_version_conflict {
                        failures.push(failure);
                    }
                }
                BulkItemOutcome::Rejected(mut failure) => {
                    failure.status = STATUS_TOO_MANY_REQUESTS;
                    failures.push(failure);
                }
                BulkItemOutcome::Failed(failure) => failures.push(failure),
            }
        }
        self.destination_indices.extend(batch_indices);

        if !failures.is_empty() {
            return State::Terminating(Box::new(Termination {
                indexing_failures: failures,
                ..Termination::default()
            }));
        }
        if self.request.size != SIZE_ALL_MATCHES
            && self.progress.successfully_processed() as i64 >= self.request.size
        {
            return State::Terminating(Box::new(Termination::normal()));
        }
        self.start_next_scroll().await
    }

    async fn start_next_scroll(&mut self) -> State {
        if let Some(interrupted) = self.check_interrupts() {
            return interrupted;
        }
        let Some(scroll_id) = self.scroll_id.clone() else {
            return State::Terminating(Box::new(Termination::fatal(EngineError::internal(
                "no scroll id to continue from",
            ))));
        };
        let request = ScrollRequest {
            scroll_id,
            keepalive: self
                .request
                .search
                .scroll_keepalive
                .unwrap_or(DEFAULT_SCROLL_KEEPALIVE),
            context: self.request.context.clone(),
        };
        match self.client.scroll(request).await {
            Ok(response) => State::Scrolling(Box::new(response)),
            Err(error) => State::Terminating(Box::new(Termination::fatal(error.into()))),
        }
    }

    async fn finish(
        mut self,
        mut termination: Termination,
    ) -> Result<BulkByScrollResponse, EngineError> {
        if termination.error.is_none()
            && !self.cancellation.is_cancelled()
            && self.request.refresh
            && !self.destination_indices.is_empty()
        {
            let refresh = RefreshRequest {
                indices: self.destination_indices.iter().cloned().collect(),
                context: self.request.context.clone(),
            };
            match self.client.refresh(refresh).await {
                Ok(response) => debug!(
                    successful_shards = response.successful_shards,
                    "refreshed destination indices"
                ),
                Err(error) => termination.error = Some(error.into()),
            }
        }
        self.clear_scroll();
        match termination.error {
            None => Ok(BulkByScrollResponse {
                took: self.started_at.elapsed(),
                status: self.progress.snapshot(),
                indexing_failures: termination.indexing_failures,
                search_failures: termination.search_failures,
                timed_out: termination.timed_out,
            }),
            Some(error) => Err(error),
        }
    }

    /// Fire-and-forget release of the scroll cursor, if one was ever held.
    /// The terminal result does not wait on it.
    fn clear_scroll(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };
        let client = Arc::clone(&self.client);
        let request = ClearScrollRequest {
            scroll_ids: vec![scroll_id.clone()],
            context: self.request.context.clone(),
        };
        tokio::spawn(async move {
            match client.clear_scroll(request).await {
                Ok(response) => debug!(freed = response.num_freed, "freed scroll contexts"),
                Err(error) => {
                    warn!(scroll_id = %scroll_id, error = %error, "failed to clear scroll");
                }
            }
        });
    }
}
