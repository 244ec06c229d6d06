//! Retry policy and the bulk retry executor.
//!
//! A [`BackoffPolicy`] is a restartable, finite sequence of delays. The
//! driver wraps it in a counting adapter that feeds the `retries` counter
//! (one increment per delay actually taken) and hands it to
//! [`execute_with_retry`], the only place in the engine that absorbs
//! backpressure.

use std::sync::Arc;
use std::time::Duration;

use scroll_client::{BulkItemOutcome, BulkRequest, BulkResponse, SearchClient, SearchError};
use tokio::time::sleep;
use tracing::debug;

use crate::progress::ProgressRecord;

/// A finite schedule of backoff delays.
///
/// The sequence is lazy and restartable: every call to [`iter`] starts over
/// from the first delay. The exponential schedule with the engine defaults
/// (500 ms initial, 11 retries) sums to 59,460 ms of backoff before the
/// final attempt.
///
/// [`iter`]: BackoffPolicy::iter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    limit: u32,
    kind: Kind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Exponential,
    Constant,
}

impl BackoffPolicy {
    /// Exponential backoff starting at `initial`, yielding exactly
    /// `max_retries` delays.
    pub fn exponential(initial: Duration, max_retries: u32) -> Self {
        Self {
            initial,
            limit: max_retries,
            kind: Kind::Exponential,
        }
    }

    /// The same `delay` repeated `max_retries` times.
    pub fn constant(delay: Duration, max_retries: u32) -> Self {
        Self {
            initial: delay,
            limit: max_retries,
            kind: Kind::Constant,
        }
    }

    /// Start the schedule from its first delay.
    pub fn iter(&self) -> BackoffIter {
        BackoffIter {
            policy: *self,
            consumed: 0,
        }
    }
}

/// One pass over a [`BackoffPolicy`]'s schedule.
#[derive(Debug, Clone)]
pub struct BackoffIter {
    policy: BackoffPolicy,
    consumed: u32,
}

impl Iterator for BackoffIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.consumed >= self.policy.limit {
            return None;
        }
        let delay = match self.policy.kind {
            Kind::Constant => self.policy.initial,
            Kind::Exponential => {
                // 10ms * (floor(e^(0.8 * n)) - 1) on top of the initial
                // delay. With the defaults this sums to 59,460 ms.
                let growth = (0.8f64 * f64::from(self.consumed)).exp() as u64 - 1;
                self.policy.initial + Duration::from_millis(10u64.saturating_mul(growth))
            }
        };
        self.consumed += 1;
        Some(delay)
    }
}

/// Adapter that counts each delay taken against the progress record.
///
/// Exhaustion yields nothing and counts nothing, so `retries` reflects the
/// delays actually slept through, not the attempts made.
pub(crate) struct CountingBackoff {
    delegate: BackoffIter,
    progress: Arc<ProgressRecord>,
}

impl CountingBackoff {
    pub(crate) fn new(delegate: BackoffIter, progress: Arc<ProgressRecord>) -> Self {
        Self { delegate, progress }
    }
}

impl Iterator for CountingBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.delegate.next()?;
        self.progress.count_retry();
        Some(delay)
    }
}

/// Whether a bulk response should be re-issued: at least one item was
/// rejected and every failure in it is a rejection. Mixed failures are
/// reported, not retried.
fn retryable(response: &BulkResponse) -> bool {
    let mut any_rejection = false;
    for item in &response.items {
        match &item.outcome {
            BulkItemOutcome::Rejected(_) => any_rejection = true,
            BulkItemOutcome::VersionConflict(_) | BulkItemOutcome::Failed(_) => return false,
            _ => {}
        }
    }
    any_rejection
}

/// Issue a bulk request, retrying under rejection pressure.
///
/// Rejections, whether surfaced as a [`SearchError::Rejected`] or as
/// per-item rejected outcomes, pull the next delay from `delays`, sleep,
/// and re-issue. When the schedule is exhausted, an error passes through
/// unchanged and a response is returned as-is so its rejected items surface
/// as indexing failures. Any other error returns immediately.
pub(crate) async fn execute_with_retry(
    client: &dyn SearchClient,
    request: &BulkRequest,
    mut delays: impl Iterator<Item = Duration>,
) -> Result<BulkResponse, SearchError> {
    loop {
        match client.bulk(request.clone()).await {
            Ok(response) => {
                if !retryable(&response) {
                    return Ok(response);
                }
                match delays.next() {
                    Some(delay) => {
                        debug!(delay_ms = delay.as_millis() as u64, "bulk rejected, backing off");
                        sleep(delay).await;
                    }
                    None => return Ok(response),
                }
            }
            Err(SearchError::Rejected(reason)) => match delays.next() {
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "bulk rejected, backing off");
                    sleep(delay).await;
                }
                None => return Err(SearchError::Rejected(reason)),
            },
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationHandle;
    use async_trait::async_trait;
    use scroll_client::{
        BulkItem, ClearScrollRequest, ClearScrollResponse, ItemFailure, OpType, RefreshRequest,
        RefreshResponse, ScrollRequest, SearchRequest, SearchResponse, STATUS_TOO_MANY_REQUESTS,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_exponential_policy_has_exactly_max_retries_delays() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(500), 11);
        assert_eq!(policy.iter().count(), 11);
    }

    /// The documented default: 11 retries at 500 ms initial back off for a
    /// total of 59,460 ms before the final attempt.
    #[test]
    fn test_default_policy_total_backoff() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(500), 11);
        let total: Duration = policy.iter().sum();
        assert_eq!(total, Duration::from_millis(59_460));
    }

    #[test]
    fn test_policy_is_restartable() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(500), 3);
        let first: Vec<_> = policy.iter().collect();
        let second: Vec<_> = policy.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_constant_policy() {
        let policy = BackoffPolicy::constant(Duration::from_millis(5), 4);
        let delays: Vec<_> = policy.iter().collect();
        assert_eq!(delays, vec![Duration::from_millis(5); 4]);
    }

    #[test]
    fn test_counting_backoff_counts_delays_taken_only() {
        let progress = Arc::new(ProgressRecord::new(CancellationHandle::new()));
        let policy = BackoffPolicy::constant(Duration::ZERO, 2);
        let mut counting = CountingBackoff::new(policy.iter(), Arc::clone(&progress));

        assert!(counting.next().is_some());
        assert_eq!(progress.snapshot().retries(), 1);
        assert!(counting.next().is_some());
        assert_eq!(progress.snapshot().retries(), 2);
        // Exhaustion yields nothing and counts nothing.
        assert!(counting.next().is_none());
        assert_eq!(progress.snapshot().retries(), 2);
    }

    /// Client that rejects the first `reject_first` bulks, then succeeds.
    struct RejectingClient {
        reject_first: usize,
        attempts: AtomicUsize,
    }

    impl RejectingClient {
        fn new(reject_first: usize) -> Self {
            Self {
                reject_first,
                attempts: AtomicUsize::new(0),
            }
        }

        fn rejected_item() -> BulkItem {
            BulkItem {
                op_type: OpType::Index,
                index: "docs".to_string(),
                doc_type: "doc".to_string(),
                id: "1".to_string(),
                outcome: BulkItemOutcome::Rejected(ItemFailure {
                    index: "docs".to_string(),
                    doc_type: "doc".to_string(),
                    id: "1".to_string(),
                    status: STATUS_TOO_MANY_REQUESTS,
                    message: "queue full".to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl SearchClient for RejectingClient {
        async fn search(&self, _: SearchRequest) -> Result<SearchResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn scroll(&self, _: ScrollRequest) -> Result<SearchResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn clear_scroll(
            &self,
            _: ClearScrollRequest,
        ) -> Result<ClearScrollResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn refresh(&self, _: RefreshRequest) -> Result<RefreshResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn bulk(&self, _: BulkRequest) -> Result<BulkResponse, SearchError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.reject_first {
                Ok(BulkResponse {
                    items: vec![Self::rejected_item()],
                })
            } else {
                Ok(BulkResponse {
                    items: vec![BulkItem {
                        op_type: OpType::Index,
                        index: "docs".to_string(),
                        doc_type: "doc".to_string(),
                        id: "1".to_string(),
                        outcome: BulkItemOutcome::Indexed { created: true },
                    }],
                })
            }
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let progress = Arc::new(ProgressRecord::new(CancellationHandle::new()));
        let client = RejectingClient::new(2);
        let policy = BackoffPolicy::constant(Duration::ZERO, 3);
        let delays = CountingBackoff::new(policy.iter(), Arc::clone(&progress));

        let response = execute_with_retry(&client, &BulkRequest::default(), delays)
            .await
            .unwrap();

        assert!(!response.has_failures());
        assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(progress.snapshot().retries(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_policy_returns_last_rejected_response() {
        let progress = Arc::new(ProgressRecord::new(CancellationHandle::new()));
        let client = RejectingClient::new(usize::MAX);
        let policy = BackoffPolicy::constant(Duration::ZERO, 2);
        let delays = CountingBackoff::new(policy.iter(), Arc::clone(&progress));

        let response = execute_with_retry(&client, &BulkRequest::default(), delays)
            .await
            .unwrap();

        assert!(response.has_failures());
        assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(progress.snapshot().retries(), 2);
    }

    /// Client whose bulk always fails with a non-rejection error.
    struct BrokenClient;

    #[async_trait]
    impl SearchClient for BrokenClient {
        async fn search(&self, _: SearchRequest) -> Result<SearchResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn scroll(&self, _: ScrollRequest) -> Result<SearchResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn clear_scroll(
            &self,
            _: ClearScrollRequest,
        ) -> Result<ClearScrollResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn refresh(&self, _: RefreshRequest) -> Result<RefreshResponse, SearchError> {
            unimplemented!("not used by the retry executor")
        }

        async fn bulk(&self, _: BulkRequest) -> Result<BulkResponse, SearchError> {
            Err(SearchError::connection("wire down"))
        }
    }

    #[tokio::test]
    async fn test_non_rejection_error_passes_through_unchanged() {
        let policy = BackoffPolicy::constant(Duration::ZERO, 5);
        let result = execute_with_retry(&BrokenClient, &BulkRequest::default(), policy.iter()).await;
        assert!(matches!(result, Err(SearchError::ConnectionError(_))));
    }
}
