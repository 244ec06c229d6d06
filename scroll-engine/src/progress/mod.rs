//! Progress accounting for a running bulk-by-scroll request.
//!
//! The driver increments atomic counters at every state transition; external
//! status readers take immutable snapshots concurrently. Snapshot reads
//! tolerate field-level tearing; per-field monotonicity is the only
//! guarantee offered externally.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::cancel::CancellationHandle;
use crate::errors::EngineError;

/// Sentinel for "total not learned yet".
const TOTAL_UNSET: i64 = -1;

/// Live counters for one bulk-by-scroll request.
///
/// Counting never blocks the driver. The record shares the request's
/// [`CancellationHandle`] so snapshots can carry the cancellation reason.
#[derive(Debug)]
pub struct ProgressRecord {
    total: AtomicI64,
    updated: AtomicU64,
    created: AtomicU64,
    deleted: AtomicU64,
    noops: AtomicU64,
    batches: AtomicU64,
    version_conflicts: AtomicU64,
    retries: AtomicU64,
    cancellation: CancellationHandle,
}

impl ProgressRecord {
    /// Create a record tied to the given cancellation handle.
    pub fn new(cancellation: CancellationHandle) -> Self {
        Self {
            total: AtomicI64::new(TOTAL_UNSET),
            updated: AtomicU64::new(0),
            created: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            noops: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            version_conflicts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            cancellation,
        }
    }

    /// The cancellation handle shared with this record.
    pub fn cancellation(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Record the total number of documents this request will process.
    ///
    /// Set-once: the first scroll response wins and later calls are no-ops,
    /// so the total stays stable while batches drain the cursor.
    pub fn set_total(&self, total: u64) {
        let _ = self.total.compare_exchange(
            TOTAL_UNSET,
            total as i64,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Count a document created.
    pub fn count_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a document updated.
    pub fn count_updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a document deleted.
    pub fn count_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a hit the transform decided needed no mutation.
    pub fn count_noop(&self) {
        self.noops.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a scroll response processed as a batch.
    pub fn count_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a version conflict.
    pub fn count_version_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a backoff delay taken before re-issuing a rejected bulk.
    pub fn count_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of successfully processed documents.
    pub fn successfully_processed(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
            + self.created.load(Ordering::Relaxed)
            + self.deleted.load(Ordering::Relaxed)
    }

    /// Take an immutable snapshot of the current counters.
    ///
    /// Safe to call concurrently with counting; the snapshot is consistent
    /// per field, not across fields.
    pub fn snapshot(&self) -> Status {
        Status {
            total: self.total.load(Ordering::Acquire).max(0),
            updated: self.updated.load(Ordering::Relaxed) as i64,
            created: self.created.load(Ordering::Relaxed) as i64,
            deleted: self.deleted.load(Ordering::Relaxed) as i64,
            batches: self.batches.load(Ordering::Relaxed) as i64,
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed) as i64,
            noops: self.noops.load(Ordering::Relaxed) as i64,
            retries: self.retries.load(Ordering::Relaxed) as i64,
            reason_cancelled: self.cancellation.reason(),
        }
    }
}

/// Immutable snapshot of a request's progress.
///
/// This is the value the status endpoint encodes. A total of 0 means either
/// "not learned yet" or "nothing to do"; requests with nothing to do are
/// short-lived enough that the ambiguity does not matter in practice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    total: i64,
    updated: i64,
    created: i64,
    deleted: i64,
    batches: i64,
    version_conflicts: i64,
    noops: i64,
    retries: i64,
    reason_cancelled: Option<String>,
}

/// JSON shape accepted when decoding a status snapshot. Views may omit
/// `created` or `deleted`; missing counters decode as zero.
#[derive(Deserialize)]
struct RawStatus {
    #[serde(default)]
    total: i64,
    #[serde(default)]
    updated: i64,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    deleted: i64,
    #[serde(default)]
    batches: i64,
    #[serde(default)]
    version_conflicts: i64,
    #[serde(default)]
    noops: i64,
    #[serde(default)]
    retries: i64,
    #[serde(default)]
    canceled: Option<String>,
}

impl Status {
    /// Construct a snapshot, validating every counter.
    ///
    /// This is the on-wire validation path: any negative field fails with an
    /// error naming it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        total: i64,
        updated: i64,
        created: i64,
        deleted: i64,
        batches: i64,
        version_conflicts: i64,
        noops: i64,
        retries: i64,
        reason_cancelled: Option<String>,
    ) -> Result<Self, EngineError> {
        check_non_negative("total", total)?;
        check_non_negative("updated", updated)?;
        check_non_negative("created", created)?;
        check_non_negative("deleted", deleted)?;
        check_non_negative("batches", batches)?;
        check_non_negative("version_conflicts", version_conflicts)?;
        check_non_negative("noops", noops)?;
        check_non_negative("retries", retries)?;
        Ok(Self {
            total,
            updated,
            created,
            deleted,
            batches,
            version_conflicts,
            noops,
            retries,
            reason_cancelled,
        })
    }

    /// Total number of documents this request will process.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// Count of documents updated.
    pub fn updated(&self) -> i64 {
        self.updated
    }

    /// Count of documents created.
    pub fn created(&self) -> i64 {
        self.created
    }

    /// Count of documents deleted.
    pub fn deleted(&self) -> i64 {
        self.deleted
    }

    /// Number of scroll responses processed.
    pub fn batches(&self) -> i64 {
        self.batches
    }

    /// Number of version conflicts hit.
    pub fn version_conflicts(&self) -> i64 {
        self.version_conflicts
    }

    /// Number of hits skipped as noops.
    pub fn noops(&self) -> i64 {
        self.noops
    }

    /// Number of backoff delays taken due to rejected bulks.
    pub fn retries(&self) -> i64 {
        self.retries
    }

    /// The cancellation reason, when the request was cancelled.
    pub fn reason_cancelled(&self) -> Option<&str> {
        self.reason_cancelled.as_deref()
    }

    /// `created + updated + deleted`.
    pub fn successfully_processed(&self) -> i64 {
        self.created + self.updated + self.deleted
    }

    /// Encode the full snapshot as JSON.
    ///
    /// Field order is fixed for wire compatibility: `total, updated,
    /// created, deleted, batches, version_conflicts, noops, retries,
    /// canceled?`.
    pub fn to_json(&self) -> Result<String, EngineError> {
        self.to_json_view(true, true)
    }

    /// Encode a variant-specific view of the snapshot as JSON.
    ///
    /// A delete-only variant omits `created`; an update-only variant omits
    /// `deleted`.
    pub fn to_json_view(
        &self,
        include_created: bool,
        include_deleted: bool,
    ) -> Result<String, EngineError> {
        let view = StatusView {
            status: self,
            include_created,
            include_deleted,
        };
        serde_json::to_string(&view).map_err(|e| EngineError::serialization(e.to_string()))
    }

    /// Decode a snapshot from its JSON encoding, validating every counter.
    pub fn from_json(encoded: &str) -> Result<Self, EngineError> {
        let raw: RawStatus = serde_json::from_str(encoded)
            .map_err(|e| EngineError::serialization(e.to_string()))?;
        Self::new(
            raw.total,
            raw.updated,
            raw.created,
            raw.deleted,
            raw.batches,
            raw.version_conflicts,
            raw.noops,
            raw.retries,
            raw.canceled,
        )
    }
}

fn check_non_negative(name: &'static str, value: i64) -> Result<(), EngineError> {
    if value < 0 {
        return Err(EngineError::NegativeCounter { name, value });
    }
    Ok(())
}

struct StatusView<'a> {
    status: &'a Status,
    include_created: bool,
    include_deleted: bool,
}

impl Serialize for StatusView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("total", &self.status.total)?;
        map.serialize_entry("updated", &self.status.updated)?;
        if self.include_created {
            map.serialize_entry("created", &self.status.created)?;
        }
        if self.include_deleted {
            map.serialize_entry("deleted", &self.status.deleted)?;
        }
        map.serialize_entry("batches", &self.status.batches)?;
        map.serialize_entry("version_conflicts", &self.status.version_conflicts)?;
        map.serialize_entry("noops", &self.status.noops)?;
        map.serialize_entry("retries", &self.status.retries)?;
        if let Some(reason) = &self.status.reason_cancelled {
            map.serialize_entry("canceled", reason)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProgressRecord {
        ProgressRecord::new(CancellationHandle::new())
    }

    #[test]
    fn test_counters_accumulate() {
        let record = record();
        record.count_created();
        record.count_created();
        record.count_updated();
        record.count_deleted();
        record.count_noop();
        record.count_batch();
        record.count_version_conflict();
        record.count_retry();

        let status = record.snapshot();
        assert_eq!(status.created(), 2);
        assert_eq!(status.updated(), 1);
        assert_eq!(status.deleted(), 1);
        assert_eq!(status.noops(), 1);
        assert_eq!(status.batches(), 1);
        assert_eq!(status.version_conflicts(), 1);
        assert_eq!(status.retries(), 1);
        assert_eq!(status.successfully_processed(), 4);
        assert_eq!(record.successfully_processed(), 4);
    }

    #[test]
    fn test_total_defaults_to_zero_until_learned() {
        let record = record();
        assert_eq!(record.snapshot().total(), 0);
    }

    #[test]
    fn test_set_total_is_set_once() {
        let record = record();
        record.set_total(120);
        record.set_total(7);
        assert_eq!(record.snapshot().total(), 120);
    }

    #[test]
    fn test_snapshot_carries_cancellation_reason() {
        let record = record();
        assert_eq!(record.snapshot().reason_cancelled(), None);
        record.cancellation().cancel("node drained");
        assert_eq!(record.snapshot().reason_cancelled(), Some("node drained"));
    }

    #[test]
    fn test_negative_counter_rejected_with_field_name() {
        let err = Status::new(-1, 0, 0, 0, 0, 0, 0, 0, None).unwrap_err();
        assert_eq!(err.to_string(), "total must be greater than 0 but was [-1]");

        let err = Status::new(0, 0, 0, 0, 0, -3, 0, 0, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "version_conflicts must be greater than 0 but was [-3]"
        );

        let err = Status::new(0, 0, 0, 0, 0, 0, 0, -7, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "retries must be greater than 0 but was [-7]"
        );
    }

    #[test]
    fn test_json_field_order_is_fixed() {
        let status = Status::new(10, 1, 2, 3, 4, 5, 6, 7, None).unwrap();
        assert_eq!(
            status.to_json().unwrap(),
            "{\"total\":10,\"updated\":1,\"created\":2,\"deleted\":3,\"batches\":4,\
             \"version_conflicts\":5,\"noops\":6,\"retries\":7}"
        );
    }

    #[test]
    fn test_json_includes_canceled_when_cancelled() {
        let status = Status::new(0, 0, 0, 0, 0, 0, 0, 0, Some("why".to_string())).unwrap();
        assert!(status.to_json().unwrap().ends_with("\"canceled\":\"why\"}"));
    }

    #[test]
    fn test_delete_only_view_omits_created() {
        let status = Status::new(10, 1, 2, 3, 4, 5, 6, 7, None).unwrap();
        let json = status.to_json_view(false, true).unwrap();
        assert!(!json.contains("\"created\""));
        assert!(json.contains("\"deleted\":3"));
    }

    #[test]
    fn test_update_only_view_omits_deleted() {
        let status = Status::new(10, 1, 2, 3, 4, 5, 6, 7, None).unwrap();
        let json = status.to_json_view(true, false).unwrap();
        assert!(json.contains("\"created\":2"));
        assert!(!json.contains("\"deleted\""));
    }

    #[test]
    fn test_json_round_trip_is_field_equal() {
        let status = Status::new(10, 1, 2, 3, 4, 5, 6, 7, Some("stop".to_string())).unwrap();
        let decoded = Status::from_json(&status.to_json().unwrap()).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn test_decoding_negative_counter_fails() {
        let err = Status::from_json("{\"total\":-2}").unwrap_err();
        assert_eq!(err.to_string(), "total must be greater than 0 but was [-2]");
    }
}
