//! The bulk-by-scroll request envelope.
//!
//! The envelope carries everything the driver needs: the search that selects
//! documents, the processing limit, conflict and refresh behavior, the
//! per-bulk timeout and consistency level, and the retry schedule. It
//! validates itself before any I/O and has a binary wire form for transport
//! between nodes.

mod wire;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use scroll_client::{OpType, RequestContext, SearchRequest, VersionType, WriteConsistency};
use serde_json::Value;

use crate::backoff::BackoffPolicy;
use crate::errors::EngineError;
use wire::{
    get_bool, get_bytes, get_duration, get_string, get_uvarint, get_varint, put_bool, put_bytes,
    put_duration, put_string, put_uvarint, put_varint,
};

/// `size` value meaning "process all matching documents".
pub const SIZE_ALL_MATCHES: i64 = -1;

pub(crate) const DEFAULT_SCROLL_KEEPALIVE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SCROLL_SIZE: u64 = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RETRIES: i64 = 11;

/// The default search source: page in batches of 100, sorted by insertion
/// order, requesting versions. User-supplied source merges over this.
fn default_source() -> Value {
    serde_json::json!({
        "size": DEFAULT_SCROLL_SIZE,
        "sort": [{"_doc": {"order": "asc"}}],
        "version": true,
    })
}

/// Deep-merge `overlay` into `base`; overlay values win on conflict.
fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Envelope for a query-driven bulk mutation.
///
/// Construct with [`new`], adjust fields, then hand to a driver. The driver
/// calls [`apply_defaults`] before the first search, which merges the
/// default search source under any user-supplied one.
///
/// [`new`]: BulkByScrollRequest::new
/// [`apply_defaults`]: BulkByScrollRequest::apply_defaults
#[derive(Debug, Clone, PartialEq)]
pub struct BulkByScrollRequest {
    /// The search that selects documents to process.
    pub search: SearchRequest,
    /// Maximum number of documents to process; [`SIZE_ALL_MATCHES`] means
    /// all of them.
    pub size: i64,
    /// Whether version conflicts abort the request. Defaults to true.
    pub abort_on_version_conflict: bool,
    /// Whether to refresh written indices when the request ends.
    pub refresh: bool,
    /// How long each bulk waits for shards to become available.
    pub timeout: Duration,
    /// Write-consistency level for each bulk.
    pub consistency: WriteConsistency,
    /// Initial delay after a rejection before retrying a bulk. With the
    /// default `max_retries` the total backoff is just under one minute.
    pub retry_backoff_initial: Duration,
    /// Number of rejection retries before giving up. There is no way to ask
    /// for unlimited retries.
    pub max_retries: i64,
    /// Context and headers propagated onto every sub-request.
    pub context: RequestContext,
}

impl BulkByScrollRequest {
    /// Wrap a search in a request envelope with default behavior.
    ///
    /// The scroll keepalive is applied to the search here, at construction
    /// time, so the first dispatch already opens a cursor.
    pub fn new(mut search: SearchRequest) -> Self {
        search.scroll_keepalive = Some(DEFAULT_SCROLL_KEEPALIVE);
        Self {
            search,
            size: SIZE_ALL_MATCHES,
            abort_on_version_conflict: true,
            refresh: false,
            timeout: DEFAULT_TIMEOUT,
            consistency: WriteConsistency::Default,
            retry_backoff_initial: DEFAULT_RETRY_BACKOFF_INITIAL,
            max_retries: DEFAULT_MAX_RETRIES,
            context: RequestContext::default(),
        }
    }

    /// Set `abort_on_version_conflict` from its REST-friendly name.
    ///
    /// Accepts exactly `"proceed"` (false) and `"abort"` (true).
    pub fn set_conflicts(&mut self, conflicts: &str) -> Result<(), EngineError> {
        match conflicts {
            "proceed" => {
                self.abort_on_version_conflict = false;
                Ok(())
            }
            "abort" => {
                self.abort_on_version_conflict = true;
                Ok(())
            }
            other => Err(EngineError::InvalidConflicts(other.to_string())),
        }
    }

    /// Validate the envelope, aggregating every violation.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut errors = self.search.validate();
        if self.max_retries < 0 {
            errors.push("retries cannot be negative".to_string());
        }
        if !(self.size == SIZE_ALL_MATCHES || self.size > 0) {
            errors.push(format!(
                "size should be greater than 0 if the request is limited to some number of \
                 documents or -1 if it isn't but it was [{}]",
                self.size
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::validation(errors))
        }
    }

    /// Merge the default search source under the user-supplied one.
    ///
    /// User values win on conflict. A request without a source gets the
    /// default template outright.
    pub fn apply_defaults(&mut self) -> Result<(), EngineError> {
        let mut merged = default_source();
        if let Some(user_source) = &self.search.source {
            let user: Value = serde_json::from_slice(user_source)
                .map_err(|e| EngineError::serialization(e.to_string()))?;
            deep_merge(&mut merged, &user);
        }
        let bytes =
            serde_json::to_vec(&merged).map_err(|e| EngineError::serialization(e.to_string()))?;
        self.search.source = Some(bytes);
        Ok(())
    }

    /// The backoff policy this envelope asks for.
    ///
    /// Callers must [`validate`] first; a negative `max_retries` saturates
    /// to zero here.
    ///
    /// [`validate`]: BulkByScrollRequest::validate
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(self.retry_backoff_initial, self.max_retries.max(0) as u32)
    }

    /// Encode the envelope to its binary wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_search(&mut buf, &self.search);
        put_bool(&mut buf, self.abort_on_version_conflict);
        put_varint(&mut buf, self.size);
        put_bool(&mut buf, self.refresh);
        put_duration(&mut buf, self.timeout);
        buf.put_u8(self.consistency.id());
        put_duration(&mut buf, self.retry_backoff_initial);
        put_varint(&mut buf, self.max_retries);
        encode_map(&mut buf, &self.context.values);
        encode_map(&mut buf, &self.context.headers);
        buf.to_vec()
    }

    /// Decode an envelope from its binary wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut buf = bytes;
        let search = decode_search(&mut buf)?;
        let abort_on_version_conflict = get_bool(&mut buf)?;
        let size = get_varint(&mut buf)?;
        let refresh = get_bool(&mut buf)?;
        let timeout = get_duration(&mut buf)?;
        if !buf.has_remaining() {
            return Err(EngineError::wire("truncated consistency"));
        }
        let consistency = WriteConsistency::from_id(buf.get_u8())
            .map_err(|e| EngineError::wire(e.to_string()))?;
        let retry_backoff_initial = get_duration(&mut buf)?;
        let max_retries = get_varint(&mut buf)?;
        let values = decode_map(&mut buf)?;
        let headers = decode_map(&mut buf)?;
        Ok(Self {
            search,
            size,
            abort_on_version_conflict,
            refresh,
            timeout,
            consistency,
            retry_backoff_initial,
            max_retries,
            context: RequestContext { values, headers },
        })
    }
}

impl fmt::Display for BulkByScrollRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.search.indices.is_empty() {
            write!(f, "[all indices]")?;
        } else {
            write!(f, "[{}]", self.search.indices.join(", "))?;
        }
        if !self.search.doc_types.is_empty() {
            write!(f, "[{}]", self.search.doc_types.join(", "))?;
        }
        Ok(())
    }
}

fn encode_search(buf: &mut BytesMut, search: &SearchRequest) {
    put_uvarint(buf, search.indices.len() as u64);
    for index in &search.indices {
        put_string(buf, index);
    }
    put_uvarint(buf, search.doc_types.len() as u64);
    for doc_type in &search.doc_types {
        put_string(buf, doc_type);
    }
    match &search.source {
        Some(source) => {
            put_bool(buf, true);
            put_bytes(buf, source);
        }
        None => put_bool(buf, false),
    }
    match search.scroll_keepalive {
        Some(keepalive) => {
            put_bool(buf, true);
            put_duration(buf, keepalive);
        }
        None => put_bool(buf, false),
    }
}

fn decode_search(buf: &mut impl Buf) -> Result<SearchRequest, EngineError> {
    let index_count = get_uvarint(buf)? as usize;
    let mut indices = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        indices.push(get_string(buf)?);
    }
    let type_count = get_uvarint(buf)? as usize;
    let mut doc_types = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        doc_types.push(get_string(buf)?);
    }
    let source = if get_bool(buf)? {
        Some(get_bytes(buf)?)
    } else {
        None
    };
    let scroll_keepalive = if get_bool(buf)? {
        Some(get_duration(buf)?)
    } else {
        None
    };
    Ok(SearchRequest {
        indices,
        doc_types,
        source,
        scroll_keepalive,
        context: RequestContext::default(),
    })
}

fn encode_map(buf: &mut BytesMut, map: &BTreeMap<String, String>) {
    put_uvarint(buf, map.len() as u64);
    for (key, value) in map {
        put_string(buf, key);
        put_string(buf, value);
    }
}

fn decode_map(buf: &mut impl Buf) -> Result<BTreeMap<String, String>, EngineError> {
    let count = get_uvarint(buf)? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = get_string(buf)?;
        let value = get_string(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Update documents in place, selected by a query.
///
/// Differs from other envelope shapes only in its transform: each hit is
/// re-indexed over itself with its read version, so concurrent writers lose
/// as version conflicts instead of being silently overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateByQueryRequest {
    /// The request envelope.
    pub envelope: BulkByScrollRequest,
}

impl UpdateByQueryRequest {
    /// Build an update-by-query over the given search.
    pub fn new(search: SearchRequest) -> Self {
        Self {
            envelope: BulkByScrollRequest::new(search),
        }
    }
}

impl fmt::Display for UpdateByQueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update-by-query {}", self.envelope)
    }
}

/// Where a reindex writes its documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexDestination {
    /// Destination index.
    pub index: String,
    /// Destination mapping type; `None` keeps each hit's own type.
    pub doc_type: Option<String>,
    /// Whether to overwrite (`Index`) or fail on existing docs (`Create`).
    pub op_type: OpType,
    /// Versioning semantics for the destination writes.
    pub version_type: VersionType,
}

impl ReindexDestination {
    /// Destination that overwrites documents in `index`.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            op_type: OpType::Index,
            version_type: VersionType::Internal,
        }
    }
}

/// Copy documents matching a query from one index into another.
#[derive(Debug, Clone, PartialEq)]
pub struct ReindexRequest {
    /// The request envelope.
    pub envelope: BulkByScrollRequest,
    /// Where the copies go.
    pub destination: ReindexDestination,
}

impl ReindexRequest {
    /// Build a reindex from the given search into `destination`.
    pub fn new(search: SearchRequest, destination: ReindexDestination) -> Self {
        Self {
            envelope: BulkByScrollRequest::new(search),
            destination,
        }
    }
}

impl fmt::Display for ReindexRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reindex {} to [{}]", self.envelope, self.destination.index)
    }
}
