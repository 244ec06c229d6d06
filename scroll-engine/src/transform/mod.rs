//! Document transforms: how a search hit becomes a bulk operation.
//!
//! A transform is called once per batch, on the worker pool rather than the
//! network reply path, so heavy user scripts cannot starve I/O. Scripts may
//! rewrite document data freely but must leave identity and routing fields
//! alone; each forbidden mutation is reported as a typed error naming the
//! field.

use std::sync::Arc;

use scroll_client::{
    BulkOperation, BulkRequest, IndexOperation, OpType, ScrollHit, VersionType,
};
use serde_json::{Map, Value};

use crate::errors::EngineError;
use crate::progress::ProgressRecord;
use crate::request::ReindexDestination;

/// The identity and routing fields a script must not touch.
pub const FORBIDDEN_FIELDS: [&str; 8] = [
    "_index",
    "_type",
    "_id",
    "_version",
    "_routing",
    "_parent",
    "_timestamp",
    "_ttl",
];

/// Maps one batch of hits to a bulk request.
///
/// Returning an empty bulk tells the driver to skip the bulk entirely and
/// advance the scroll.
pub trait DocumentTransform: Send + Sync + 'static {
    /// Build the bulk for one batch. Runs on the generic worker pool.
    fn build_bulk(&self, hits: Vec<ScrollHit>) -> Result<BulkRequest, EngineError>;
}

/// What a script decided should happen to a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOp {
    /// Write the (possibly modified) document.
    Index,
    /// The hit needs no mutation; skip it and count a noop.
    Noop,
}

/// The view of one hit a script runs against.
///
/// `source` is freely mutable. The remaining fields mirror the hit's
/// identity; changing any of them fails the request with a
/// `Modifying [<field>] not allowed` error.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    /// What to do with the hit afterwards.
    pub op: ScriptOp,
    /// The hit's index (`_index`).
    pub index: String,
    /// The hit's mapping type (`_type`).
    pub doc_type: String,
    /// The hit's id (`_id`).
    pub id: String,
    /// The hit's version (`_version`).
    pub version: i64,
    /// The hit's routing (`_routing`).
    pub routing: Option<String>,
    /// The hit's parent (`_parent`).
    pub parent: Option<String>,
    /// The hit's timestamp (`_timestamp`).
    pub timestamp: Option<i64>,
    /// The hit's TTL (`_ttl`).
    pub ttl: Option<i64>,
    /// The document body, free to mutate.
    pub source: Map<String, Value>,
}

impl ScriptContext {
    fn for_hit(hit: &ScrollHit, source: Map<String, Value>) -> Self {
        Self {
            op: ScriptOp::Index,
            index: hit.index.clone(),
            doc_type: hit.doc_type.clone(),
            id: hit.id.clone(),
            version: hit.version,
            routing: hit.routing.clone(),
            parent: hit.parent.clone(),
            timestamp: hit.timestamp,
            ttl: hit.ttl,
            source,
        }
    }

    /// Fail with a field-naming error if any identity field changed.
    fn check_identity_unchanged(&self, hit: &ScrollHit) -> Result<(), EngineError> {
        if self.index != hit.index {
            return Err(EngineError::ForbiddenFieldMutation { field: "_index" });
        }
        if self.doc_type != hit.doc_type {
            return Err(EngineError::ForbiddenFieldMutation { field: "_type" });
        }
        if self.id != hit.id {
            return Err(EngineError::ForbiddenFieldMutation { field: "_id" });
        }
        if self.version != hit.version {
            return Err(EngineError::ForbiddenFieldMutation { field: "_version" });
        }
        if self.routing != hit.routing {
            return Err(EngineError::ForbiddenFieldMutation { field: "_routing" });
        }
        if self.parent != hit.parent {
            return Err(EngineError::ForbiddenFieldMutation { field: "_parent" });
        }
        if self.timestamp != hit.timestamp {
            return Err(EngineError::ForbiddenFieldMutation { field: "_timestamp" });
        }
        if self.ttl != hit.ttl {
            return Err(EngineError::ForbiddenFieldMutation { field: "_ttl" });
        }
        Ok(())
    }
}

/// A user script run against each hit before it is written.
pub trait DocumentScript: Send + Sync + 'static {
    /// Apply the script to one hit.
    fn apply(&self, ctx: &mut ScriptContext) -> Result<(), EngineError>;
}

impl<F> DocumentScript for F
where
    F: Fn(&mut ScriptContext) -> Result<(), EngineError> + Send + Sync + 'static,
{
    fn apply(&self, ctx: &mut ScriptContext) -> Result<(), EngineError> {
        self(ctx)
    }
}

fn source_map(hit: &ScrollHit) -> Result<Map<String, Value>, EngineError> {
    match &hit.source {
        Value::Object(map) => Ok(map.clone()),
        other => Err(EngineError::serialization(format!(
            "document [{}/{}/{}] source must be a JSON object, got {}",
            hit.index, hit.doc_type, hit.id, other
        ))),
    }
}

/// Run the script over a hit, enforcing the identity sentinels.
///
/// Returns `None` when the script decided the hit is a noop; the noop is
/// counted against `progress`.
fn scripted_source(
    script: Option<&Arc<dyn DocumentScript>>,
    hit: &ScrollHit,
    progress: &ProgressRecord,
) -> Result<Option<Map<String, Value>>, EngineError> {
    let source = source_map(hit)?;
    let Some(script) = script else {
        return Ok(Some(source));
    };
    let mut ctx = ScriptContext::for_hit(hit, source);
    script.apply(&mut ctx)?;
    ctx.check_identity_unchanged(hit)?;
    if ctx.op == ScriptOp::Noop {
        progress.count_noop();
        return Ok(None);
    }
    Ok(Some(ctx.source))
}

/// Transform for update-by-query: each hit is indexed over itself.
///
/// Destination index, type, id, and routing are copied verbatim from the
/// hit; the body is the hit's source; the hit's version rides along with
/// internal versioning so a concurrent writer surfaces as a version
/// conflict.
pub struct UpdateByQueryTransform {
    progress: Arc<ProgressRecord>,
    script: Option<Arc<dyn DocumentScript>>,
}

impl UpdateByQueryTransform {
    /// Transform without a script: rewrite every hit as-is.
    pub fn new(progress: Arc<ProgressRecord>) -> Self {
        Self {
            progress,
            script: None,
        }
    }

    /// Transform that runs `script` over each hit first.
    pub fn with_script(progress: Arc<ProgressRecord>, script: Arc<dyn DocumentScript>) -> Self {
        Self {
            progress,
            script: Some(script),
        }
    }
}

impl DocumentTransform for UpdateByQueryTransform {
    fn build_bulk(&self, hits: Vec<ScrollHit>) -> Result<BulkRequest, EngineError> {
        let mut request = BulkRequest::default();
        for hit in hits {
            let Some(source) = scripted_source(self.script.as_ref(), &hit, &self.progress)? else {
                continue;
            };
            request.operations.push(BulkOperation::Index(IndexOperation {
                index: hit.index,
                doc_type: hit.doc_type,
                id: Some(hit.id),
                routing: hit.routing,
                parent: hit.parent,
                timestamp: hit.timestamp,
                ttl: hit.ttl,
                version: Some(hit.version),
                version_type: VersionType::Internal,
                op_type: OpType::Index,
                source: Value::Object(source),
            }));
        }
        Ok(request)
    }
}

/// Transform for reindex: each hit is written into the destination.
pub struct ReindexTransform {
    progress: Arc<ProgressRecord>,
    destination: ReindexDestination,
    script: Option<Arc<dyn DocumentScript>>,
}

impl ReindexTransform {
    /// Transform that copies every hit into `destination`.
    pub fn new(progress: Arc<ProgressRecord>, destination: ReindexDestination) -> Self {
        Self {
            progress,
            destination,
            script: None,
        }
    }

    /// Transform that runs `script` over each hit before copying it.
    pub fn with_script(
        progress: Arc<ProgressRecord>,
        destination: ReindexDestination,
        script: Arc<dyn DocumentScript>,
    ) -> Self {
        Self {
            progress,
            destination,
            script: Some(script),
        }
    }
}

impl DocumentTransform for ReindexTransform {
    fn build_bulk(&self, hits: Vec<ScrollHit>) -> Result<BulkRequest, EngineError> {
        let mut request = BulkRequest::default();
        for hit in hits {
            let Some(source) = scripted_source(self.script.as_ref(), &hit, &self.progress)? else {
                continue;
            };
            let version = match self.destination.version_type {
                // Internal versioning overwrites whatever the destination
                // holds; carrying the source version over would race.
                VersionType::Internal => None,
                VersionType::External => Some(hit.version),
            };
            request.operations.push(BulkOperation::Index(IndexOperation {
                index: self.destination.index.clone(),
                doc_type: self
                    .destination
                    .doc_type
                    .clone()
                    .unwrap_or_else(|| hit.doc_type.clone()),
                id: Some(hit.id),
                routing: hit.routing,
                parent: hit.parent,
                timestamp: hit.timestamp,
                ttl: hit.ttl,
                version,
                version_type: self.destination.version_type,
                op_type: self.destination.op_type,
                source: Value::Object(source),
            }));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationHandle;
    use serde_json::json;

    fn progress() -> Arc<ProgressRecord> {
        Arc::new(ProgressRecord::new(CancellationHandle::new()))
    }

    fn hit(id: &str) -> ScrollHit {
        ScrollHit {
            index: "docs".to_string(),
            doc_type: "doc".to_string(),
            id: id.to_string(),
            version: 4,
            routing: Some("shard-a".to_string()),
            parent: None,
            timestamp: None,
            ttl: None,
            source: json!({"title": "old", "views": 9}),
        }
    }

    fn single_index_op(request: &BulkRequest) -> &IndexOperation {
        assert_eq!(request.operations.len(), 1);
        match &request.operations[0] {
            BulkOperation::Index(op) => op,
            other => panic!("expected an index operation, got {:?}", other),
        }
    }

    #[test]
    fn test_update_by_query_copies_identity_and_version() {
        let transform = UpdateByQueryTransform::new(progress());
        let request = transform.build_bulk(vec![hit("1")]).unwrap();
        let op = single_index_op(&request);

        assert_eq!(op.index, "docs");
        assert_eq!(op.doc_type, "doc");
        assert_eq!(op.id.as_deref(), Some("1"));
        assert_eq!(op.routing.as_deref(), Some("shard-a"));
        assert_eq!(op.version, Some(4));
        assert_eq!(op.version_type, VersionType::Internal);
        assert_eq!(op.op_type, OpType::Index);
        assert_eq!(op.source, json!({"title": "old", "views": 9}));
    }

    #[test]
    fn test_script_may_mutate_data_fields() {
        let script = Arc::new(|ctx: &mut ScriptContext| -> Result<(), EngineError> {
            ctx.source
                .insert("title".to_string(), Value::String("new".to_string()));
            Ok(())
        });
        let transform = UpdateByQueryTransform::with_script(progress(), script);
        let request = transform.build_bulk(vec![hit("1")]).unwrap();
        assert_eq!(single_index_op(&request).source["title"], "new");
    }

    #[test]
    fn test_script_noop_is_counted_and_skipped() {
        let record = progress();
        let script = Arc::new(|ctx: &mut ScriptContext| -> Result<(), EngineError> {
            ctx.op = ScriptOp::Noop;
            Ok(())
        });
        let transform = UpdateByQueryTransform::with_script(Arc::clone(&record), script);
        let request = transform.build_bulk(vec![hit("1"), hit("2")]).unwrap();

        assert!(request.is_empty());
        assert_eq!(record.snapshot().noops(), 2);
    }

    #[test]
    fn test_script_may_not_mutate_identity_fields() {
        struct Case {
            field: &'static str,
            mutate: fn(&mut ScriptContext),
        }
        let cases = [
            Case {
                field: "_index",
                mutate: |ctx| ctx.index = "elsewhere".to_string(),
            },
            Case {
                field: "_type",
                mutate: |ctx| ctx.doc_type = "other".to_string(),
            },
            Case {
                field: "_id",
                mutate: |ctx| ctx.id = "stolen".to_string(),
            },
            Case {
                field: "_version",
                mutate: |ctx| ctx.version += 1,
            },
            Case {
                field: "_routing",
                mutate: |ctx| ctx.routing = None,
            },
            Case {
                field: "_parent",
                mutate: |ctx| ctx.parent = Some("adopted".to_string()),
            },
            Case {
                field: "_timestamp",
                mutate: |ctx| ctx.timestamp = Some(42),
            },
            Case {
                field: "_ttl",
                mutate: |ctx| ctx.ttl = Some(1000),
            },
        ];

        for case in cases {
            let mutate = case.mutate;
            let script = Arc::new(move |ctx: &mut ScriptContext| -> Result<(), EngineError> {
                mutate(ctx);
                Ok(())
            });
            let transform = UpdateByQueryTransform::with_script(progress(), script);
            let err = transform.build_bulk(vec![hit("1")]).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Modifying [{}] not allowed", case.field)
            );
        }
    }

    #[test]
    fn test_script_error_propagates() {
        let script = Arc::new(|_: &mut ScriptContext| -> Result<(), EngineError> {
            Err(EngineError::script("surprise"))
        });
        let transform = UpdateByQueryTransform::with_script(progress(), script);
        let err = transform.build_bulk(vec![hit("1")]).unwrap_err();
        assert!(matches!(err, EngineError::Script(_)));
    }

    #[test]
    fn test_non_object_source_is_rejected() {
        let mut bad = hit("1");
        bad.source = json!("just a string");
        let transform = UpdateByQueryTransform::new(progress());
        assert!(transform.build_bulk(vec![bad]).is_err());
    }

    #[test]
    fn test_reindex_rewrites_destination() {
        let destination = ReindexDestination::new("archive");
        let transform = ReindexTransform::new(progress(), destination);
        let request = transform.build_bulk(vec![hit("1")]).unwrap();
        let op = single_index_op(&request);

        assert_eq!(op.index, "archive");
        // No destination type configured: the hit's own type is kept.
        assert_eq!(op.doc_type, "doc");
        assert_eq!(op.id.as_deref(), Some("1"));
        // Internal versioning overwrites; no version carried over.
        assert_eq!(op.version, None);
    }

    #[test]
    fn test_reindex_create_only_with_external_versions() {
        let destination = ReindexDestination {
            index: "archive".to_string(),
            doc_type: Some("frozen".to_string()),
            op_type: OpType::Create,
            version_type: VersionType::External,
        };
        let transform = ReindexTransform::new(progress(), destination);
        let request = transform.build_bulk(vec![hit("1")]).unwrap();
        let op = single_index_op(&request);

        assert_eq!(op.doc_type, "frozen");
        assert_eq!(op.op_type, OpType::Create);
        assert_eq!(op.version, Some(4));
        assert_eq!(op.version_type, VersionType::External);
    }

    #[test]
    fn test_empty_batch_builds_empty_bulk() {
        let transform = UpdateByQueryTransform::new(progress());
        assert!(transform.build_bulk(Vec::new()).unwrap().is_empty());
    }
}
