//! Reconciliation engine
//!
//! Decides the outcome of one envelope against the current record and commits
//! it through the store's compare-and-set. A failed CAS means another batch
//! wrote the key in between; the record is re-read and the decision re-run, so
//! a lost race lands in the ordinary conflict branches.

use std::sync::Arc;

use super::conflict::{auto_merge, overlapping_fields, report};
use super::error::{Result, SyncError};
use super::policy::AccessPolicy;
use super::store::StateStore;
use super::types::{
    now_millis, ConflictReport, ConflictResolution, MutationEnvelope, RecordStamp, ResourceKey,
    ResourceRecord, SyncAction, Timestamp,
};

/// Terminal state of one envelope
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// Written, or already in the requested state
    Applied,
    /// A conflict was detected; `applied` is true when a merge was written
    Conflict { report: ConflictReport, applied: bool },
    Denied,
    NotFound,
    Unsupported,
}

/// What to do with the record read for a key
#[derive(Debug)]
enum Decision {
    Done(ItemOutcome),
    Write {
        expected: Option<RecordStamp>,
        new: Option<ResourceRecord>,
        outcome: ItemOutcome,
    },
}

/// Applies envelopes to a [`StateStore`]
pub struct ReconciliationEngine {
    store: Arc<dyn StateStore>,
    policy: AccessPolicy,
    max_cas_retries: u32,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn StateStore>, policy: AccessPolicy, max_cas_retries: u32) -> Self {
        Self {
            store,
            policy,
            max_cas_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Reconcile a single envelope
    ///
    /// Returns `Err` only for processing faults; denials, missing records and
    /// conflicts are outcomes.
    pub async fn reconcile(&self, envelope: &MutationEnvelope) -> Result<ItemOutcome> {
        if envelope.action == SyncAction::Unsupported {
            return Ok(ItemOutcome::Unsupported);
        }

        if !self
            .policy
            .is_allowed(&envelope.actor_id, envelope.resource_type, envelope.action)
        {
            return Ok(ItemOutcome::Denied);
        }

        if matches!(envelope.action, SyncAction::Create | SyncAction::Update)
            && !envelope.payload.is_object()
        {
            return Err(SyncError::MalformedPayload(format!(
                "{} payload for {} must be an object",
                action_name(envelope.action),
                envelope.id
            )));
        }

        let key = envelope.key();
        let attempts = self.max_cas_retries + 1;

        for attempt in 1..=attempts {
            let current = self.store.get(&key).await?;

            match decide(envelope, &key, current.as_ref(), now_millis()) {
                Decision::Done(outcome) => return Ok(outcome),
                Decision::Write {
                    expected,
                    new,
                    outcome,
                } => {
                    if self.store.compare_and_set(&key, expected, new).await? {
                        return Ok(outcome);
                    }
                    tracing::warn!(
                        key = %key,
                        attempt = attempt,
                        "Concurrent write detected, re-evaluating"
                    );
                }
            }
        }

        Err(SyncError::RetriesExhausted {
            key: key.to_string(),
            attempts,
        })
    }
}

pub(crate) fn action_name(action: SyncAction) -> &'static str {
    match action {
        SyncAction::Create => "create",
        SyncAction::Update => "update",
        SyncAction::Delete => "delete",
        SyncAction::Unsupported => "unsupported",
    }
}

/// Whether `existing` was produced by this exact envelope
fn already_applied(envelope: &MutationEnvelope, existing: &ResourceRecord) -> bool {
    existing.last_timestamp == envelope.origin_timestamp
        && existing.last_modified_by == envelope.actor_id
        && existing.payload == envelope.payload
}

fn decide(
    envelope: &MutationEnvelope,
    key: &ResourceKey,
    current: Option<&ResourceRecord>,
    now: Timestamp,
) -> Decision {
    let origin = envelope.origin_timestamp;
    let actor = envelope.actor_id.as_str();
    let device = envelope.device_id.as_str();

    match (envelope.action, current) {
        (SyncAction::Create, None) => Decision::Write {
            expected: None,
            new: Some(ResourceRecord::new(key, envelope.payload.clone(), origin, actor, device)),
            outcome: ItemOutcome::Applied,
        },
        (SyncAction::Create | SyncAction::Delete, Some(existing))
            if existing.last_timestamp > origin =>
        {
            Decision::Done(ItemOutcome::Conflict {
                report: report(envelope, existing, ConflictResolution::ServerWins, None),
                applied: false,
            })
        }
        (SyncAction::Create | SyncAction::Update, Some(existing))
            if already_applied(envelope, existing) =>
        {
            Decision::Done(ItemOutcome::Applied)
        }
        (SyncAction::Update, None) => Decision::Done(ItemOutcome::NotFound),
        (SyncAction::Update, Some(existing)) if existing.last_timestamp > origin => {
            match auto_merge(&envelope.payload, &existing.payload) {
                // Nothing the server lacks; rewriting would only churn the
                // version and ownership
                Some(merged) if merged == existing.payload => Decision::Done(ItemOutcome::Applied),
                Some(merged) => {
                    // Stamp the merge after the record it supersedes even if
                    // the server clock trails the client that wrote it
                    let stamped = now.max(existing.last_timestamp.saturating_add(1));
                    Decision::Write {
                        expected: Some(existing.stamp()),
                        new: Some(existing.next(merged.clone(), stamped, actor, device)),
                        outcome: ItemOutcome::Conflict {
                            report: report(
                                envelope,
                                existing,
                                ConflictResolution::Merge,
                                Some(merged),
                            ),
                            applied: true,
                        },
                    }
                }
                None => {
                    tracing::debug!(
                        key = %key,
                        fields = ?overlapping_fields(&envelope.payload, &existing.payload),
                        "Overlapping edits need manual resolution"
                    );
                    Decision::Done(ItemOutcome::Conflict {
                        report: report(envelope, existing, ConflictResolution::Manual, None),
                        applied: false,
                    })
                }
            }
        }
        (SyncAction::Create | SyncAction::Update, Some(existing)) => Decision::Write {
            expected: Some(existing.stamp()),
            new: Some(existing.next(envelope.payload.clone(), origin, actor, device)),
            outcome: ItemOutcome::Applied,
        },
        (SyncAction::Delete, None) => Decision::Done(ItemOutcome::Applied),
        (SyncAction::Delete, Some(existing)) => Decision::Write {
            expected: Some(existing.stamp()),
            new: None,
            outcome: ItemOutcome::Applied,
        },
        (SyncAction::Unsupported, _) => Decision::Done(ItemOutcome::Unsupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::MemoryStateStore;
    use crate::sync::types::ResourceType;
    use serde_json::{json, Value};

    fn envelope(id: &str, action: SyncAction, payload: Value, ts: Timestamp, actor: &str) -> MutationEnvelope {
        MutationEnvelope {
            id: id.to_string(),
            resource_type: ResourceType::Activity,
            action,
            payload,
            origin_timestamp: ts,
            actor_id: actor.to_string(),
            device_id: format!("{}-device", actor),
        }
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(Arc::new(MemoryStateStore::new()), AccessPolicy::default(), 3)
    }

    async fn stored(engine: &ReconciliationEngine, id: &str) -> Option<ResourceRecord> {
        engine
            .store()
            .get(&ResourceKey::new(ResourceType::Activity, id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_stale_create_loses() {
        let engine = engine();
        let first = envelope("a1", SyncAction::Create, json!({"title": "Quiz"}), 100, "u1");
        assert!(matches!(engine.reconcile(&first).await.unwrap(), ItemOutcome::Applied));

        let stale = envelope("a1", SyncAction::Create, json!({"title": "Old"}), 50, "u2");
        match engine.reconcile(&stale).await.unwrap() {
            ItemOutcome::Conflict { report, applied } => {
                assert_eq!(report.resolution, ConflictResolution::ServerWins);
                assert_eq!(report.server_payload, json!({"title": "Quiz"}));
                assert!(!applied);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(stored(&engine, "a1").await.unwrap().last_timestamp, 100);
    }

    #[tokio::test]
    async fn test_create_redelivery_is_identical() {
        let engine = engine();
        let create = envelope("a1", SyncAction::Create, json!({"title": "Quiz"}), 100, "u1");

        engine.reconcile(&create).await.unwrap();
        let first = stored(&engine, "a1").await.unwrap();
        assert!(matches!(engine.reconcile(&create).await.unwrap(), ItemOutcome::Applied));
        assert_eq!(stored(&engine, "a1").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_later_create_overwrites() {
        let engine = engine();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"title": "Quiz"}), 100, "u1"))
            .await
            .unwrap();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"title": "Retry"}), 120, "u1"))
            .await
            .unwrap();

        let record = stored(&engine, "a1").await.unwrap();
        assert_eq!(record.payload, json!({"title": "Retry"}));
        assert_eq!(record.last_timestamp, 120);
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let engine = engine();
        let update = envelope("nope", SyncAction::Update, json!({"title": "x"}), 10, "u1");
        assert!(matches!(engine.reconcile(&update).await.unwrap(), ItemOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_newer_update_applies_client_timestamp() {
        let engine = engine();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"title": "Quiz"}), 100, "u1"))
            .await
            .unwrap();
        engine
            .reconcile(&envelope("a1", SyncAction::Update, json!({"title": "Quiz v2"}), 200, "u2"))
            .await
            .unwrap();

        let record = stored(&engine, "a1").await.unwrap();
        assert_eq!(record.payload, json!({"title": "Quiz v2"}));
        assert_eq!(record.last_timestamp, 200);
        assert_eq!(record.last_modified_by, "u2");
    }

    #[tokio::test]
    async fn test_stale_update_merges() {
        let engine = engine();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"a": 1, "b": 2}), 100, "u1"))
            .await
            .unwrap();

        let stale = envelope("a1", SyncAction::Update, json!({"a": 1, "c": 3}), 50, "u2");
        match engine.reconcile(&stale).await.unwrap() {
            ItemOutcome::Conflict { report, applied } => {
                assert!(applied);
                assert_eq!(report.resolution, ConflictResolution::Merge);
                assert_eq!(report.merged_payload, Some(json!({"a": 1, "b": 2, "c": 3})));
            }
            other => panic!("expected merge, got {:?}", other),
        }

        let record = stored(&engine, "a1").await.unwrap();
        assert_eq!(record.payload, json!({"a": 1, "b": 2, "c": 3}));
        assert!(record.last_timestamp > 100);
    }

    #[tokio::test]
    async fn test_stale_update_with_overlap_is_manual() {
        let engine = engine();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"title": "Quiz"}), 100, "u1"))
            .await
            .unwrap();
        let before = stored(&engine, "a1").await.unwrap();

        let stale = envelope("a1", SyncAction::Update, json!({"title": "Quiz v2"}), 50, "u2");
        match engine.reconcile(&stale).await.unwrap() {
            ItemOutcome::Conflict { report, applied } => {
                assert!(!applied);
                assert_eq!(report.resolution, ConflictResolution::Manual);
                assert!(report.merged_payload.is_none());
            }
            other => panic!("expected manual conflict, got {:?}", other),
        }
        assert_eq!(stored(&engine, "a1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_merge_timestamp_never_regresses() {
        let engine = engine();
        let far_future = now_millis() + 10_000_000;
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"a": 1}), far_future, "u1"))
            .await
            .unwrap();
        engine
            .reconcile(&envelope("a1", SyncAction::Update, json!({"b": 2}), 10, "u2"))
            .await
            .unwrap();

        assert_eq!(stored(&engine, "a1").await.unwrap().last_timestamp, far_future + 1);
    }

    #[tokio::test]
    async fn test_merge_at_timestamp_ceiling() {
        let engine = engine();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"a": 1}), Timestamp::MAX, "u1"))
            .await
            .unwrap();

        let stale = envelope("a1", SyncAction::Update, json!({"b": 2}), 10, "u2");
        match engine.reconcile(&stale).await.unwrap() {
            ItemOutcome::Conflict { report, applied } => {
                assert!(applied);
                assert_eq!(report.resolution, ConflictResolution::Merge);
            }
            other => panic!("expected merge, got {:?}", other),
        }

        let record = stored(&engine, "a1").await.unwrap();
        assert_eq!(record.last_timestamp, Timestamp::MAX);
        assert_eq!(record.payload, json!({"a": 1, "b": 2}));
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_stale_subset_update_leaves_record_alone() {
        let engine = engine();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"a": 1, "b": 2}), 100, "u1"))
            .await
            .unwrap();
        let before = stored(&engine, "a1").await.unwrap();

        let stale = envelope("a1", SyncAction::Update, json!({"a": 1}), 50, "u2");
        for _ in 0..2 {
            assert!(matches!(engine.reconcile(&stale).await.unwrap(), ItemOutcome::Applied));
        }

        let after = stored(&engine, "a1").await.unwrap();
        assert_eq!(after, before);
        assert_eq!(after.last_modified_by, "u1");
    }

    #[tokio::test]
    async fn test_merge_redelivery_writes_once() {
        let engine = engine();
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"a": 1}), 100, "u1"))
            .await
            .unwrap();

        let stale = envelope("a1", SyncAction::Update, json!({"b": 2}), 50, "u2");
        assert!(matches!(
            engine.reconcile(&stale).await.unwrap(),
            ItemOutcome::Conflict { applied: true, .. }
        ));
        let merged = stored(&engine, "a1").await.unwrap();

        assert!(matches!(engine.reconcile(&stale).await.unwrap(), ItemOutcome::Applied));
        assert_eq!(stored(&engine, "a1").await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_delete_paths() {
        let engine = engine();

        let absent = envelope("gone", SyncAction::Delete, Value::Null, 10, "u1");
        assert!(matches!(engine.reconcile(&absent).await.unwrap(), ItemOutcome::Applied));

        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"title": "Quiz"}), 100, "u1"))
            .await
            .unwrap();

        let stale = envelope("a1", SyncAction::Delete, Value::Null, 90, "u2");
        match engine.reconcile(&stale).await.unwrap() {
            ItemOutcome::Conflict { report, .. } => {
                assert_eq!(report.resolution, ConflictResolution::ServerWins)
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(stored(&engine, "a1").await.is_some());

        let fresh = envelope("a1", SyncAction::Delete, Value::Null, 100, "u2");
        assert!(matches!(engine.reconcile(&fresh).await.unwrap(), ItemOutcome::Applied));
        assert!(stored(&engine, "a1").await.is_none());
    }

    #[tokio::test]
    async fn test_guard_and_unsupported() {
        let engine = engine();

        let mut denied = envelope("p1", SyncAction::Delete, Value::Null, 10, "u1");
        denied.resource_type = ResourceType::Progress;
        assert!(matches!(engine.reconcile(&denied).await.unwrap(), ItemOutcome::Denied));

        let unsupported = envelope("a1", SyncAction::Unsupported, Value::Null, 10, "u1");
        assert!(matches!(
            engine.reconcile(&unsupported).await.unwrap(),
            ItemOutcome::Unsupported
        ));
    }

    #[tokio::test]
    async fn test_non_object_payload_is_error() {
        let engine = engine();
        let bad = envelope("a1", SyncAction::Create, json!("just a string"), 10, "u1");
        assert!(matches!(
            engine.reconcile(&bad).await,
            Err(SyncError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_monotonic_timestamp() {
        let engine = Arc::new(engine());
        engine
            .reconcile(&envelope("a1", SyncAction::Create, json!({"n": 0}), 1, "u1"))
            .await
            .unwrap();

        let handles: Vec<_> = (2..=40)
            .map(|ts| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let update = envelope("a1", SyncAction::Update, json!({"n": ts}), ts, "u1");
                    engine.reconcile(&update).await
                })
            })
            .collect();

        let mut accepted = Vec::new();
        for (ts, handle) in (2..=40).zip(handles) {
            if let Ok(ItemOutcome::Applied) = handle.await.unwrap() {
                accepted.push(ts);
            }
        }

        let record = stored(&engine, "a1").await.unwrap();
        assert!(!accepted.is_empty());
        assert!(accepted.iter().all(|ts| record.last_timestamp >= *ts));
    }
}
