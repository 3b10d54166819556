//! Sync protocol handler
//!
//! Entry point for one inbound batch: validates its shape, reconciles every
//! envelope in order, collects the delta for the actor, records history and
//! assembles the response.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::delta::DeltaQuery;
use super::engine::{action_name, ItemOutcome, ReconciliationEngine};
use super::error::{Result, SyncError};
use super::history::HistoryLog;
use super::policy::AccessPolicy;
use super::store::StateStore;
use super::types::{
    now_millis, ErrorCode, HistoryEntry, ItemError, MutationEnvelope, PullRequest, PullResponse,
    SyncBatchRequest, SyncBatchResponse,
};

/// Tunables for the handler
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub max_cas_retries: u32,
    pub max_batch_items: usize,
    pub history_capacity: usize,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            max_cas_retries: 8,
            max_batch_items: 500,
            history_capacity: super::history::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Drives reconciliation for inbound batches
///
/// Shareable across requests; batches for different actors or devices may be
/// processed concurrently.
pub struct SyncHandler {
    engine: ReconciliationEngine,
    delta: DeltaQuery,
    history: HistoryLog,
    max_batch_items: usize,
}

impl SyncHandler {
    pub fn new(store: Arc<dyn StateStore>, policy: AccessPolicy, options: HandlerOptions) -> Self {
        Self {
            engine: ReconciliationEngine::new(store.clone(), policy, options.max_cas_retries),
            delta: DeltaQuery::new(store),
            history: HistoryLog::new(options.history_capacity),
            max_batch_items: options.max_batch_items,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        self.engine.store()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Reconcile a batch and build the response
    ///
    /// Fails only when the batch itself is malformed or the delta cannot be
    /// read; every per-envelope problem is reported in the response. Writes
    /// committed before a failed delta read stay committed and are recorded
    /// in history, so a retried batch converges through idempotent re-delivery.
    pub async fn sync(&self, request: SyncBatchRequest) -> Result<SyncBatchResponse> {
        self.validate(&request)?;

        let SyncBatchRequest {
            items,
            last_sync_cursor,
            device_id,
            actor_id,
        } = request;

        let item_count = items.len();
        let mut synced_ids = Vec::new();
        let mut conflicts = Vec::new();
        let mut errors = Vec::new();

        for mut envelope in items {
            if envelope.actor_id.is_empty() {
                envelope.actor_id = actor_id.clone();
            }
            if envelope.device_id.is_empty() {
                envelope.device_id = device_id.clone();
            }

            match self.engine.reconcile(&envelope).await {
                Ok(outcome) => {
                    tracing::debug!(
                        item_id = %envelope.id,
                        resource_type = %envelope.resource_type,
                        outcome = outcome_label(&outcome),
                        "Reconciled envelope"
                    );
                    match outcome {
                        ItemOutcome::Applied => synced_ids.push(envelope.id),
                        ItemOutcome::Conflict { report, applied } => {
                            if applied {
                                synced_ids.push(envelope.id);
                            }
                            conflicts.push(report);
                        }
                        ItemOutcome::Denied => errors.push(item_error(
                            &envelope,
                            ErrorCode::PermissionDenied,
                            format!(
                                "Not allowed to {} {}",
                                action_name(envelope.action),
                                envelope.resource_type
                            ),
                        )),
                        ItemOutcome::NotFound => errors.push(item_error(
                            &envelope,
                            ErrorCode::ItemNotFound,
                            format!("No {} with id {}", envelope.resource_type, envelope.id),
                        )),
                        ItemOutcome::Unsupported => errors.push(item_error(
                            &envelope,
                            ErrorCode::UnsupportedAction,
                            "Unsupported action".to_string(),
                        )),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        item_id = %envelope.id,
                        actor_id = %envelope.actor_id,
                        "Failed to process envelope: {}",
                        e
                    );
                    errors.push(item_error(&envelope, ErrorCode::ProcessingError, e.to_string()));
                }
            }
        }

        self.history.append(HistoryEntry {
            id: Uuid::new_v4().to_string(),
            actor_id: actor_id.clone(),
            device_id: device_id.clone(),
            synced_at: Utc::now(),
            item_count,
            synced_count: synced_ids.len(),
            conflict_count: conflicts.len(),
            error_count: errors.len(),
        });

        let server_updates = match self.delta.changes_since(&actor_id, last_sync_cursor).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::error!(
                    actor_id = %actor_id,
                    device_id = %device_id,
                    synced = synced_ids.len(),
                    "Batch applied but delta read failed: {}",
                    e
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            actor_id = %actor_id,
            device_id = %device_id,
            items = item_count,
            synced = synced_ids.len(),
            conflicts = conflicts.len(),
            errors = errors.len(),
            server_updates = server_updates.len(),
            "Sync batch processed"
        );

        Ok(SyncBatchResponse {
            success: true,
            synced_ids,
            conflicts,
            server_updates,
            new_sync_cursor: now_millis(),
            errors,
        })
    }

    /// Changes visible to an actor, without submitting mutations
    pub async fn pull(&self, request: PullRequest) -> Result<PullResponse> {
        if request.actor_id.trim().is_empty() {
            return Err(SyncError::InvalidBatch("actorId is required".to_string()));
        }

        let server_updates = self
            .delta
            .changes_since(&request.actor_id, request.last_sync_cursor)
            .await?;

        Ok(PullResponse {
            server_updates,
            new_sync_cursor: now_millis(),
        })
    }

    fn validate(&self, request: &SyncBatchRequest) -> Result<()> {
        if request.actor_id.trim().is_empty() {
            return Err(SyncError::InvalidBatch("actorId is required".to_string()));
        }
        if request.device_id.trim().is_empty() {
            return Err(SyncError::InvalidBatch("deviceId is required".to_string()));
        }
        if request.items.len() > self.max_batch_items {
            return Err(SyncError::InvalidBatch(format!(
                "Batch has {} items, limit is {}",
                request.items.len(),
                self.max_batch_items
            )));
        }
        Ok(())
    }
}

fn item_error(envelope: &MutationEnvelope, code: ErrorCode, error: String) -> ItemError {
    ItemError {
        item_id: envelope.id.clone(),
        error,
        code,
    }
}

fn outcome_label(outcome: &ItemOutcome) -> &'static str {
    match outcome {
        ItemOutcome::Applied => "applied",
        ItemOutcome::Conflict { .. } => "conflict",
        ItemOutcome::Denied => "denied",
        ItemOutcome::NotFound => "not_found",
        ItemOutcome::Unsupported => "unsupported",
    }
}
