//! Sync module for offline-first mutation reconciliation
//!
//! Provides:
//! - Per-key compare-and-set state storage (memory and SQLite)
//! - Deny-by-default access policy
//! - Conflict detection with conservative auto-merge
//! - Delta queries for catch-up reads
//! - Bounded per-actor batch history
//!
//! # Sync Protocol
//!
//! 1. Client sends a `SyncBatchRequest` with queued mutations and its cursor
//! 2. Server reconciles each envelope in order against the current record
//! 3. Server returns synced ids, conflicts and per-item errors
//! 4. Server includes records changed since the cursor that the actor may see
//! 5. Client stores `newSyncCursor` for the next batch
//!
//! # Conflict Resolution
//!
//! - A create or delete older than the server record loses (`server_wins`)
//! - An update older than the server record is merged when the edited
//!   fields do not overlap (`merge`), otherwise left for the user (`manual`)
//! - Anything at or after the server timestamp is applied

mod conflict;
mod delta;
mod engine;
mod error;
mod handler;
mod history;
mod policy;
mod sqlite;
mod store;
mod types;

pub use conflict::{auto_merge, overlapping_fields};
pub use delta::DeltaQuery;
pub use engine::{ItemOutcome, ReconciliationEngine};
pub use error::{StoreError, SyncError};
pub use handler::{HandlerOptions, SyncHandler};
pub use history::{HistoryLog, DEFAULT_HISTORY_CAPACITY};
pub use policy::AccessPolicy;
pub use sqlite::SqliteStateStore;
pub use store::{MemoryStateStore, StateStore, StoreResult};
pub use types::{
    now_millis, ConflictReport, ConflictResolution, ErrorCode, HistoryEntry, ItemError,
    MutationEnvelope, PullRequest, PullResponse, RecordStamp, ResourceKey, ResourceRecord,
    ResourceType, SyncAction, SyncBatchRequest, SyncBatchResponse, SyncStatus, Timestamp,
};
