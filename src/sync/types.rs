//! Sync data types
//!
//! Defines types for offline-first synchronization including:
//! - Mutation envelopes submitted by clients
//! - Resource records held by the state store
//! - Conflict reports and per-item errors
//! - Batch request/response shapes

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Current server time as a [`Timestamp`]
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Types of resources that can be synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Activity,
    Progress,
    Content,
    UserAction,
    /// Any resource type the server does not know about
    #[serde(other)]
    Unknown,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Activity => "activity",
            ResourceType::Progress => "progress",
            ResourceType::Content => "content",
            ResourceType::UserAction => "user_action",
            ResourceType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "activity" => ResourceType::Activity,
            "progress" => ResourceType::Progress,
            "content" => ResourceType::Content,
            "user_action" => ResourceType::UserAction,
            _ => ResourceType::Unknown,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of sync actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Unsupported,
}

/// A client-authored mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEnvelope {
    /// Target resource ID, stable across its lifetime
    pub id: String,
    pub resource_type: ResourceType,
    pub action: SyncAction,
    /// Resource-specific fields; `null` for deletes
    #[serde(default)]
    pub payload: Value,
    /// Client wall-clock time of the mutation
    pub origin_timestamp: Timestamp,
    /// Defaults to the batch actor when omitted
    #[serde(default)]
    pub actor_id: String,
    /// Defaults to the batch device when omitted
    #[serde(default)]
    pub device_id: String,
}

impl MutationEnvelope {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type, &self.id)
    }
}

/// Store key for a resource record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub resource_type: ResourceType,
    pub id: String,
}

impl ResourceKey {
    pub fn new(resource_type: ResourceType, id: &str) -> Self {
        Self {
            resource_type,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.resource_type, self.id)
    }
}

/// Server-side current version of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub id: String,
    pub resource_type: ResourceType,
    pub payload: Value,
    /// Timestamp of the write that produced this record
    pub last_timestamp: Timestamp,
    pub last_modified_by: String,
    pub last_device_id: String,
    pub is_public: bool,
    /// Per-key write counter, starts at 1
    pub version: u64,
}

impl ResourceRecord {
    /// Build the record for a first write of a key
    pub fn new(key: &ResourceKey, payload: Value, timestamp: Timestamp, actor_id: &str, device_id: &str) -> Self {
        Self {
            id: key.id.clone(),
            resource_type: key.resource_type,
            is_public: is_public_payload(&payload),
            payload,
            last_timestamp: timestamp,
            last_modified_by: actor_id.to_string(),
            last_device_id: device_id.to_string(),
            version: 1,
        }
    }

    /// Produce the successor of this record carrying a new payload
    pub fn next(&self, payload: Value, timestamp: Timestamp, actor_id: &str, device_id: &str) -> Self {
        Self {
            id: self.id.clone(),
            resource_type: self.resource_type,
            is_public: is_public_payload(&payload),
            payload,
            last_timestamp: timestamp,
            last_modified_by: actor_id.to_string(),
            last_device_id: device_id.to_string(),
            version: self.version + 1,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type, &self.id)
    }

    pub fn stamp(&self) -> RecordStamp {
        RecordStamp {
            last_timestamp: self.last_timestamp,
            version: self.version,
        }
    }

    /// Whether `actor_id` may see this record in a delta
    pub fn is_visible_to(&self, actor_id: &str) -> bool {
        self.is_public || self.last_modified_by == actor_id
    }
}

/// Compare-and-set precondition identifying one exact record state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStamp {
    pub last_timestamp: Timestamp,
    pub version: u64,
}

fn is_public_payload(payload: &Value) -> bool {
    payload
        .get("isPublic")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The newer server record stands, the client mutation is discarded
    ServerWins,
    /// Non-overlapping fields were merged and written
    Merge,
    /// User-driven resolution required, server record untouched
    Manual,
}

/// A detected disagreement between a client mutation and the server record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub item_id: String,
    pub resource_type: ResourceType,
    pub client_payload: Value,
    pub server_payload: Value,
    pub resolution: ConflictResolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_payload: Option<Value>,
}

/// Per-item failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    ItemNotFound,
    UnsupportedAction,
    ProcessingError,
}

/// A per-item failure in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub item_id: String,
    pub error: String,
    pub code: ErrorCode,
}

/// Request to reconcile a batch of mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchRequest {
    pub items: Vec<MutationEnvelope>,
    #[serde(default)]
    pub last_sync_cursor: Option<Timestamp>,
    pub device_id: String,
    pub actor_id: String,
}

/// Response from a batch reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResponse {
    pub success: bool,
    pub synced_ids: Vec<String>,
    pub conflicts: Vec<ConflictReport>,
    pub server_updates: Vec<ResourceRecord>,
    pub new_sync_cursor: Timestamp,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

/// Request for server changes only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub actor_id: String,
    #[serde(default)]
    pub last_sync_cursor: Option<Timestamp>,
}

/// Response from a pull
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub server_updates: Vec<ResourceRecord>,
    pub new_sync_cursor: Timestamp,
}

/// One processed batch, kept for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub actor_id: String,
    pub device_id: String,
    pub synced_at: DateTime<Utc>,
    pub item_count: usize,
    pub synced_count: usize,
    pub conflict_count: usize,
    pub error_count: usize,
}

/// Aggregate sync status for an actor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub batch_count: usize,
    pub total_items: usize,
    pub synced_items: usize,
    pub conflict_items: usize,
    pub error_items: usize,
}
