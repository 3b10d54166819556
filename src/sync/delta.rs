//! Delta query
//!
//! Server-side changes an actor may see since its last sync cursor. A record
//! is visible when it is public or when the actor made its latest write; the
//! original creator loses sight of a private record once someone else
//! modifies it.

use std::sync::Arc;

use super::store::{StateStore, StoreResult};
use super::types::{ResourceRecord, Timestamp};

pub struct DeltaQuery {
    store: Arc<dyn StateStore>,
}

impl DeltaQuery {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Records changed after `cursor` that `actor_id` may see
    pub async fn changes_since(
        &self,
        actor_id: &str,
        cursor: Option<Timestamp>,
    ) -> StoreResult<Vec<ResourceRecord>> {
        let records = self.store.scan_since(cursor).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.is_visible_to(actor_id))
            .collect())
    }
}
