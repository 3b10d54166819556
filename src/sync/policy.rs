//! Access control guard
//!
//! Deny-by-default table of allowed `(resource type, action)` pairs.
//! The guard does not look at actor identity; ownership is applied to
//! reads in the delta query instead.

use std::collections::HashSet;

use super::types::{ResourceType, SyncAction};

/// Enumerated access policy
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    allowed: HashSet<(ResourceType, SyncAction)>,
}

impl AccessPolicy {
    /// A policy that denies everything
    pub fn deny_all() -> Self {
        Self {
            allowed: HashSet::new(),
        }
    }

    /// Allow `action` on `resource_type`
    pub fn allow(mut self, resource_type: ResourceType, action: SyncAction) -> Self {
        if resource_type != ResourceType::Unknown && action != SyncAction::Unsupported {
            self.allowed.insert((resource_type, action));
        }
        self
    }

    /// Whether `actor_id` may perform `action` on `resource_type`
    pub fn is_allowed(&self, actor_id: &str, resource_type: ResourceType, action: SyncAction) -> bool {
        let allowed = self.allowed.contains(&(resource_type, action));
        if !allowed {
            tracing::debug!(
                actor_id = %actor_id,
                resource_type = %resource_type,
                action = ?action,
                "Access denied by policy"
            );
        }
        allowed
    }

    /// Allowed pairs, for auditing
    pub fn entries(&self) -> impl Iterator<Item = &(ResourceType, SyncAction)> {
        self.allowed.iter()
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        use ResourceType::*;
        use SyncAction::*;

        Self::deny_all()
            .allow(Activity, Create)
            .allow(Activity, Update)
            .allow(Activity, Delete)
            .allow(Progress, Create)
            .allow(Progress, Update)
            .allow(Content, Create)
            .allow(Content, Update)
            .allow(Content, Delete)
            // Actions are an append-only log
            .allow(UserAction, Create)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = AccessPolicy::default();

        assert!(policy.is_allowed("u1", ResourceType::Activity, SyncAction::Delete));
        assert!(policy.is_allowed("u1", ResourceType::Progress, SyncAction::Update));
        assert!(!policy.is_allowed("u1", ResourceType::Progress, SyncAction::Delete));
        assert!(policy.is_allowed("u1", ResourceType::UserAction, SyncAction::Create));
        assert!(!policy.is_allowed("u1", ResourceType::UserAction, SyncAction::Update));
        assert_eq!(policy.entries().count(), 9);
    }

    #[test]
    fn test_unknown_always_denied() {
        let policy = AccessPolicy::default()
            .allow(ResourceType::Unknown, SyncAction::Create)
            .allow(ResourceType::Activity, SyncAction::Unsupported);

        assert!(!policy.is_allowed("u1", ResourceType::Unknown, SyncAction::Create));
        assert!(!policy.is_allowed("u1", ResourceType::Activity, SyncAction::Unsupported));
    }

    #[test]
    fn test_deny_all() {
        let policy = AccessPolicy::deny_all();
        assert!(!policy.is_allowed("u1", ResourceType::Activity, SyncAction::Create));
    }
}
