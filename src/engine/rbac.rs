//! In-memory RBAC state consulted on the decision path.
//!
//! The snapshot maps role ids to their permission slug sets and carries the
//! permission catalog. It is rebuilt from the database after role mutations
//! and published by Arc swap; decisions read whatever snapshot is current
//! and never touch the database.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use sea_orm::DatabaseConnection;

use crate::engine::errors::EngineError;
use crate::engine::types::{policy_key, MANAGE_ACTION};
use crate::storage;

#[derive(Debug, Default)]
pub struct RbacSnapshot {
    role_permissions: HashMap<String, HashSet<String>>,
    catalog: HashSet<String>,
}

impl RbacSnapshot {
    pub fn build(
        permission_slugs: impl IntoIterator<Item = String>,
        role_links: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let catalog: HashSet<String> = permission_slugs.into_iter().collect();
        let mut role_permissions: HashMap<String, HashSet<String>> = HashMap::new();
        for (role_id, slug) in role_links {
            role_permissions.entry(role_id).or_default().insert(slug);
        }
        Self {
            role_permissions,
            catalog,
        }
    }

    /// True when any of the given roles grants `resource:action`, either
    /// directly or through the `resource:manage` wildcard.
    pub fn role_grants(&self, role_ids: &[String], resource: &str, action: &str) -> bool {
        let direct = policy_key(resource, action);
        let manage = policy_key(resource, MANAGE_ACTION);
        role_ids
            .iter()
            .filter_map(|id| self.role_permissions.get(id))
            .any(|perms| perms.contains(&direct) || perms.contains(&manage))
    }

    pub fn is_known_permission(&self, slug: &str) -> bool {
        self.catalog.contains(slug)
    }

    pub fn role_count(&self) -> usize {
        self.role_permissions.len()
    }

    pub fn permission_count(&self) -> usize {
        self.catalog.len()
    }
}

pub struct RbacCache {
    inner: RwLock<Arc<RbacSnapshot>>,
}

impl Default for RbacCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RbacCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(RbacSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<RbacSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn install(&self, snapshot: RbacSnapshot) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }

    /// Rebuild from the database and publish. Called at startup and after
    /// every role or permission-set mutation.
    pub async fn reload(&self, db: &DatabaseConnection) -> Result<(), EngineError> {
        let permissions = storage::list_permissions(db).await?;
        let links = storage::list_role_permissions(db).await?;
        let snapshot = RbacSnapshot::build(
            permissions.into_iter().map(|p| p.slug),
            links.into_iter().map(|l| (l.role_id, l.permission_slug)),
        );
        tracing::info!(
            roles = snapshot.role_count(),
            permissions = snapshot.permission_count(),
            "Rebuilt RBAC snapshot"
        );
        self.install(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RbacSnapshot {
        RbacSnapshot::build(
            vec![
                "customer:read".to_string(),
                "customer:manage".to_string(),
                "deal:read".to_string(),
            ],
            vec![
                ("r1".to_string(), "customer:read".to_string()),
                ("r2".to_string(), "deal:manage".to_string()),
            ],
        )
    }

    #[test]
    fn test_direct_grant() {
        let snap = snapshot();
        assert!(snap.role_grants(&["r1".to_string()], "customer", "read"));
        assert!(!snap.role_grants(&["r1".to_string()], "customer", "update"));
    }

    #[test]
    fn test_manage_wildcard_covers_all_actions() {
        let snap = snapshot();
        let roles = vec!["r2".to_string()];
        assert!(snap.role_grants(&roles, "deal", "read"));
        assert!(snap.role_grants(&roles, "deal", "update"));
        assert!(snap.role_grants(&roles, "deal", "delete"));
        assert!(!snap.role_grants(&roles, "customer", "read"));
    }

    #[test]
    fn test_union_across_roles() {
        let snap = snapshot();
        let both = vec!["r1".to_string(), "r2".to_string()];
        assert!(snap.role_grants(&both, "customer", "read"));
        assert!(snap.role_grants(&both, "deal", "update"));
    }

    #[test]
    fn test_unknown_role_grants_nothing() {
        let snap = snapshot();
        assert!(!snap.role_grants(&["missing".to_string()], "customer", "read"));
        assert!(!snap.role_grants(&[], "customer", "read"));
    }

    #[test]
    fn test_catalog_membership() {
        let snap = snapshot();
        assert!(snap.is_known_permission("customer:read"));
        assert!(!snap.is_known_permission("customer:teleport"));
    }

    #[test]
    fn test_cache_swap() {
        let cache = RbacCache::new();
        assert_eq!(cache.snapshot().role_count(), 0);

        cache.install(snapshot());
        let old = cache.snapshot();
        assert_eq!(old.role_count(), 2);

        cache.install(RbacSnapshot::default());
        // The earlier snapshot is unaffected by the swap
        assert_eq!(old.role_count(), 2);
        assert_eq!(cache.snapshot().role_count(), 0);
    }
}
