//! The access decision orchestrator: RBAC gate first, then the ABAC chain
//! for the matching policy key when a concrete instance is in play.

use sea_orm::DatabaseConnection;
use serde_json::Value;

use crate::engine::errors::EngineError;
use crate::engine::rbac::RbacCache;
use crate::engine::registry::PolicyRegistry;
use crate::engine::types::{policy_key, EvaluationInput, Principal};

pub struct DecisionEngine {
    rbac: RbacCache,
    registry: PolicyRegistry,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self {
            rbac: RbacCache::new(),
            registry: PolicyRegistry::with_default_chains(),
        }
    }

    pub fn rbac(&self) -> &RbacCache {
        &self.rbac
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Build both snapshots from the database. Called once at startup;
    /// afterwards the mutation paths keep them fresh.
    pub async fn warm(&self, db: &DatabaseConnection) -> Result<(), EngineError> {
        self.rbac.reload(db).await?;
        self.registry.reload(db).await
    }

    /// The sole decision entry point.
    ///
    /// Synchronous and side-effect-free: reads the current RBAC and chain
    /// snapshots, performs no I/O, and never triggers a reload. Every
    /// failure mode inside degrades to deny.
    pub fn decide(
        &self,
        principal: &Principal,
        resource: &str,
        action: &str,
        instance: Option<&Value>,
        context: &Value,
    ) -> bool {
        // Admins and superadmins bypass RBAC and ABAC alike
        if principal.role.bypasses_rbac() {
            return true;
        }

        let rbac = self.rbac.snapshot();
        if !rbac.role_grants(&principal.roles, resource, action) {
            return false;
        }

        // No instance: a pure RBAC decision (e.g. "may create any customer")
        let Some(instance) = instance else {
            return true;
        };

        let key = policy_key(resource, action);
        let Some(chain) = self
            .registry
            .chain_for(principal.organization_id.as_deref(), &key)
        else {
            // Undefined policies never implicitly allow
            tracing::debug!(%key, "no policy chain registered; denying");
            return false;
        };

        let input = EvaluationInput::new(principal, instance, action, context);
        chain.evaluate(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rbac::RbacSnapshot;
    use crate::engine::registry::DynamicTable;
    use crate::engine::rules::RuleKind;
    use crate::engine::types::SystemRole;
    use serde_json::json;
    use std::sync::Arc;

    fn engine_with_roles(links: Vec<(&str, &str)>) -> DecisionEngine {
        let engine = DecisionEngine::new();
        engine.rbac().install(RbacSnapshot::build(
            Vec::new(),
            links
                .into_iter()
                .map(|(role, slug)| (role.to_string(), slug.to_string())),
        ));
        engine
    }

    fn user(id: &str, org: &str, roles: &[&str]) -> Principal {
        Principal {
            id: id.into(),
            role: SystemRole::User,
            organization_id: Some(org.into()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_admin_bypass() {
        let engine = DecisionEngine::new();
        for role in [SystemRole::Admin, SystemRole::Superadmin] {
            let principal = Principal {
                id: "a1".into(),
                role,
                organization_id: None,
                roles: vec![],
            };
            // Allowed regardless of resource, action, or instance
            assert!(engine.decide(&principal, "customer", "read", None, &json!({})));
            assert!(engine.decide(
                &principal,
                "nonexistent",
                "obliterate",
                Some(&json!({ "organization_id": "other" })),
                &json!({})
            ));
        }
    }

    #[test]
    fn test_rbac_denies_without_grant() {
        let engine = engine_with_roles(vec![("r1", "deal:read")]);
        let principal = user("u9", "org1", &["r1"]);
        assert!(!engine.decide(&principal, "customer", "read", None, &json!({})));
    }

    #[test]
    fn test_rbac_short_circuits_before_abac() {
        // The customer:read static chain would allow this instance, but the
        // principal holds no grant, so ABAC is never consulted
        let engine = engine_with_roles(vec![]);
        let principal = user("u9", "org1", &[]);
        let instance = json!({ "organization_id": "org1" });
        assert!(!engine.decide(&principal, "customer", "read", Some(&instance), &json!({})));
    }

    #[test]
    fn test_pure_rbac_decision_without_instance() {
        let engine = engine_with_roles(vec![("r1", "customer:create")]);
        let principal = user("u9", "org1", &["r1"]);
        assert!(engine.decide(&principal, "customer", "create", None, &json!({})));
    }

    #[test]
    fn test_manage_wildcard_in_decision() {
        let engine = engine_with_roles(vec![("r1", "customer:manage")]);
        let principal = user("u9", "org1", &["r1"]);
        assert!(engine.decide(&principal, "customer", "export", None, &json!({})));
    }

    #[test]
    fn test_fail_closed_on_unknown_policy() {
        let engine = engine_with_roles(vec![("r1", "customer:export")]);
        let principal = user("u9", "org1", &["r1"]);
        // RBAC passes, but no chain exists for customer:export -> deny
        let instance = json!({ "organization_id": "org1" });
        assert!(!engine.decide(&principal, "customer", "export", Some(&instance), &json!({})));
        // Without an instance the same grant allows
        assert!(engine.decide(&principal, "customer", "export", None, &json!({})));
    }

    #[test]
    fn test_read_allowed_via_same_org_and_membership_chain() {
        // R1 grants customer:read; instance in org1 assigned to u9
        let engine = engine_with_roles(vec![("r1", "customer:read")]);
        let principal = user("u9", "org1", &["r1"]);
        let instance = json!({ "organization_id": "org1", "assigned_to": "u9" });
        assert!(engine.decide(&principal, "customer", "read", Some(&instance), &json!({})));
    }

    #[test]
    fn test_delete_denied_for_user_role() {
        // customer:delete's static chain requires role_membership(admin)
        let engine = engine_with_roles(vec![("r1", "customer:delete")]);
        let principal = user("u9", "org1", &["r1"]);
        let instance = json!({ "organization_id": "org1", "assigned_to": "u9" });
        assert!(!engine.decide(&principal, "customer", "delete", Some(&instance), &json!({})));
    }

    #[test]
    fn test_ownership_gates_update() {
        let engine = engine_with_roles(vec![("r1", "customer:update")]);
        let principal = user("u9", "org1", &["r1"]);

        let own = json!({ "organization_id": "org1", "assigned_to": "u9" });
        assert!(engine.decide(&principal, "customer", "update", Some(&own), &json!({})));

        let other = json!({ "organization_id": "org1", "assigned_to": "u2" });
        assert!(!engine.decide(&principal, "customer", "update", Some(&other), &json!({})));
    }

    #[test]
    fn test_dynamic_chain_overrides_static() {
        let engine = engine_with_roles(vec![("r1", "customer:update")]);
        let principal = user("u9", "org1", &["r1"]);
        // Not owned by the principal: static chain denies
        let instance = json!({ "organization_id": "org1", "assigned_to": "u2" });
        assert!(!engine.decide(&principal, "customer", "update", Some(&instance), &json!({})));

        // Dynamic chain for org1 relaxes update to same-organization only
        let mut table = DynamicTable::new();
        table.insert(
            ("org1".to_string(), "customer:update".to_string()),
            Arc::new(crate::engine::registry::RuleChain {
                rules: vec![crate::engine::registry::CompiledRule {
                    id: Some("r-dyn".into()),
                    kind: RuleKind::SameOrganization,
                }],
            }),
        );
        engine.registry().install_dynamic(table);

        assert!(engine.decide(&principal, "customer", "update", Some(&instance), &json!({})));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let engine = engine_with_roles(vec![("r1", "customer:read")]);
        let principal = user("u9", "org1", &["r1"]);
        let instance = json!({ "organization_id": "org1", "assigned_to": "u9" });
        let context = json!({});
        for _ in 0..10 {
            assert!(engine.decide(&principal, "customer", "read", Some(&instance), &context));
        }
    }
}
