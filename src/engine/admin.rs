//! Admin surface over roles and dynamic policies.
//!
//! Every mutation validates first (slug shape, rule config through the rule
//! factory), persists second, and finally republishes the affected in-memory
//! snapshot. Reload is owned here, on the mutation path; the decision path
//! never reloads anything.

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::errors::EngineError;
use crate::engine::rbac::RbacCache;
use crate::engine::registry::{compile_policy_rules, ChainTrace, PolicyRegistry};
use crate::engine::rules::RuleKind;
use crate::engine::types::{is_valid_policy_key, is_valid_slug, EvaluationInput, Principal};
use crate::entities::{dynamic_policy, policy_rule};
use crate::storage::{
    self, NewPolicy, NewRole, NewRule, RoleWithPermissions, UpdatePolicy, UpdateRole, UpdateRule,
};

// ---------- Roles ----------

/// Role administration: validates against the live permission catalog,
/// persists through storage, and rebuilds the RBAC snapshot after every
/// mutation that changes what a role grants.
pub struct RoleAdmin<'a> {
    db: &'a DatabaseConnection,
    rbac: &'a RbacCache,
}

impl<'a> RoleAdmin<'a> {
    pub fn new(db: &'a DatabaseConnection, rbac: &'a RbacCache) -> Self {
        Self { db, rbac }
    }

    fn check_slug(&self, slug: &str) -> Result<(), EngineError> {
        if !is_valid_slug(slug) {
            return Err(EngineError::InvalidSlug(slug.to_string()));
        }
        Ok(())
    }

    /// The catalog is seeded once and immutable, so the snapshot is always
    /// current for permission lookups.
    fn check_permissions(&self, slugs: &[String]) -> Result<(), EngineError> {
        let snapshot = self.rbac.snapshot();
        for slug in slugs {
            if !snapshot.is_known_permission(slug) {
                return Err(EngineError::UnknownPermission(slug.clone()));
            }
        }
        Ok(())
    }

    pub async fn create(
        &self,
        organization_id: &str,
        req: NewRole,
    ) -> Result<RoleWithPermissions, EngineError> {
        self.check_slug(&req.slug)?;
        self.check_permissions(&req.permissions)?;
        let role = storage::create_role(self.db, organization_id, req).await?;
        self.rbac.reload(self.db).await?;
        Ok(role)
    }

    pub async fn update(
        &self,
        organization_id: &str,
        role_id: &str,
        req: UpdateRole,
    ) -> Result<RoleWithPermissions, EngineError> {
        if let Some(slug) = &req.slug {
            self.check_slug(slug)?;
        }
        if let Some(permissions) = &req.permissions {
            self.check_permissions(permissions)?;
        }
        let role = storage::update_role(self.db, organization_id, role_id, req).await?;
        self.rbac.reload(self.db).await?;
        Ok(role)
    }

    /// Refused while any user still references the role.
    pub async fn delete(&self, organization_id: &str, role_id: &str) -> Result<(), EngineError> {
        storage::delete_role(self.db, organization_id, role_id).await?;
        self.rbac.reload(self.db).await
    }

    /// Idempotent: assigning an already-held role is a no-op. Assignments do
    /// not change what any role grants, so no snapshot rebuild is needed.
    pub async fn assign(
        &self,
        organization_id: &str,
        role_id: &str,
        user_id: &str,
    ) -> Result<(), EngineError> {
        storage::get_role(self.db, organization_id, role_id)
            .await?
            .ok_or(EngineError::NotFound("role"))?;
        storage::assign_role(self.db, role_id, user_id).await
    }

    /// Idempotent: revoking an absent role is a no-op.
    pub async fn revoke(
        &self,
        organization_id: &str,
        role_id: &str,
        user_id: &str,
    ) -> Result<(), EngineError> {
        storage::get_role(self.db, organization_id, role_id)
            .await?
            .ok_or(EngineError::NotFound("role"))?;
        storage::revoke_role(self.db, role_id, user_id).await
    }
}

// ---------- Dynamic policies ----------

/// Rule row as exposed over the admin API, with config decoded back to JSON.
#[derive(Debug, Serialize)]
pub struct RuleView {
    pub id: String,
    pub rule_type: String,
    pub config: Value,
    pub sort_order: i64,
    pub active: bool,
}

impl TryFrom<policy_rule::Model> for RuleView {
    type Error = EngineError;

    fn try_from(row: policy_rule::Model) -> Result<Self, EngineError> {
        Ok(Self {
            id: row.id,
            rule_type: row.rule_type,
            config: serde_json::from_str(&row.config)?,
            sort_order: row.sort_order,
            active: row.active != 0,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PolicyView {
    #[serde(flatten)]
    pub policy: dynamic_policy::Model,
    pub rules: Vec<RuleView>,
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub principal: Principal,
    #[serde(default)]
    pub instance: Value,
    #[serde(default)]
    pub context: Value,
}

/// Dynamic-policy administration. Rule configs go through the rule factory
/// before anything is persisted, and every mutation ends with a full registry
/// rebuild so the next decision sees the new chain table.
pub struct PolicyAdmin<'a> {
    db: &'a DatabaseConnection,
    registry: &'a PolicyRegistry,
}

impl<'a> PolicyAdmin<'a> {
    pub fn new(db: &'a DatabaseConnection, registry: &'a PolicyRegistry) -> Self {
        Self { db, registry }
    }

    pub async fn create_policy(
        &self,
        organization_id: &str,
        req: NewPolicy,
    ) -> Result<dynamic_policy::Model, EngineError> {
        if !is_valid_policy_key(&req.key) {
            return Err(EngineError::InvalidPolicyKey(req.key));
        }
        let policy = storage::create_policy(self.db, organization_id, req).await?;
        self.registry.reload(self.db).await?;
        Ok(policy)
    }

    pub async fn list_policies(
        &self,
        organization_id: &str,
    ) -> Result<Vec<dynamic_policy::Model>, EngineError> {
        storage::list_policies(self.db, organization_id).await
    }

    pub async fn get_policy(
        &self,
        organization_id: &str,
        policy_id: &str,
    ) -> Result<PolicyView, EngineError> {
        let policy = storage::get_policy(self.db, organization_id, policy_id)
            .await?
            .ok_or(EngineError::NotFound("policy"))?;
        let rules = storage::list_policy_rules(self.db, policy_id).await?;
        Ok(PolicyView {
            policy,
            rules: rules.into_iter().map(RuleView::try_from).collect::<Result<_, _>>()?,
        })
    }

    pub async fn update_policy(
        &self,
        organization_id: &str,
        policy_id: &str,
        req: UpdatePolicy,
    ) -> Result<dynamic_policy::Model, EngineError> {
        if let Some(key) = &req.key {
            if !is_valid_policy_key(key) {
                return Err(EngineError::InvalidPolicyKey(key.clone()));
            }
        }
        let policy = storage::update_policy(self.db, organization_id, policy_id, req).await?;
        self.registry.reload(self.db).await?;
        Ok(policy)
    }

    pub async fn delete_policy(
        &self,
        organization_id: &str,
        policy_id: &str,
    ) -> Result<(), EngineError> {
        storage::delete_policy(self.db, organization_id, policy_id).await?;
        self.registry.reload(self.db).await
    }

    pub async fn add_rule(
        &self,
        organization_id: &str,
        policy_id: &str,
        req: NewRule,
    ) -> Result<RuleView, EngineError> {
        storage::get_policy(self.db, organization_id, policy_id)
            .await?
            .ok_or(EngineError::NotFound("policy"))?;
        // Shape check before anything touches the database
        RuleKind::build(&req.rule_type, &req.config)?;
        let row = storage::insert_policy_rule(self.db, policy_id, req).await?;
        self.registry.reload(self.db).await?;
        row.try_into()
    }

    pub async fn update_rule(
        &self,
        organization_id: &str,
        policy_id: &str,
        rule_id: &str,
        req: UpdateRule,
    ) -> Result<RuleView, EngineError> {
        storage::get_policy(self.db, organization_id, policy_id)
            .await?
            .ok_or(EngineError::NotFound("policy"))?;
        let existing = storage::get_policy_rule(self.db, policy_id, rule_id)
            .await?
            .ok_or(EngineError::NotFound("rule"))?;

        // Validate the merged (type, config) pair, not just the delta
        let rule_type = req.rule_type.clone().unwrap_or(existing.rule_type.clone());
        let config = match &req.config {
            Some(config) => config.clone(),
            None => serde_json::from_str(&existing.config)?,
        };
        RuleKind::build(&rule_type, &config)?;

        let row =
            storage::update_policy_rule(self.db, existing, rule_type, config, req).await?;
        self.registry.reload(self.db).await?;
        row.try_into()
    }

    pub async fn delete_rule(
        &self,
        organization_id: &str,
        policy_id: &str,
        rule_id: &str,
    ) -> Result<(), EngineError> {
        storage::get_policy(self.db, organization_id, policy_id)
            .await?
            .ok_or(EngineError::NotFound("policy"))?;
        storage::delete_policy_rule(self.db, policy_id, rule_id).await?;
        self.registry.reload(self.db).await
    }

    /// Run one policy's chain against a sample principal/instance/context,
    /// outside the normal decision path. Active policies are served from the
    /// live registry; inactive ones are compiled through the identical loader
    /// path, so authoring output cannot drift from production semantics.
    pub async fn test_policy(
        &self,
        organization_id: &str,
        policy_id: &str,
        req: &TestRequest,
    ) -> Result<ChainTrace, EngineError> {
        let policy = storage::get_policy(self.db, organization_id, policy_id)
            .await?
            .ok_or(EngineError::NotFound("policy"))?;

        let action = policy.key.split_once(':').map(|(_, a)| a).unwrap_or("");
        let input = EvaluationInput::new(&req.principal, &req.instance, action, &req.context);

        if policy.active != 0 {
            if let Some(chain) = self.registry.dynamic_chain(organization_id, &policy.key) {
                return Ok(chain.trace(&input));
            }
        }
        let rules = storage::list_policy_rules(self.db, policy_id).await?;
        let chain = compile_policy_rules(&policy, &rules)?;
        Ok(chain.trace(&input))
    }
}
