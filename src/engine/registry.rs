//! Policy registry: one lookup surface over two chain sources.
//!
//! Static chains are code-defined at process start and never change. Dynamic
//! chains are materialized from persisted policy/rule rows; every rebuild
//! replaces the whole `(organization, key)` table through an `Arc` swap, so
//! a decision in flight sees either the old table or the new one in full.
//! Decision calls never trigger a rebuild; mutation paths do.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::Value;

use crate::engine::errors::EngineError;
use crate::engine::rules::RuleKind;
use crate::engine::types::EvaluationInput;
use crate::entities::{dynamic_policy, policy_rule};
use crate::storage;

/// A rule plus its persisted id (static rules have none).
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: Option<String>,
    pub kind: RuleKind,
}

/// An ordered AND-chain of compiled rules.
#[derive(Debug, Clone, Default)]
pub struct RuleChain {
    pub rules: Vec<CompiledRule>,
}

impl RuleChain {
    /// AND over all rules in order. The first `false` short-circuits; a rule
    /// that errors counts as `false` (degrade to deny, never propagate).
    pub fn evaluate(&self, input: &EvaluationInput) -> bool {
        for rule in &self.rules {
            match rule.kind.evaluate(input) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(err) => {
                    tracing::warn!(
                        rule_type = rule.kind.type_slug(),
                        rule_id = rule.id.as_deref().unwrap_or("static"),
                        error = %err,
                        "rule evaluation failed; treating as deny"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Per-rule outcomes for the admin test endpoint. Rules are pure, so
    /// evaluating past the first failure cannot change the verdict; the
    /// combined result is identical to `evaluate`.
    pub fn trace(&self, input: &EvaluationInput) -> ChainTrace {
        let rules: Vec<RuleOutcome> = self
            .rules
            .iter()
            .map(|rule| match rule.kind.evaluate(input) {
                Ok(passed) => RuleOutcome {
                    rule_id: rule.id.clone(),
                    rule_type: rule.kind.type_slug(),
                    passed,
                    error: None,
                },
                Err(err) => RuleOutcome {
                    rule_id: rule.id.clone(),
                    rule_type: rule.kind.type_slug(),
                    passed: false,
                    error: Some(err.to_string()),
                },
            })
            .collect();
        let allowed = !rules.is_empty() && rules.iter().all(|r| r.passed);
        ChainTrace { allowed, rules }
    }
}

#[derive(Debug, Serialize)]
pub struct ChainTrace {
    pub allowed: bool,
    pub rules: Vec<RuleOutcome>,
}

#[derive(Debug, Serialize)]
pub struct RuleOutcome {
    pub rule_id: Option<String>,
    pub rule_type: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `(organization_id, policy_key)` -> chain.
pub type DynamicTable = HashMap<(String, String), Arc<RuleChain>>;

pub struct PolicyRegistry {
    statics: HashMap<String, Arc<RuleChain>>,
    dynamic: RwLock<Arc<DynamicTable>>,
}

impl PolicyRegistry {
    pub fn new(statics: HashMap<String, Arc<RuleChain>>) -> Self {
        Self {
            statics,
            dynamic: RwLock::new(Arc::new(DynamicTable::new())),
        }
    }

    pub fn with_default_chains() -> Self {
        Self::new(default_chains())
    }

    /// Chain lookup with explicit precedence: a dynamic chain for the
    /// principal's organization overrides the static chain for the same key;
    /// static is the fallback; `None` means deny to the caller.
    pub fn chain_for(&self, organization: Option<&str>, key: &str) -> Option<Arc<RuleChain>> {
        if let Some(org) = organization {
            if let Some(chain) = self
                .dynamic_snapshot()
                .get(&(org.to_string(), key.to_string()))
            {
                return Some(chain.clone());
            }
        }
        self.statics.get(key).cloned()
    }

    /// Dynamic chain only, no static fallback. Used by the admin test path,
    /// which must exercise the chain of one specific policy.
    pub fn dynamic_chain(&self, organization: &str, key: &str) -> Option<Arc<RuleChain>> {
        self.dynamic_snapshot()
            .get(&(organization.to_string(), key.to_string()))
            .cloned()
    }

    fn dynamic_snapshot(&self) -> Arc<DynamicTable> {
        self.dynamic
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publish a fully built table. Readers see old-or-new, never a mix.
    pub fn install_dynamic(&self, table: DynamicTable) {
        let mut guard = self
            .dynamic
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(table);
    }

    /// Full rebuild from persisted rows. On any invalid rule the rebuild
    /// fails as a whole, naming the offending policy, and the previous table
    /// stays live.
    pub async fn reload(&self, db: &DatabaseConnection) -> Result<(), EngineError> {
        let policies = storage::load_active_policies(db).await?;
        let mut table = DynamicTable::new();
        for (policy, rules) in &policies {
            let chain = compile_policy_rules(policy, rules)?;
            if chain.rules.is_empty() {
                // A chain with zero rules would vacuously allow; leave the
                // key to the static fallback (or deny) instead.
                tracing::warn!(
                    organization = %policy.organization_id,
                    key = %policy.key,
                    "policy has no active rules; not installing its chain"
                );
                continue;
            }
            table.insert(
                (policy.organization_id.clone(), policy.key.clone()),
                Arc::new(chain),
            );
        }
        let chains = table.len();
        self.install_dynamic(table);
        tracing::info!(chains, "Rebuilt dynamic policy chains");
        Ok(())
    }
}

/// Instantiate the chain for one policy: active rules only, `sort_order`
/// ascending, each `(type, config)` through the rule factory.
pub fn compile_policy_rules(
    policy: &dynamic_policy::Model,
    rules: &[policy_rule::Model],
) -> Result<RuleChain, EngineError> {
    let mut ordered: Vec<&policy_rule::Model> =
        rules.iter().filter(|r| r.active != 0).collect();
    ordered.sort_by_key(|r| r.sort_order);

    let mut compiled = Vec::with_capacity(ordered.len());
    for row in ordered {
        let config: Value =
            serde_json::from_str(&row.config).map_err(|err| EngineError::PolicyRebuild {
                policy: format!("{}/{}", policy.organization_id, policy.key),
                source: Box::new(EngineError::Serde(err)),
            })?;
        let kind =
            RuleKind::build(&row.rule_type, &config).map_err(|err| EngineError::PolicyRebuild {
                policy: format!("{}/{}", policy.organization_id, policy.key),
                source: Box::new(err),
            })?;
        compiled.push(CompiledRule {
            id: Some(row.id.clone()),
            kind,
        });
    }
    Ok(RuleChain { rules: compiled })
}

fn static_chain(kinds: Vec<RuleKind>) -> Arc<RuleChain> {
    Arc::new(RuleChain {
        rules: kinds
            .into_iter()
            .map(|kind| CompiledRule { id: None, kind })
            .collect(),
    })
}

fn membership(roles: &[&str]) -> RuleKind {
    RuleKind::RoleMembership {
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

/// The code-defined chain set, organization-independent and not persisted.
pub fn default_chains() -> HashMap<String, Arc<RuleChain>> {
    let mut chains = HashMap::new();

    chains.insert(
        "customer:read".to_string(),
        static_chain(vec![RuleKind::SameOrganization, membership(&["admin", "user"])]),
    );
    chains.insert(
        "customer:update".to_string(),
        static_chain(vec![RuleKind::SameOrganization, RuleKind::Ownership]),
    );
    chains.insert(
        "customer:delete".to_string(),
        static_chain(vec![RuleKind::SameOrganization, membership(&["admin"])]),
    );

    chains.insert(
        "deal:read".to_string(),
        static_chain(vec![RuleKind::SameOrganization]),
    );
    chains.insert(
        "deal:update".to_string(),
        static_chain(vec![RuleKind::SameOrganization, RuleKind::Ownership]),
    );
    chains.insert(
        "deal:delete".to_string(),
        static_chain(vec![RuleKind::SameOrganization, membership(&["admin"])]),
    );

    chains.insert(
        "task:read".to_string(),
        static_chain(vec![RuleKind::SameOrganization]),
    );
    chains.insert(
        "task:update".to_string(),
        static_chain(vec![RuleKind::SameOrganization, RuleKind::Ownership]),
    );
    chains.insert(
        "task:delete".to_string(),
        static_chain(vec![RuleKind::SameOrganization, RuleKind::Ownership]),
    );

    chains.insert(
        "product:read".to_string(),
        static_chain(vec![RuleKind::SameOrganization]),
    );
    chains.insert(
        "product:update".to_string(),
        static_chain(vec![RuleKind::SameOrganization, membership(&["admin"])]),
    );
    chains.insert(
        "product:delete".to_string(),
        static_chain(vec![RuleKind::SameOrganization, membership(&["admin"])]),
    );

    chains.insert(
        "report:read".to_string(),
        static_chain(vec![RuleKind::SameOrganization]),
    );

    chains
}
