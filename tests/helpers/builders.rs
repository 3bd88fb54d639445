use palisade::entities;
use palisade::storage::{self, NewPolicy, NewRole, NewRule, RoleWithPermissions};
use sea_orm::DatabaseConnection;
use serde_json::Value;

/// Builder for creating test roles
pub struct RoleBuilder {
    organization_id: String,
    name: String,
    slug: String,
    description: Option<String>,
    is_default: bool,
    permissions: Vec<String>,
}

impl RoleBuilder {
    pub fn new(slug: &str) -> Self {
        Self {
            organization_id: "org1".to_string(),
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            is_default: false,
            permissions: Vec::new(),
        }
    }

    pub fn in_org(mut self, organization_id: &str) -> Self {
        self.organization_id = organization_id.to_string();
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn granting(mut self, slugs: &[&str]) -> Self {
        self.permissions = slugs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn is_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> RoleWithPermissions {
        storage::create_role(
            db,
            &self.organization_id,
            NewRole {
                name: self.name,
                slug: self.slug,
                description: self.description,
                is_default: self.is_default,
                permissions: self.permissions,
            },
        )
        .await
        .expect("Failed to create test role")
    }
}

/// Builder for creating test dynamic policies with rule rows
pub struct PolicyBuilder {
    organization_id: String,
    key: String,
    name: String,
    active: bool,
    rules: Vec<NewRule>,
}

impl PolicyBuilder {
    pub fn new(key: &str) -> Self {
        Self {
            organization_id: "org1".to_string(),
            key: key.to_string(),
            name: key.to_string(),
            active: true,
            rules: Vec::new(),
        }
    }

    pub fn in_org(mut self, organization_id: &str) -> Self {
        self.organization_id = organization_id.to_string();
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_rule(mut self, rule_type: &str, config: Value) -> Self {
        self.rules.push(NewRule {
            rule_type: rule_type.to_string(),
            config,
            sort_order: None,
            active: true,
        });
        self
    }

    pub fn with_inactive_rule(mut self, rule_type: &str, config: Value) -> Self {
        self.rules.push(NewRule {
            rule_type: rule_type.to_string(),
            config,
            sort_order: None,
            active: false,
        });
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::dynamic_policy::Model {
        let policy = storage::create_policy(
            db,
            &self.organization_id,
            NewPolicy {
                key: self.key,
                name: self.name,
                active: self.active,
            },
        )
        .await
        .expect("Failed to create test policy");

        for rule in self.rules {
            storage::insert_policy_rule(db, &policy.id, rule)
                .await
                .expect("Failed to create test rule");
        }
        policy
    }
}
