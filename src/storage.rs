use crate::engine::errors::EngineError;
use crate::entities;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    /// Permission slugs granted by this role.
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub is_default: Option<bool>,
    pub permissions: Option<Vec<String>>,
}

/// Role plus its granted permission slugs, the shape the admin API serves.
#[derive(Debug, Clone, Serialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: entities::role::Model,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPolicy {
    /// `resource:action`, unique per organization.
    pub key: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePolicy {
    pub key: Option<String>,
    pub name: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRule {
    pub rule_type: String,
    #[serde(default)]
    pub config: Value,
    /// Appended after the current last rule when omitted.
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRule {
    pub rule_type: Option<String>,
    pub config: Option<Value>,
    pub sort_order: Option<i64>,
    pub active: Option<bool>,
}

fn default_active() -> bool {
    true
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, EngineError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

// Permission catalog

pub async fn list_permissions(
    db: &DatabaseConnection,
) -> Result<Vec<entities::permission::Model>, EngineError> {
    use entities::permission::{Column, Entity};

    Ok(Entity::find().order_by_asc(Column::Slug).all(db).await?)
}

// Role store

pub async fn create_role(
    db: &DatabaseConnection,
    organization_id: &str,
    input: NewRole,
) -> Result<RoleWithPermissions, EngineError> {
    use entities::role::{Column, Entity};

    let taken = Entity::find()
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(Column::Slug.eq(&input.slug))
        .count(db)
        .await?
        > 0;
    if taken {
        return Err(EngineError::Duplicate {
            entity: "role",
            value: input.slug,
        });
    }

    let role = entities::role::ActiveModel {
        id: Set(random_id()),
        name: Set(input.name),
        slug: Set(input.slug),
        organization_id: Set(organization_id.to_string()),
        description: Set(input.description),
        is_default: Set(i64::from(input.is_default)),
        created_at: Set(Utc::now().timestamp()),
    };
    let role = role.insert(db).await?;

    set_role_permissions(db, &role.id, &input.permissions).await?;
    Ok(RoleWithPermissions {
        role,
        permissions: input.permissions,
    })
}

pub async fn list_roles(
    db: &DatabaseConnection,
    organization_id: &str,
) -> Result<Vec<RoleWithPermissions>, EngineError> {
    use entities::role::{Column, Entity};

    let roles = Entity::find()
        .filter(Column::OrganizationId.eq(organization_id))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?;

    let ids: Vec<String> = roles.iter().map(|r| r.id.clone()).collect();
    let links = entities::role_permission::Entity::find()
        .filter(entities::role_permission::Column::RoleId.is_in(ids))
        .all(db)
        .await?;

    Ok(roles
        .into_iter()
        .map(|role| {
            let permissions = links
                .iter()
                .filter(|l| l.role_id == role.id)
                .map(|l| l.permission_slug.clone())
                .collect();
            RoleWithPermissions { role, permissions }
        })
        .collect())
}

pub async fn get_role(
    db: &DatabaseConnection,
    organization_id: &str,
    role_id: &str,
) -> Result<Option<RoleWithPermissions>, EngineError> {
    use entities::role::{Column, Entity};

    let Some(role) = Entity::find()
        .filter(Column::Id.eq(role_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .one(db)
        .await?
    else {
        return Ok(None);
    };

    let permissions = role_permission_slugs(db, role_id).await?;
    Ok(Some(RoleWithPermissions { role, permissions }))
}

pub async fn update_role(
    db: &DatabaseConnection,
    organization_id: &str,
    role_id: &str,
    input: UpdateRole,
) -> Result<RoleWithPermissions, EngineError> {
    use entities::role::{ActiveModel, Column, Entity};

    let existing = Entity::find()
        .filter(Column::Id.eq(role_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .one(db)
        .await?
        .ok_or(EngineError::NotFound("role"))?;

    // Slug uniqueness is re-checked against all other roles in the org
    if let Some(slug) = &input.slug {
        if slug != &existing.slug {
            let taken = Entity::find()
                .filter(Column::OrganizationId.eq(organization_id))
                .filter(Column::Slug.eq(slug))
                .filter(Column::Id.ne(role_id))
                .count(db)
                .await?
                > 0;
            if taken {
                return Err(EngineError::Duplicate {
                    entity: "role",
                    value: slug.clone(),
                });
            }
        }
    }

    let mut model: ActiveModel = existing.into();
    if let Some(name) = input.name {
        model.name = Set(name);
    }
    if let Some(slug) = input.slug {
        model.slug = Set(slug);
    }
    if let Some(description) = input.description {
        model.description = Set(Some(description));
    }
    if let Some(is_default) = input.is_default {
        model.is_default = Set(i64::from(is_default));
    }
    let role = model.update(db).await?;

    if let Some(permissions) = &input.permissions {
        set_role_permissions(db, role_id, permissions).await?;
    }
    let permissions = role_permission_slugs(db, role_id).await?;
    Ok(RoleWithPermissions { role, permissions })
}

/// Refused while any user still references the role: a referential guard,
/// not a cascade.
pub async fn delete_role(
    db: &DatabaseConnection,
    organization_id: &str,
    role_id: &str,
) -> Result<(), EngineError> {
    use entities::role::{Column, Entity};

    let role = Entity::find()
        .filter(Column::Id.eq(role_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .one(db)
        .await?
        .ok_or(EngineError::NotFound("role"))?;

    let user_count = entities::user_role::Entity::find()
        .filter(entities::user_role::Column::RoleId.eq(role_id))
        .count(db)
        .await?;
    if user_count > 0 {
        return Err(EngineError::RoleInUse {
            role_id: role_id.to_string(),
            user_count,
        });
    }

    entities::role_permission::Entity::delete_many()
        .filter(entities::role_permission::Column::RoleId.eq(role_id))
        .exec(db)
        .await?;
    Entity::delete_by_id(role.id).exec(db).await?;
    Ok(())
}

/// Replace a role's permission set wholesale.
async fn set_role_permissions(
    db: &DatabaseConnection,
    role_id: &str,
    slugs: &[String],
) -> Result<(), EngineError> {
    use entities::role_permission::{ActiveModel, Column, Entity};

    Entity::delete_many()
        .filter(Column::RoleId.eq(role_id))
        .exec(db)
        .await?;

    if slugs.is_empty() {
        return Ok(());
    }
    let rows = slugs.iter().map(|slug| ActiveModel {
        role_id: Set(role_id.to_string()),
        permission_slug: Set(slug.clone()),
    });
    Entity::insert_many(rows).exec(db).await?;
    Ok(())
}

async fn role_permission_slugs(
    db: &DatabaseConnection,
    role_id: &str,
) -> Result<Vec<String>, EngineError> {
    use entities::role_permission::{Column, Entity};

    let links = Entity::find()
        .filter(Column::RoleId.eq(role_id))
        .order_by_asc(Column::PermissionSlug)
        .all(db)
        .await?;
    Ok(links.into_iter().map(|l| l.permission_slug).collect())
}

pub async fn list_role_permissions(
    db: &DatabaseConnection,
) -> Result<Vec<entities::role_permission::Model>, EngineError> {
    Ok(entities::role_permission::Entity::find().all(db).await?)
}

/// Idempotent set-add: assigning an already-held role is a no-op.
pub async fn assign_role(
    db: &DatabaseConnection,
    role_id: &str,
    user_id: &str,
) -> Result<(), EngineError> {
    use entities::user_role::{ActiveModel, Column, Entity};
    use sea_orm::sea_query::OnConflict;

    let row = ActiveModel {
        user_id: Set(user_id.to_string()),
        role_id: Set(role_id.to_string()),
    };
    Entity::insert(row)
        .on_conflict(
            OnConflict::columns([Column::UserId, Column::RoleId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Idempotent set-remove: revoking an absent role is a no-op.
pub async fn revoke_role(
    db: &DatabaseConnection,
    role_id: &str,
    user_id: &str,
) -> Result<(), EngineError> {
    use entities::user_role::{Column, Entity};

    Entity::delete_many()
        .filter(Column::UserId.eq(user_id))
        .filter(Column::RoleId.eq(role_id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn list_user_roles(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<String>, EngineError> {
    use entities::user_role::{Column, Entity};

    let rows = Entity::find()
        .filter(Column::UserId.eq(user_id))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|r| r.role_id).collect())
}

// Dynamic policies

pub async fn create_policy(
    db: &DatabaseConnection,
    organization_id: &str,
    input: NewPolicy,
) -> Result<entities::dynamic_policy::Model, EngineError> {
    use entities::dynamic_policy::{ActiveModel, Column, Entity};

    let taken = Entity::find()
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(Column::Key.eq(&input.key))
        .count(db)
        .await?
        > 0;
    if taken {
        return Err(EngineError::Duplicate {
            entity: "policy",
            value: input.key,
        });
    }

    let policy = ActiveModel {
        id: Set(random_id()),
        key: Set(input.key),
        name: Set(input.name),
        active: Set(i64::from(input.active)),
        organization_id: Set(organization_id.to_string()),
        created_at: Set(Utc::now().timestamp()),
    };
    Ok(policy.insert(db).await?)
}

pub async fn list_policies(
    db: &DatabaseConnection,
    organization_id: &str,
) -> Result<Vec<entities::dynamic_policy::Model>, EngineError> {
    use entities::dynamic_policy::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::OrganizationId.eq(organization_id))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?)
}

pub async fn get_policy(
    db: &DatabaseConnection,
    organization_id: &str,
    policy_id: &str,
) -> Result<Option<entities::dynamic_policy::Model>, EngineError> {
    use entities::dynamic_policy::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Id.eq(policy_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .one(db)
        .await?)
}

pub async fn update_policy(
    db: &DatabaseConnection,
    organization_id: &str,
    policy_id: &str,
    input: UpdatePolicy,
) -> Result<entities::dynamic_policy::Model, EngineError> {
    use entities::dynamic_policy::{ActiveModel, Column, Entity};

    let existing = get_policy(db, organization_id, policy_id)
        .await?
        .ok_or(EngineError::NotFound("policy"))?;

    if let Some(key) = &input.key {
        if key != &existing.key {
            let taken = Entity::find()
                .filter(Column::OrganizationId.eq(organization_id))
                .filter(Column::Key.eq(key))
                .filter(Column::Id.ne(policy_id))
                .count(db)
                .await?
                > 0;
            if taken {
                return Err(EngineError::Duplicate {
                    entity: "policy",
                    value: key.clone(),
                });
            }
        }
    }

    let mut model: ActiveModel = existing.into();
    if let Some(key) = input.key {
        model.key = Set(key);
    }
    if let Some(name) = input.name {
        model.name = Set(name);
    }
    if let Some(active) = input.active {
        model.active = Set(i64::from(active));
    }
    Ok(model.update(db).await?)
}

/// Deletes the policy and all of its rules.
pub async fn delete_policy(
    db: &DatabaseConnection,
    organization_id: &str,
    policy_id: &str,
) -> Result<(), EngineError> {
    use entities::dynamic_policy::Entity;

    let policy = get_policy(db, organization_id, policy_id)
        .await?
        .ok_or(EngineError::NotFound("policy"))?;

    entities::policy_rule::Entity::delete_many()
        .filter(entities::policy_rule::Column::PolicyId.eq(policy_id))
        .exec(db)
        .await?;
    Entity::delete_by_id(policy.id).exec(db).await?;
    Ok(())
}

pub async fn list_policy_rules(
    db: &DatabaseConnection,
    policy_id: &str,
) -> Result<Vec<entities::policy_rule::Model>, EngineError> {
    use entities::policy_rule::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::PolicyId.eq(policy_id))
        .order_by_asc(Column::SortOrder)
        .all(db)
        .await?)
}

pub async fn get_policy_rule(
    db: &DatabaseConnection,
    policy_id: &str,
    rule_id: &str,
) -> Result<Option<entities::policy_rule::Model>, EngineError> {
    use entities::policy_rule::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Id.eq(rule_id))
        .filter(Column::PolicyId.eq(policy_id))
        .one(db)
        .await?)
}

pub async fn insert_policy_rule(
    db: &DatabaseConnection,
    policy_id: &str,
    input: NewRule,
) -> Result<entities::policy_rule::Model, EngineError> {
    use entities::policy_rule::ActiveModel;

    let sort_order = match input.sort_order {
        Some(order) => order,
        None => list_policy_rules(db, policy_id)
            .await?
            .last()
            .map(|r| r.sort_order + 1)
            .unwrap_or(0),
    };

    let rule = ActiveModel {
        id: Set(random_id()),
        policy_id: Set(policy_id.to_string()),
        rule_type: Set(input.rule_type),
        config: Set(input.config.to_string()),
        sort_order: Set(sort_order),
        active: Set(i64::from(input.active)),
    };
    Ok(rule.insert(db).await?)
}

pub async fn update_policy_rule(
    db: &DatabaseConnection,
    existing: entities::policy_rule::Model,
    rule_type: String,
    config: Value,
    input: UpdateRule,
) -> Result<entities::policy_rule::Model, EngineError> {
    use entities::policy_rule::ActiveModel;

    let mut model: ActiveModel = existing.into();
    model.rule_type = Set(rule_type);
    model.config = Set(config.to_string());
    if let Some(sort_order) = input.sort_order {
        model.sort_order = Set(sort_order);
    }
    if let Some(active) = input.active {
        model.active = Set(i64::from(active));
    }
    Ok(model.update(db).await?)
}

pub async fn delete_policy_rule(
    db: &DatabaseConnection,
    policy_id: &str,
    rule_id: &str,
) -> Result<(), EngineError> {
    use entities::policy_rule::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::Id.eq(rule_id))
        .filter(Column::PolicyId.eq(policy_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(EngineError::NotFound("rule"));
    }
    Ok(())
}

/// All active policies with their rule rows, for a full registry rebuild.
/// Rule ordering and active filtering happen in the registry's compile step.
pub async fn load_active_policies(
    db: &DatabaseConnection,
) -> Result<
    Vec<(
        entities::dynamic_policy::Model,
        Vec<entities::policy_rule::Model>,
    )>,
    EngineError,
> {
    use entities::dynamic_policy::{Column, Entity};

    let policies = Entity::find().filter(Column::Active.ne(0)).all(db).await?;
    let ids: Vec<String> = policies.iter().map(|p| p.id.clone()).collect();
    let rules = entities::policy_rule::Entity::find()
        .filter(entities::policy_rule::Column::PolicyId.is_in(ids))
        .all(db)
        .await?;

    Ok(policies
        .into_iter()
        .map(|policy| {
            let own: Vec<_> = rules
                .iter()
                .filter(|r| r.policy_id == policy.id)
                .cloned()
                .collect();
            (policy, own)
        })
        .collect())
}
