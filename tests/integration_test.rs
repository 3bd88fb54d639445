//! Full-stack tests: persisted roles and policies, warmed engine snapshots,
//! and decisions running through the same paths the service wires together.

mod helpers;

use helpers::{PolicyBuilder, RoleBuilder, TestDb};
use migration::MigratorTrait;
use palisade::engine::admin::{PolicyAdmin, RoleAdmin, TestRequest};
use palisade::engine::types::{Principal, SystemRole};
use palisade::engine::{DecisionEngine, EngineError};
use palisade::storage::{self, NewPolicy, NewRule, UpdatePolicy};
use sea_orm::DatabaseConnection;
use serde_json::json;

async fn warm_engine(db: &DatabaseConnection) -> DecisionEngine {
    let engine = DecisionEngine::new();
    engine.warm(db).await.expect("Failed to warm engine");
    engine
}

fn user(id: &str, org: &str, roles: Vec<String>) -> Principal {
    Principal {
        id: id.to_string(),
        role: SystemRole::User,
        organization_id: Some(org.to_string()),
        roles,
    }
}

#[tokio::test]
async fn test_permission_seed_is_idempotent() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let permissions = storage::list_permissions(db).await.unwrap();
    // 5 resources x 6 actions, manage wildcard included
    assert_eq!(permissions.len(), 30);
    for resource in ["customer", "deal", "task", "product", "report"] {
        assert!(permissions.iter().any(|p| p.slug == format!("{resource}:manage")));
    }

    // Re-running migrations leaves the catalog untouched
    migration::Migrator::up(db, None).await.unwrap();
    assert_eq!(storage::list_permissions(db).await.unwrap().len(), 30);
}

#[tokio::test]
async fn test_decision_through_static_chains() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let role = RoleBuilder::new("sales")
        .granting(&["customer:read", "customer:delete"])
        .create(db)
        .await;
    let engine = warm_engine(db).await;

    let principal = user("u9", "org1", vec![role.role.id.clone()]);
    let instance = json!({ "organization_id": "org1", "assigned_to": "u9" });

    // RBAC grants read and the static same-org + role-membership chain passes
    assert!(engine.decide(&principal, "customer", "read", Some(&instance), &json!({})));

    // RBAC grants delete, but the static chain wants role_membership(admin)
    assert!(!engine.decide(&principal, "customer", "delete", Some(&instance), &json!({})));

    // Another organization's instance is out of reach entirely
    let foreign = json!({ "organization_id": "org2", "assigned_to": "u9" });
    assert!(!engine.decide(&principal, "customer", "read", Some(&foreign), &json!({})));
}

#[tokio::test]
async fn test_pure_rbac_decision_and_manage_wildcard() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let creator = RoleBuilder::new("creator")
        .granting(&["customer:create"])
        .create(db)
        .await;
    let manager = RoleBuilder::new("manager")
        .granting(&["deal:manage"])
        .create(db)
        .await;
    let engine = warm_engine(db).await;

    let principal = user("u1", "org1", vec![creator.role.id.clone()]);
    assert!(engine.decide(&principal, "customer", "create", None, &json!({})));
    assert!(!engine.decide(&principal, "deal", "create", None, &json!({})));

    let principal = user("u2", "org1", vec![manager.role.id.clone()]);
    for action in ["create", "read", "update", "delete", "export"] {
        assert!(engine.decide(&principal, "deal", action, None, &json!({})));
    }
}

#[tokio::test]
async fn test_admin_bypass() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = warm_engine(db).await;

    for role in [SystemRole::Admin, SystemRole::Superadmin] {
        let principal = Principal {
            id: "root".to_string(),
            role,
            organization_id: None,
            roles: vec![],
        };
        let instance = json!({ "organization_id": "somewhere-else" });
        assert!(engine.decide(&principal, "customer", "delete", Some(&instance), &json!({})));
        assert!(engine.decide(&principal, "unknown_resource", "purge", None, &json!({})));
    }
}

#[tokio::test]
async fn test_dynamic_policy_lifecycle_fail_closed() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let role = RoleBuilder::new("exporter")
        .granting(&["customer:export"])
        .create(db)
        .await;
    let engine = warm_engine(db).await;
    let admin = PolicyAdmin::new(db, engine.registry());

    let principal = user("u9", "org1", vec![role.role.id.clone()]);
    let instance = json!({ "organization_id": "org1" });

    // No chain registered for customer:export -> deny despite the RBAC grant
    assert!(!engine.decide(&principal, "customer", "export", Some(&instance), &json!({})));

    let policy = admin
        .create_policy(
            "org1",
            NewPolicy {
                key: "customer:export".to_string(),
                name: "Customer export".to_string(),
                active: true,
            },
        )
        .await
        .unwrap();
    admin
        .add_rule(
            "org1",
            &policy.id,
            NewRule {
                rule_type: "same_organization".to_string(),
                config: json!({}),
                sort_order: None,
                active: true,
            },
        )
        .await
        .unwrap();

    // The mutation published the new chain; the next decision sees it
    assert!(engine.decide(&principal, "customer", "export", Some(&instance), &json!({})));

    // Deactivating the policy pulls the chain and the key fails closed again
    admin
        .update_policy(
            "org1",
            &policy.id,
            UpdatePolicy {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!engine.decide(&principal, "customer", "export", Some(&instance), &json!({})));
}

#[tokio::test]
async fn test_dynamic_chain_overrides_static_per_org() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let role_org1 = RoleBuilder::new("editor")
        .granting(&["customer:update"])
        .create(db)
        .await;
    let role_org2 = RoleBuilder::new("editor")
        .in_org("org2")
        .granting(&["customer:update"])
        .create(db)
        .await;
    // org1 relaxes customer:update from ownership to same-organization
    PolicyBuilder::new("customer:update")
        .with_rule("same_organization", json!({}))
        .create(db)
        .await;
    let engine = warm_engine(db).await;

    let instance_org1 = json!({ "organization_id": "org1", "assigned_to": "someone-else" });
    let principal = user("u9", "org1", vec![role_org1.role.id.clone()]);
    assert!(engine.decide(&principal, "customer", "update", Some(&instance_org1), &json!({})));

    // org2 has no dynamic chain and falls back to the static ownership rule
    let instance_org2 = json!({ "organization_id": "org2", "assigned_to": "someone-else" });
    let principal = user("u9", "org2", vec![role_org2.role.id.clone()]);
    assert!(!engine.decide(&principal, "customer", "update", Some(&instance_org2), &json!({})));
}

#[tokio::test]
async fn test_scripted_rule_reads_context() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let role = RoleBuilder::new("reporter")
        .granting(&["report:export"])
        .create(db)
        .await;
    PolicyBuilder::new("report:export")
        .with_rule("same_organization", json!({}))
        .with_rule(
            "scripted",
            json!({ "code": "context.channel == \"web\" && resource.rows <= 10000" }),
        )
        .create(db)
        .await;
    let engine = warm_engine(db).await;

    let principal = user("u9", "org1", vec![role.role.id.clone()]);
    let instance = json!({ "organization_id": "org1", "rows": 500 });

    let ctx = json!({ "channel": "web" });
    assert!(engine.decide(&principal, "report", "export", Some(&instance), &ctx));

    let ctx = json!({ "channel": "batch" });
    assert!(!engine.decide(&principal, "report", "export", Some(&instance), &ctx));

    // A missing context key resolves to null and the comparison fails: deny
    assert!(!engine.decide(&principal, "report", "export", Some(&instance), &json!({})));
}

#[tokio::test]
async fn test_inactive_policy_not_materialized() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let role = RoleBuilder::new("member")
        .named("Org member")
        .is_default()
        .granting(&["customer:export"])
        .create(db)
        .await;
    PolicyBuilder::new("customer:export")
        .named("Draft export policy")
        .inactive()
        .with_rule("same_organization", json!({}))
        .create(db)
        .await;
    let engine = warm_engine(db).await;

    // An inactive policy contributes no chain; the key stays fail-closed
    assert!(engine.registry().dynamic_chain("org1", "customer:export").is_none());
    let principal = user("u9", "org1", vec![role.role.id.clone()]);
    let instance = json!({ "organization_id": "org1" });
    assert!(!engine.decide(&principal, "customer", "export", Some(&instance), &json!({})));
}

#[tokio::test]
async fn test_inactive_rules_skipped_in_live_chain() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let role = RoleBuilder::new("viewer")
        .granting(&["task:export"])
        .create(db)
        .await;
    PolicyBuilder::new("task:export")
        .with_rule("same_organization", json!({}))
        .with_inactive_rule("role_membership", json!({ "roles": ["admin"] }))
        .create(db)
        .await;
    let engine = warm_engine(db).await;

    // The inactive admin-only rule does not participate
    let principal = user("u9", "org1", vec![role.role.id.clone()]);
    let instance = json!({ "organization_id": "org1" });
    assert!(engine.decide(&principal, "task", "export", Some(&instance), &json!({})));
}

#[tokio::test]
async fn test_invalid_persisted_rule_fails_rebuild_and_keeps_old_table() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    PolicyBuilder::new("deal:export")
        .with_rule("same_organization", json!({}))
        .create(db)
        .await;
    let engine = warm_engine(db).await;
    assert!(engine.registry().dynamic_chain("org1", "deal:export").is_some());

    // A corrupted row written around the admin layer's validation
    let broken = PolicyBuilder::new("deal:archive").create(db).await;
    storage::insert_policy_rule(
        db,
        &broken.id,
        NewRule {
            rule_type: "scripted".to_string(),
            config: json!({ "code": "user.id ==" }),
            sort_order: None,
            active: true,
        },
    )
    .await
    .unwrap();

    let err = engine.registry().reload(db).await.unwrap_err();
    match err {
        EngineError::PolicyRebuild { policy, .. } => {
            assert_eq!(policy, "org1/deal:archive");
        }
        other => panic!("expected PolicyRebuild, got {other:?}"),
    }
    // The rebuild failed as a whole; the previous table is still live
    assert!(engine.registry().dynamic_chain("org1", "deal:export").is_some());
}

#[tokio::test]
async fn test_role_lifecycle_with_referential_guard() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let engine = warm_engine(db).await;
    let admin = RoleAdmin::new(db, engine.rbac());

    let role = admin
        .create(
            "org1",
            palisade::storage::NewRole {
                name: "Sales".to_string(),
                slug: "sales".to_string(),
                description: Some("Handles customer accounts".to_string()),
                is_default: false,
                permissions: vec!["customer:read".to_string()],
            },
        )
        .await
        .unwrap();

    admin.assign("org1", &role.role.id, "u1").await.unwrap();
    // Repeat assignment is a no-op
    admin.assign("org1", &role.role.id, "u1").await.unwrap();
    assert_eq!(storage::list_user_roles(db, "u1").await.unwrap().len(), 1);

    let err = admin.delete("org1", &role.role.id).await.unwrap_err();
    assert!(matches!(err, EngineError::RoleInUse { .. }));

    admin.revoke("org1", &role.role.id, "u1").await.unwrap();
    admin.delete("org1", &role.role.id).await.unwrap();

    // The snapshot no longer grants anything for the deleted role
    assert!(!engine
        .rbac()
        .snapshot()
        .role_grants(&[role.role.id.clone()], "customer", "read"));
}

#[tokio::test]
async fn test_policy_test_endpoint_agrees_with_decide() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let role = RoleBuilder::new("closer")
        .granting(&["deal:update"])
        .create(db)
        .await;
    let policy = PolicyBuilder::new("deal:update")
        .with_rule("same_organization", json!({}))
        .with_rule("ownership", json!({}))
        .create(db)
        .await;
    let engine = warm_engine(db).await;
    let admin = PolicyAdmin::new(db, engine.registry());

    let principal = user("u9", "org1", vec![role.role.id.clone()]);
    for instance in [
        json!({ "organization_id": "org1", "assigned_to": "u9" }),
        json!({ "organization_id": "org1", "assigned_to": "u2" }),
        json!({ "organization_id": "org2", "assigned_to": "u9" }),
    ] {
        let decided = engine.decide(&principal, "deal", "update", Some(&instance), &json!({}));
        let trace = admin
            .test_policy(
                "org1",
                &policy.id,
                &TestRequest {
                    principal: principal.clone(),
                    instance: instance.clone(),
                    context: json!({}),
                },
            )
            .await
            .unwrap();
        assert_eq!(trace.allowed, decided);
    }
}

#[tokio::test]
async fn test_cross_org_admin_access_is_not_found() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let policy = PolicyBuilder::new("customer:read").create(db).await;
    // The same key in another organization is a separate record
    let foreign = PolicyBuilder::new("customer:read").in_org("org2").create(db).await;
    let engine = warm_engine(db).await;
    let admin = PolicyAdmin::new(db, engine.registry());

    let err = admin.get_policy("org2", &policy.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(admin.get_policy("org2", &foreign.id).await.is_ok());

    let err = admin.delete_policy("org2", &policy.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    // The policy survived the foreign delete attempt
    assert!(admin.get_policy("org1", &policy.id).await.is_ok());
}
