//! HTTP surface: the decision endpoint plus the organization-scoped admin
//! API. Handlers stay thin; semantics live in the engine and storage layers.
//! Admin callers are trusted (authentication is a collaborator concern) and
//! carry their organization scope as a query parameter.

use crate::engine::admin::{PolicyAdmin, PolicyView, RoleAdmin, RuleView, TestRequest};
use crate::engine::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::engine::registry::ChainTrace;
use crate::engine::rules::{rule_type_catalog, RuleTypeDescriptor};
use crate::engine::types::{DecisionRequest, DecisionResponse};
use crate::engine::{DecisionEngine, EngineError};
use crate::errors::PalisadeError;
use crate::settings::Settings;
use crate::storage::{
    self, NewPolicy, NewRole, NewRule, RoleWithPermissions, UpdatePolicy, UpdateRole, UpdateRule,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub engine: Arc<DecisionEngine>,
    pub audit: Arc<dyn AuditSink>,
}

/// Organization scope for admin calls, e.g. `?organization_id=org1`.
#[derive(Debug, Deserialize)]
struct OrgScope {
    organization_id: String,
}

pub async fn serve(
    settings: Settings,
    db: DatabaseConnection,
    engine: DecisionEngine,
) -> Result<(), PalisadeError> {
    let state = AppState {
        settings: Arc::new(settings),
        db,
        engine: Arc::new(engine),
        audit: Arc::new(TracingAuditSink),
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/decisions", post(decide))
        .route("/v1/permissions", get(list_permissions))
        .route("/v1/roles", get(list_roles).post(create_role))
        .route(
            "/v1/roles/{id}",
            axum::routing::put(update_role).delete(delete_role),
        )
        .route(
            "/v1/roles/{id}/assignments/{user_id}",
            axum::routing::put(assign_role).delete(revoke_role),
        )
        .route("/v1/policies", get(list_policies).post(create_policy))
        .route(
            "/v1/policies/{id}",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route("/v1/policies/{id}/rules", post(add_rule))
        .route(
            "/v1/policies/{id}/rules/{rule_id}",
            axum::routing::put(update_rule).delete(delete_rule),
        )
        .route("/v1/rule-types", get(rule_types))
        .route("/v1/policies/{id}/test", post(test_policy))
        .with_state(state.clone());

    let addr: SocketAddr = state
        .settings
        .listen_addr()
        .parse()
        .map_err(|e| PalisadeError::Other(format!("bad listen addr: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Decision API listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// Decision API

async fn decide(
    State(state): State<AppState>,
    Json(req): Json<DecisionRequest>,
) -> Json<DecisionResponse> {
    let allowed = state.engine.decide(
        &req.principal,
        &req.resource,
        &req.action,
        req.instance.as_ref(),
        &req.context,
    );
    // The verdict is already fixed; the sink only observes it
    state.audit.record(&AuditEvent {
        principal_id: &req.principal.id,
        resource: &req.resource,
        action: &req.action,
        allowed,
        metadata: json!({
            "organization_id": req.principal.organization_id,
            "has_instance": req.instance.is_some(),
        }),
    });
    Json(DecisionResponse { allowed })
}

// Permissions

async fn list_permissions(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, EngineError> {
    let permissions = storage::list_permissions(&state.db).await?;
    Ok(Json(permissions))
}

// Roles

async fn create_role(
    State(state): State<AppState>,
    Query(scope): Query<OrgScope>,
    Json(req): Json<NewRole>,
) -> Result<(StatusCode, Json<RoleWithPermissions>), EngineError> {
    let role = RoleAdmin::new(&state.db, state.engine.rbac())
        .create(&scope.organization_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

async fn list_roles(
    State(state): State<AppState>,
    Query(scope): Query<OrgScope>,
) -> Result<Json<Vec<RoleWithPermissions>>, EngineError> {
    let roles = storage::list_roles(&state.db, &scope.organization_id).await?;
    Ok(Json(roles))
}

async fn update_role(
    State(state): State<AppState>,
    Path(role_id): Path<String>,
    Query(scope): Query<OrgScope>,
    Json(req): Json<UpdateRole>,
) -> Result<Json<RoleWithPermissions>, EngineError> {
    let role = RoleAdmin::new(&state.db, state.engine.rbac())
        .update(&scope.organization_id, &role_id, req)
        .await?;
    Ok(Json(role))
}

async fn delete_role(
    State(state): State<AppState>,
    Path(role_id): Path<String>,
    Query(scope): Query<OrgScope>,
) -> Result<StatusCode, EngineError> {
    RoleAdmin::new(&state.db, state.engine.rbac())
        .delete(&scope.organization_id, &role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_role(
    State(state): State<AppState>,
    Path((role_id, user_id)): Path<(String, String)>,
    Query(scope): Query<OrgScope>,
) -> Result<StatusCode, EngineError> {
    RoleAdmin::new(&state.db, state.engine.rbac())
        .assign(&scope.organization_id, &role_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_role(
    State(state): State<AppState>,
    Path((role_id, user_id)): Path<(String, String)>,
    Query(scope): Query<OrgScope>,
) -> Result<StatusCode, EngineError> {
    RoleAdmin::new(&state.db, state.engine.rbac())
        .revoke(&scope.organization_id, &role_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Dynamic policies

async fn create_policy(
    State(state): State<AppState>,
    Query(scope): Query<OrgScope>,
    Json(req): Json<NewPolicy>,
) -> Result<impl IntoResponse, EngineError> {
    let policy = PolicyAdmin::new(&state.db, state.engine.registry())
        .create_policy(&scope.organization_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn list_policies(
    State(state): State<AppState>,
    Query(scope): Query<OrgScope>,
) -> Result<impl IntoResponse, EngineError> {
    let policies = PolicyAdmin::new(&state.db, state.engine.registry())
        .list_policies(&scope.organization_id)
        .await?;
    Ok(Json(policies))
}

async fn get_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
    Query(scope): Query<OrgScope>,
) -> Result<Json<PolicyView>, EngineError> {
    let view = PolicyAdmin::new(&state.db, state.engine.registry())
        .get_policy(&scope.organization_id, &policy_id)
        .await?;
    Ok(Json(view))
}

async fn update_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
    Query(scope): Query<OrgScope>,
    Json(req): Json<UpdatePolicy>,
) -> Result<impl IntoResponse, EngineError> {
    let policy = PolicyAdmin::new(&state.db, state.engine.registry())
        .update_policy(&scope.organization_id, &policy_id, req)
        .await?;
    Ok(Json(policy))
}

async fn delete_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
    Query(scope): Query<OrgScope>,
) -> Result<StatusCode, EngineError> {
    PolicyAdmin::new(&state.db, state.engine.registry())
        .delete_policy(&scope.organization_id, &policy_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_rule(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
    Query(scope): Query<OrgScope>,
    Json(req): Json<NewRule>,
) -> Result<(StatusCode, Json<RuleView>), EngineError> {
    let rule = PolicyAdmin::new(&state.db, state.engine.registry())
        .add_rule(&scope.organization_id, &policy_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<AppState>,
    Path((policy_id, rule_id)): Path<(String, String)>,
    Query(scope): Query<OrgScope>,
    Json(req): Json<UpdateRule>,
) -> Result<Json<RuleView>, EngineError> {
    let rule = PolicyAdmin::new(&state.db, state.engine.registry())
        .update_rule(&scope.organization_id, &policy_id, &rule_id, req)
        .await?;
    Ok(Json(rule))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path((policy_id, rule_id)): Path<(String, String)>,
    Query(scope): Query<OrgScope>,
) -> Result<StatusCode, EngineError> {
    PolicyAdmin::new(&state.db, state.engine.registry())
        .delete_rule(&scope.organization_id, &policy_id, &rule_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Rule-type catalog and policy test bench

async fn rule_types() -> Json<Vec<RuleTypeDescriptor>> {
    Json(rule_type_catalog())
}

async fn test_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
    Query(scope): Query<OrgScope>,
    Json(req): Json<TestRequest>,
) -> Result<Json<ChainTrace>, EngineError> {
    let trace = PolicyAdmin::new(&state.db, state.engine.registry())
        .test_policy(&scope.organization_id, &policy_id, &req)
        .await?;
    Ok(Json(trace))
}
