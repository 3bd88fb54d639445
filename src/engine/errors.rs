use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("Unknown rule type `{0}`")]
    #[diagnostic(
        code(palisade::engine::unknown_rule_type),
        help("Known types: ownership, same_organization, role_membership, field_comparison, scripted")
    )]
    UnknownRuleType(String),

    #[error("Invalid config for rule type `{rule_type}`: {message}")]
    #[diagnostic(code(palisade::engine::invalid_rule_config))]
    InvalidRuleConfig {
        rule_type: &'static str,
        message: String,
    },

    #[error("Invalid script: {0}")]
    #[diagnostic(
        code(palisade::engine::invalid_script),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths use dot notation rooted at user, resource, action, or context")
    )]
    InvalidScript(String),

    #[error("Script evaluation failed: {0}")]
    #[diagnostic(code(palisade::engine::script_runtime))]
    ScriptRuntime(String),

    #[error("Invalid slug `{0}`")]
    #[diagnostic(
        code(palisade::engine::invalid_slug),
        help("Slugs are lowercase: letters, digits, and underscores only")
    )]
    InvalidSlug(String),

    #[error("Invalid policy key `{0}`")]
    #[diagnostic(
        code(palisade::engine::invalid_policy_key),
        help("Policy keys look like `resource:action`, e.g. `customer:read`")
    )]
    InvalidPolicyKey(String),

    #[error("{entity} `{value}` already exists in this organization")]
    #[diagnostic(code(palisade::engine::duplicate))]
    Duplicate {
        entity: &'static str,
        value: String,
    },

    #[error("Role `{role_id}` is still assigned to {user_count} user(s)")]
    #[diagnostic(
        code(palisade::engine::role_in_use),
        help("Revoke the role from all users before deleting it")
    )]
    RoleInUse { role_id: String, user_count: u64 },

    #[error("Unknown permission `{0}`")]
    #[diagnostic(code(palisade::engine::unknown_permission))]
    UnknownPermission(String),

    #[error("{0} not found")]
    #[diagnostic(code(palisade::engine::not_found))]
    NotFound(&'static str),

    #[error("Policy `{policy}` has an invalid rule: {source}")]
    #[diagnostic(code(palisade::engine::policy_rebuild))]
    PolicyRebuild {
        policy: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Database error: {0}")]
    #[diagnostic(code(palisade::engine::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(palisade::engine::serde))]
    Serde(#[from] serde_json::Error),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::UnknownRuleType(_)
            | EngineError::InvalidRuleConfig { .. }
            | EngineError::InvalidScript(_)
            | EngineError::InvalidSlug(_)
            | EngineError::InvalidPolicyKey(_)
            | EngineError::UnknownPermission(_) => StatusCode::BAD_REQUEST,
            EngineError::Duplicate { .. } | EngineError::RoleInUse { .. } => StatusCode::CONFLICT,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
