use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `manage` action grants every other action on its resource.
pub const MANAGE_ACTION: &str = "manage";

/// System-wide account level, assigned by the authentication layer.
/// `admin` and `superadmin` bypass RBAC entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemRole {
    User,
    Admin,
    Superadmin,
}

impl SystemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemRole::User => "user",
            SystemRole::Admin => "admin",
            SystemRole::Superadmin => "superadmin",
        }
    }

    pub fn bypasses_rbac(&self) -> bool {
        matches!(self, SystemRole::Admin | SystemRole::Superadmin)
    }
}

/// The authenticated caller a decision is requested for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: SystemRole,
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Ids of organization roles granted to this principal.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Everything a rule may look at, assembled once per decision.
/// Rules are pure predicates over this.
#[derive(Debug)]
pub struct EvaluationInput<'a> {
    pub principal: &'a Principal,
    /// Principal serialized to JSON, for path-based rules (`user.` prefix).
    pub principal_json: Value,
    pub instance: &'a Value,
    pub action: &'a str,
    pub context: &'a Value,
}

impl<'a> EvaluationInput<'a> {
    pub fn new(
        principal: &'a Principal,
        instance: &'a Value,
        action: &'a str,
        context: &'a Value,
    ) -> Self {
        let principal_json = serde_json::to_value(principal).unwrap_or(Value::Null);
        Self {
            principal,
            principal_json,
            instance,
            action,
            context,
        }
    }

    /// Scope object handed to scripted predicates.
    pub fn script_scope(&self) -> Value {
        serde_json::json!({
            "user": self.principal_json,
            "resource": self.instance,
            "action": self.action,
            "context": self.context,
        })
    }
}

/// Join key between RBAC's permission space and ABAC's rule chains.
pub fn policy_key(resource: &str, action: &str) -> String {
    format!("{resource}:{action}")
}

/// `^[a-z0-9_]+$`
pub fn is_valid_slug(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_'))
}

/// `^[a-z0-9_]+:[a-z0-9_]+$`
pub fn is_valid_policy_key(s: &str) -> bool {
    match s.split_once(':') {
        Some((resource, action)) => is_valid_slug(resource) && is_valid_slug(action),
        None => false,
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub principal: Principal,
    /// Resource type, e.g. "customer"
    pub resource: String,
    /// Action, e.g. "read"
    pub action: String,
    /// Concrete resource instance, already loaded by the caller.
    /// Absent means a pure-RBAC decision (e.g. "can create any X").
    #[serde(default)]
    pub instance: Option<Value>,
    /// Request context for ABAC evaluation.
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_validation() {
        assert!(is_valid_slug("sales_rep"));
        assert!(is_valid_slug("tier2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Sales"));
        assert!(!is_valid_slug("sales-rep"));
        assert!(!is_valid_slug("sales rep"));
    }

    #[test]
    fn test_policy_key_validation() {
        assert!(is_valid_policy_key("customer:read"));
        assert!(is_valid_policy_key("deal_item:bulk_update"));
        assert!(!is_valid_policy_key("customer"));
        assert!(!is_valid_policy_key("customer:"));
        assert!(!is_valid_policy_key(":read"));
        assert!(!is_valid_policy_key("customer:read:extra"));
        assert!(!is_valid_policy_key("Customer:read"));
    }

    #[test]
    fn test_system_role_serde() {
        let p: Principal = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "role": "superadmin"
        }))
        .unwrap();
        assert_eq!(p.role, SystemRole::Superadmin);
        assert!(p.roles.is_empty());
        assert!(p.organization_id.is_none());

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["role"], "superadmin");
    }

    #[test]
    fn test_script_scope_shape() {
        let principal = Principal {
            id: "u1".into(),
            role: SystemRole::User,
            organization_id: Some("org1".into()),
            roles: vec![],
        };
        let instance = serde_json::json!({ "organization_id": "org1" });
        let context = serde_json::json!({ "ip": "10.0.0.1" });
        let input = EvaluationInput::new(&principal, &instance, "read", &context);
        let scope = input.script_scope();
        assert_eq!(scope["user"]["id"], "u1");
        assert_eq!(scope["resource"]["organization_id"], "org1");
        assert_eq!(scope["action"], "read");
        assert_eq!(scope["context"]["ip"], "10.0.0.1");
    }
}
