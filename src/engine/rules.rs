//! Built-in ABAC rule types and the factory that builds them from persisted
//! `(type, config)` pairs.
//!
//! Each variant owns its config validation (construction time) and its
//! evaluation logic, so the hot path never re-checks config shape and adding
//! a rule type touches exactly one place.

use serde::Serialize;
use serde_json::{json, Value};

use crate::engine::errors::EngineError;
use crate::engine::script::Script;
use crate::engine::types::EvaluationInput;

/// A compiled, immutable predicate over (principal, instance, action,
/// context). Pure and side-effect-free; errors are reported, never panicked.
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Instance is assigned to the principal.
    Ownership,
    /// Instance belongs to the principal's organization.
    SameOrganization,
    /// Principal's system role is one of a configured set.
    RoleMembership { roles: Vec<String> },
    /// A field of the instance (or principal) compared against a constant.
    FieldComparison {
        field: String,
        operator: Operator,
        value: Value,
    },
    /// A sandboxed boolean expression, compiled once at construction.
    Scripted { script: Script },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::NotIn => "not_in",
        }
    }
}

impl RuleKind {
    /// Factory entry point: validate `config` against `rule_type` and build
    /// the predicate. All shape errors surface here, never at evaluation.
    pub fn build(rule_type: &str, config: &Value) -> Result<Self, EngineError> {
        match rule_type {
            "ownership" => Ok(RuleKind::Ownership),
            "same_organization" => Ok(RuleKind::SameOrganization),
            "role_membership" => {
                let roles = config
                    .get("roles")
                    .and_then(Value::as_array)
                    .ok_or_else(|| EngineError::InvalidRuleConfig {
                        rule_type: "role_membership",
                        message: "`roles` must be an array of strings".into(),
                    })?;
                let roles: Vec<String> = roles
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            EngineError::InvalidRuleConfig {
                                rule_type: "role_membership",
                                message: format!("`roles` entry {v} is not a string"),
                            }
                        })
                    })
                    .collect::<Result<_, _>>()?;
                if roles.is_empty() {
                    return Err(EngineError::InvalidRuleConfig {
                        rule_type: "role_membership",
                        message: "`roles` must not be empty".into(),
                    });
                }
                Ok(RuleKind::RoleMembership { roles })
            }
            "field_comparison" => {
                let field = config
                    .get("field")
                    .and_then(Value::as_str)
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| EngineError::InvalidRuleConfig {
                        rule_type: "field_comparison",
                        message: "`field` must be a non-empty string".into(),
                    })?;
                let operator = config
                    .get("operator")
                    .and_then(Value::as_str)
                    .and_then(Operator::parse)
                    .ok_or_else(|| EngineError::InvalidRuleConfig {
                        rule_type: "field_comparison",
                        message: "`operator` must be one of equals, not_equals, greater_than, \
                                  less_than, contains, not_contains, starts_with, ends_with, \
                                  in, not_in"
                            .into(),
                    })?;
                let value = config
                    .get("value")
                    .ok_or_else(|| EngineError::InvalidRuleConfig {
                        rule_type: "field_comparison",
                        message: "`value` is required".into(),
                    })?
                    .clone();
                Ok(RuleKind::FieldComparison {
                    field: field.to_string(),
                    operator,
                    value,
                })
            }
            "scripted" => {
                let code = config
                    .get("code")
                    .and_then(Value::as_str)
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| EngineError::InvalidRuleConfig {
                        rule_type: "scripted",
                        message: "`code` must be a non-empty string".into(),
                    })?;
                let script = Script::compile(code)?;
                Ok(RuleKind::Scripted { script })
            }
            other => Err(EngineError::UnknownRuleType(other.to_string())),
        }
    }

    pub fn type_slug(&self) -> &'static str {
        match self {
            RuleKind::Ownership => "ownership",
            RuleKind::SameOrganization => "same_organization",
            RuleKind::RoleMembership { .. } => "role_membership",
            RuleKind::FieldComparison { .. } => "field_comparison",
            RuleKind::Scripted { .. } => "scripted",
        }
    }

    pub fn evaluate(&self, input: &EvaluationInput) -> Result<bool, EngineError> {
        match self {
            RuleKind::Ownership => {
                let assigned = input.instance.get("assigned_to").and_then(Value::as_str);
                Ok(matches!(assigned, Some(owner) if owner == input.principal.id))
            }
            RuleKind::SameOrganization => {
                let instance_org = input
                    .instance
                    .get("organization_id")
                    .and_then(Value::as_str);
                match (instance_org, input.principal.organization_id.as_deref()) {
                    (Some(a), Some(b)) => Ok(a == b),
                    _ => Ok(false),
                }
            }
            RuleKind::RoleMembership { roles } => {
                let role = input.principal.role.as_str();
                Ok(roles.iter().any(|r| r == role))
            }
            RuleKind::FieldComparison {
                field,
                operator,
                value,
            } => {
                // A path that dead-ends (absent or null segment) denies for
                // every operator, including the negated ones.
                let Some(actual) = resolve_field(input, field) else {
                    return Ok(false);
                };
                Ok(compare(actual, *operator, value))
            }
            RuleKind::Scripted { script } => script.eval(&input.script_scope()),
        }
    }
}

/// Resolve a dotted field path. Default root is the instance; `user.` and
/// `resource.` prefixes select the principal or instance explicitly.
/// Returns `None` when any segment (final included) is absent or null.
fn resolve_field<'a>(input: &'a EvaluationInput, field: &str) -> Option<&'a Value> {
    let (root, rest) = if let Some(rest) = field.strip_prefix("user.") {
        (&input.principal_json, rest)
    } else if let Some(rest) = field.strip_prefix("resource.") {
        (input.instance, rest)
    } else {
        (input.instance, field)
    };

    let mut current = root;
    for segment in rest.split('.') {
        current = current.get(segment)?;
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

fn compare(actual: &Value, operator: Operator, expected: &Value) -> bool {
    match operator {
        Operator::Equals => json_eq(actual, expected),
        Operator::NotEquals => !json_eq(actual, expected),
        Operator::GreaterThan => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        Operator::LessThan => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        Operator::Contains => contains(actual, expected).unwrap_or(false),
        // Conservative: a value that cannot contain anything is a deny, not
        // a vacuous "does not contain"
        Operator::NotContains => contains(actual, expected).map(|c| !c).unwrap_or(false),
        Operator::StartsWith => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => a.starts_with(b),
            _ => false,
        },
        Operator::EndsWith => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => a.ends_with(b),
            _ => false,
        },
        Operator::In => match expected.as_array() {
            Some(items) => items.iter().any(|item| json_eq(actual, item)),
            None => false,
        },
        Operator::NotIn => match expected.as_array() {
            Some(items) => !items.iter().any(|item| json_eq(actual, item)),
            None => false,
        },
    }
}

/// `Some(bool)` when `haystack` supports containment, `None` otherwise.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)),
        Value::Array(items) => Some(items.iter().any(|item| json_eq(item, needle))),
        _ => None,
    }
}

/// JSON equality with cross-type numeric comparison (1 == 1.0).
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ---------- Rule-type catalog for admin UI form generation ----------

#[derive(Debug, Serialize)]
pub struct RuleTypeDescriptor {
    pub rule_type: &'static str,
    pub description: &'static str,
    pub config_schema: Value,
}

pub fn rule_type_catalog() -> Vec<RuleTypeDescriptor> {
    vec![
        RuleTypeDescriptor {
            rule_type: "ownership",
            description: "Allows when the instance's assigned_to equals the principal's id",
            config_schema: json!({ "type": "object", "properties": {} }),
        },
        RuleTypeDescriptor {
            rule_type: "same_organization",
            description: "Allows when the instance belongs to the principal's organization",
            config_schema: json!({ "type": "object", "properties": {} }),
        },
        RuleTypeDescriptor {
            rule_type: "role_membership",
            description: "Allows when the principal's system role is in the configured list",
            config_schema: json!({
                "type": "object",
                "required": ["roles"],
                "properties": {
                    "roles": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    }
                }
            }),
        },
        RuleTypeDescriptor {
            rule_type: "field_comparison",
            description: "Compares a dotted field path (instance by default, \
                          user./resource. prefixes supported) against a constant",
            config_schema: json!({
                "type": "object",
                "required": ["field", "operator", "value"],
                "properties": {
                    "field": { "type": "string", "minLength": 1 },
                    "operator": {
                        "type": "string",
                        "enum": [
                            "equals", "not_equals", "greater_than", "less_than",
                            "contains", "not_contains", "starts_with", "ends_with",
                            "in", "not_in"
                        ]
                    },
                    "value": {}
                }
            }),
        },
        RuleTypeDescriptor {
            rule_type: "scripted",
            description: "Sandboxed boolean expression over user, resource, action, and context",
            config_schema: json!({
                "type": "object",
                "required": ["code"],
                "properties": {
                    "code": { "type": "string", "minLength": 1, "maxLength": 4096 }
                }
            }),
        },
    ]
}
