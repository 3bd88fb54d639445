pub mod dynamic_policy;
pub mod permission;
pub mod policy_rule;
pub mod role;
pub mod role_permission;
pub mod user_role;

pub use dynamic_policy::Entity as DynamicPolicy;
pub use permission::Entity as Permission;
pub use policy_rule::Entity as PolicyRule;
pub use role::Entity as Role;
pub use role_permission::Entity as RolePermission;
pub use user_role::Entity as UserRole;
