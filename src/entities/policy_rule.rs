use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One predicate row under a dynamic policy. `config` is JSON text whose
/// shape was validated against `rule_type` before insert; evaluation order
/// is `sort_order` ascending and only `active` rows participate.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "policy_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub policy_id: String,
    pub rule_type: String,
    pub config: String,
    pub sort_order: i64,
    pub active: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
