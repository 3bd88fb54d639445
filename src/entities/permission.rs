use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One catalog entry per (resource, action) pair. Seeded once by migration,
/// read-only thereafter.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "permissions")]
pub struct Model {
    /// Canonical form `resource:action`, globally unique.
    #[sea_orm(primary_key, auto_increment = false)]
    pub slug: String,
    pub resource: String,
    pub action: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
