use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, Statement};

use crate::m20250302_000001_initial_schema::Permissions;

/// Resource types the catalog covers.
const RESOURCES: &[&str] = &["customer", "deal", "task", "product", "report"];

/// Action types, including the `manage` wildcard that covers every other
/// action on its resource.
const ACTIONS: &[&str] = &["create", "read", "update", "delete", "export", "manage"];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Idempotent: a non-empty catalog means seeding already happened
        // (possibly with a different catalog shape); leave it untouched.
        let db = manager.get_connection();
        let row = db
            .query_one(Statement::from_string(
                manager.get_database_backend(),
                "SELECT COUNT(*) AS n FROM permissions".to_owned(),
            ))
            .await?;
        let existing: i64 = match row {
            Some(row) => row.try_get("", "n")?,
            None => 0,
        };
        if existing > 0 {
            return Ok(());
        }

        for resource in RESOURCES {
            for action in ACTIONS {
                let insert = Query::insert()
                    .into_table(Permissions::Table)
                    .columns([
                        Permissions::Slug,
                        Permissions::Resource,
                        Permissions::Action,
                    ])
                    .values_panic([
                        format!("{resource}:{action}").into(),
                        (*resource).into(),
                        (*action).into(),
                    ])
                    .to_owned();
                manager.exec_stmt(insert).await?;
            }
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .exec_stmt(Query::delete().from_table(Permissions::Table).to_owned())
            .await?;
        Ok(())
    }
}
