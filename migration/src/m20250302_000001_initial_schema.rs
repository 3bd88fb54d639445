use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Permission catalog: one row per (resource, action), slug is canonical
        manager
            .create_table(
                Table::create()
                    .table(Permissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Permissions::Slug)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Permissions::Resource))
                    .col(string(Permissions::Action))
                    .to_owned(),
            )
            .await?;

        // Organization-scoped roles
        manager
            .create_table(
                Table::create()
                    .table(Roles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Roles::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Roles::Name))
                    .col(string(Roles::Slug))
                    .col(string(Roles::OrganizationId))
                    .col(string_null(Roles::Description))
                    .col(
                        ColumnDef::new(Roles::IsDefault)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Roles::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_roles_org_slug")
                    .table(Roles::Table)
                    .col(Roles::OrganizationId)
                    .col(Roles::Slug)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Role -> permission links
        manager
            .create_table(
                Table::create()
                    .table(RolePermissions::Table)
                    .if_not_exists()
                    .col(string(RolePermissions::RoleId))
                    .col(string(RolePermissions::PermissionSlug))
                    .primary_key(
                        Index::create()
                            .col(RolePermissions::RoleId)
                            .col(RolePermissions::PermissionSlug),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(RolePermissions::Table, RolePermissions::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // User -> role assignments. Users live in an external system; only
        // their role references are stored here.
        manager
            .create_table(
                Table::create()
                    .table(UserRoles::Table)
                    .if_not_exists()
                    .col(string(UserRoles::UserId))
                    .col(string(UserRoles::RoleId))
                    .primary_key(
                        Index::create()
                            .col(UserRoles::UserId)
                            .col(UserRoles::RoleId),
                    )
                    .to_owned(),
            )
            .await?;

        // Admin-editable policies, keyed "resource:action" per organization
        manager
            .create_table(
                Table::create()
                    .table(DynamicPolicies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DynamicPolicies::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(DynamicPolicies::Key))
                    .col(string(DynamicPolicies::Name))
                    .col(
                        ColumnDef::new(DynamicPolicies::Active)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(string(DynamicPolicies::OrganizationId))
                    .col(big_integer(DynamicPolicies::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dynamic_policies_org_key")
                    .table(DynamicPolicies::Table)
                    .col(DynamicPolicies::OrganizationId)
                    .col(DynamicPolicies::Key)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Ordered rule rows under a policy; config is JSON text validated
        // against the rule type before insert
        manager
            .create_table(
                Table::create()
                    .table(PolicyRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PolicyRules::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(PolicyRules::PolicyId))
                    .col(string(PolicyRules::RuleType))
                    .col(string(PolicyRules::Config))
                    .col(
                        ColumnDef::new(PolicyRules::SortOrder)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PolicyRules::Active)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(PolicyRules::Table, PolicyRules::PolicyId)
                            .to(DynamicPolicies::Table, DynamicPolicies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_policy_rules_policy")
                    .table(PolicyRules::Table)
                    .col(PolicyRules::PolicyId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PolicyRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DynamicPolicies::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserRoles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RolePermissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Roles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Permissions::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum Permissions {
    Table,
    Slug,
    Resource,
    Action,
}

#[derive(DeriveIden)]
enum Roles {
    Table,
    Id,
    Name,
    Slug,
    OrganizationId,
    Description,
    IsDefault,
    CreatedAt,
}

#[derive(DeriveIden)]
enum RolePermissions {
    Table,
    RoleId,
    PermissionSlug,
}

#[derive(DeriveIden)]
enum UserRoles {
    Table,
    UserId,
    RoleId,
}

#[derive(DeriveIden)]
enum DynamicPolicies {
    Table,
    Id,
    Key,
    Name,
    Active,
    OrganizationId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum PolicyRules {
    Table,
    Id,
    PolicyId,
    RuleType,
    Config,
    SortOrder,
    Active,
}
