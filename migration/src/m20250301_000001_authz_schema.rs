use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create casbin_rule table
        manager
            .create_table(
                Table::create()
                    .table(CasbinRule::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CasbinRule::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string(CasbinRule::Ptype))
                    .col(ColumnDef::new(CasbinRule::V0).string().not_null().default(""))
                    .col(ColumnDef::new(CasbinRule::V1).string().not_null().default(""))
                    .col(ColumnDef::new(CasbinRule::V2).string().not_null().default(""))
                    .col(ColumnDef::new(CasbinRule::V3).string().not_null().default(""))
                    .col(ColumnDef::new(CasbinRule::V4).string().not_null().default(""))
                    .col(ColumnDef::new(CasbinRule::V5).string().not_null().default(""))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_casbin_rule_unique")
                    .table(CasbinRule::Table)
                    .col(CasbinRule::Ptype)
                    .col(CasbinRule::V0)
                    .col(CasbinRule::V1)
                    .col(CasbinRule::V2)
                    .col(CasbinRule::V3)
                    .col(CasbinRule::V4)
                    .col(CasbinRule::V5)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create people table
        manager
            .create_table(
                Table::create()
                    .table(People::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(People::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(People::Name))
                    .col(string_null(People::Email))
                    .col(big_integer_null(People::DeletedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_people_email")
                    .table(People::Table)
                    .col(People::Email)
                    .to_owned(),
            )
            .await?;

        // Create teams table
        manager
            .create_table(
                Table::create()
                    .table(Teams::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Teams::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Teams::Name).string().not_null().unique_key())
                    .col(big_integer_null(Teams::DeletedAt))
                    .to_owned(),
            )
            .await?;

        // Create team_members table
        manager
            .create_table(
                Table::create()
                    .table(TeamMembers::Table)
                    .if_not_exists()
                    .col(string(TeamMembers::TeamId))
                    .col(string(TeamMembers::PersonId))
                    .primary_key(
                        Index::create()
                            .col(TeamMembers::TeamId)
                            .col(TeamMembers::PersonId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_team_members_person")
                    .table(TeamMembers::Table)
                    .col(TeamMembers::PersonId)
                    .to_owned(),
            )
            .await?;

        // Create agents table
        manager
            .create_table(
                Table::create()
                    .table(Agents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Agents::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Agents::Name))
                    .col(big_integer_null(Agents::DeletedAt))
                    .to_owned(),
            )
            .await?;

        // Create access_scopes table
        manager
            .create_table(
                Table::create()
                    .table(AccessScopes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessScopes::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(AccessScopes::Name))
                    .col(string(AccessScopes::Namespace))
                    .col(string_null(AccessScopes::PersonId))
                    .col(string_null(AccessScopes::TeamId))
                    .col(string(AccessScopes::Resources))
                    .col(string(AccessScopes::Scopes))
                    .col(big_integer_null(AccessScopes::DeletedAt))
                    .to_owned(),
            )
            .await?;

        // Create scopes table
        manager
            .create_table(
                Table::create()
                    .table(Scopes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Scopes::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Scopes::Name))
                    .col(string(Scopes::Namespace))
                    .col(string(Scopes::Targets))
                    .col(big_integer_null(Scopes::DeletedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_scopes_namespace_name")
                    .table(Scopes::Table)
                    .col(Scopes::Namespace)
                    .col(Scopes::Name)
                    .to_owned(),
            )
            .await?;

        // Create scope_bindings table
        manager
            .create_table(
                Table::create()
                    .table(ScopeBindings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScopeBindings::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(ScopeBindings::Name))
                    .col(string(ScopeBindings::Namespace))
                    .col(string(ScopeBindings::Persons))
                    .col(string(ScopeBindings::Teams))
                    .col(string(ScopeBindings::Scopes))
                    .col(big_integer_null(ScopeBindings::DeletedAt))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScopeBindings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Scopes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AccessScopes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Agents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TeamMembers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Teams::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(People::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CasbinRule::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum CasbinRule {
    Table,
    Id,
    Ptype,
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
}

#[derive(DeriveIden)]
enum People {
    Table,
    Id,
    Name,
    Email,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Teams {
    Table,
    Id,
    Name,
    DeletedAt,
}

#[derive(DeriveIden)]
enum TeamMembers {
    Table,
    TeamId,
    PersonId,
}

#[derive(DeriveIden)]
enum Agents {
    Table,
    Id,
    Name,
    DeletedAt,
}

#[derive(DeriveIden)]
enum AccessScopes {
    Table,
    Id,
    Name,
    Namespace,
    PersonId,
    TeamId,
    Resources,
    Scopes,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Scopes {
    Table,
    Id,
    Name,
    Namespace,
    Targets,
    DeletedAt,
}

#[derive(DeriveIden)]
enum ScopeBindings {
    Table,
    Id,
    Name,
    Namespace,
    Persons,
    Teams,
    Scopes,
    DeletedAt,
}
