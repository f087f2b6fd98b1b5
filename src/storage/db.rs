use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::de::DeserializeOwned;

use super::{Adapter, AdapterResult};
use crate::authz::errors::AuthzError;
use crate::authz::types::{AccessScope, Effect, Grouping, Permission, Scope, ScopeBinding};
use crate::entities;

const POLICY_TYPE: &str = "p";
const GROUPING_TYPE: &str = "g";

/// `sea-orm` adapter over the tables created by the `migration` crate.
#[derive(Debug, Clone)]
pub struct DbAdapter {
    db: DatabaseConnection,
}

impl DbAdapter {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(url: &str) -> AdapterResult<Self> {
        let db = Database::connect(url).await?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Stores a rule row. Rules stored here are merged with the bootstrap
    /// policy on the next reload.
    pub async fn insert_rule(&self, rule: &Permission) -> AdapterResult<()> {
        let row = entities::casbin_rule::ActiveModel {
            ptype: Set(POLICY_TYPE.to_string()),
            v0: Set(rule.principal.clone()),
            v1: Set(rule.object.clone()),
            v2: Set(rule.action.clone()),
            v3: Set(rule.effect.as_str().to_string()),
            v4: Set(rule.condition.clone().unwrap_or_default()),
            v5: Set(rule.id.clone()),
            ..Default::default()
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    async fn person_email(&self, person_id: &str) -> AdapterResult<Option<String>> {
        use entities::person::{Column, Entity};

        let person = Entity::find_by_id(person_id.to_string())
            .filter(Column::DeletedAt.is_null())
            .one(&self.db)
            .await?;
        Ok(person.and_then(|p| p.email))
    }

    async fn teams_of(&self, person_id: &str) -> AdapterResult<Vec<entities::team::Model>> {
        use entities::team_member::{Column, Entity};

        let memberships = Entity::find()
            .filter(Column::PersonId.eq(person_id))
            .all(&self.db)
            .await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }

        let teams = entities::Team::find()
            .filter(
                entities::team::Column::Id.is_in(memberships.into_iter().map(|m| m.team_id)),
            )
            .filter(entities::team::Column::DeletedAt.is_null())
            .all(&self.db)
            .await?;
        Ok(teams)
    }

    async fn active_bindings(&self) -> AdapterResult<Vec<ScopeBinding>> {
        use entities::scope_binding::{Column, Entity};

        let rows = Entity::find()
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::Namespace)
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().filter_map(binding_from_row).collect())
    }
}

fn parse_json<T: DeserializeOwned>(raw: &str, what: &str, row: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::warn!(row, field = what, error = %err, "Skipping row with malformed JSON column");
            None
        }
    }
}

/// An empty effect column means allow; anything else must name an effect.
fn permission_from_row(row: entities::casbin_rule::Model) -> Result<Permission, AuthzError> {
    let effect = if row.v3.is_empty() {
        Effect::Allow
    } else {
        Effect::parse(&row.v3).ok_or_else(|| {
            AuthzError::InvalidPolicy(format!(
                "stored rule #{} ({}, {}, {}) has unknown effect `{}`",
                row.id, row.v0, row.v1, row.v2, row.v3
            ))
        })?
    };
    let mut rule = Permission::new(&row.v0, &row.v1, &row.v2, effect);
    if !row.v4.is_empty() {
        rule = rule.with_condition(&row.v4);
    }
    if !row.v5.is_empty() {
        rule = rule.with_id(&row.v5);
    }
    Ok(rule)
}

fn access_scope_from_row(row: entities::access_scope::Model) -> Option<AccessScope> {
    let resources = parse_json(&row.resources, "resources", &row.id)?;
    let scope = AccessScope {
        id: row.id,
        name: row.name,
        namespace: row.namespace,
        person_id: row.person_id,
        team_id: row.team_id,
        resources,
        scopes: serde_json::Value::String(row.scopes),
    };
    match scope.validate() {
        Ok(()) => Some(scope),
        Err(err) => {
            tracing::warn!(access_scope = %scope.id, error = %err, "Skipping invalid access scope");
            None
        }
    }
}

fn binding_from_row(row: entities::scope_binding::Model) -> Option<ScopeBinding> {
    Some(ScopeBinding {
        persons: parse_json(&row.persons, "persons", &row.id)?,
        teams: parse_json(&row.teams, "teams", &row.id)?,
        scopes: parse_json(&row.scopes, "scopes", &row.id)?,
        name: row.name,
        namespace: row.namespace,
    })
}

#[async_trait]
impl Adapter for DbAdapter {
    async fn load_rules(&self) -> AdapterResult<Vec<Permission>> {
        use entities::casbin_rule::{Column, Entity};

        let rows = Entity::find()
            .filter(Column::Ptype.eq(POLICY_TYPE))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        rows.into_iter().map(permission_from_row).collect()
    }

    async fn load_groupings(&self) -> AdapterResult<Vec<Grouping>> {
        use entities::casbin_rule::{Column, Entity};

        let rows = Entity::find()
            .filter(Column::Ptype.eq(GROUPING_TYPE))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Grouping::new(&r.v0, &r.v1))
            .collect())
    }

    async fn add_grouping(&self, principal: &str, inherited: &str) -> AdapterResult<()> {
        use entities::casbin_rule::{ActiveModel, Column, Entity};

        let existing = Entity::find()
            .filter(Column::Ptype.eq(GROUPING_TYPE))
            .filter(Column::V0.eq(principal))
            .filter(Column::V1.eq(inherited))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        let row = ActiveModel {
            ptype: Set(GROUPING_TYPE.to_string()),
            v0: Set(principal.to_string()),
            v1: Set(inherited.to_string()),
            v2: Set(String::new()),
            v3: Set(String::new()),
            v4: Set(String::new()),
            v5: Set(String::new()),
            ..Default::default()
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    async fn remove_grouping(&self, principal: &str, inherited: &str) -> AdapterResult<()> {
        use entities::casbin_rule::{Column, Entity};

        Entity::delete_many()
            .filter(Column::Ptype.eq(GROUPING_TYPE))
            .filter(Column::V0.eq(principal))
            .filter(Column::V1.eq(inherited))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn load_access_scopes_for_person(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<AccessScope>> {
        use entities::access_scope::{Column, Entity};

        let rows = Entity::find()
            .filter(Column::PersonId.eq(person_id))
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().filter_map(access_scope_from_row).collect())
    }

    async fn load_access_scopes_for_teams(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<AccessScope>> {
        use entities::access_scope::{Column, Entity};

        let teams: Vec<String> = self
            .teams_of(person_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        if teams.is_empty() {
            return Ok(Vec::new());
        }
        let rows = Entity::find()
            .filter(Column::TeamId.is_in(teams))
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().filter_map(access_scope_from_row).collect())
    }

    async fn load_scope_bindings_for_person(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<ScopeBinding>> {
        let Some(email) = self.person_email(person_id).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .active_bindings()
            .await?
            .into_iter()
            .filter(|b| b.persons.iter().any(|p| *p == email))
            .collect())
    }

    async fn load_scope_bindings_for_teams(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<ScopeBinding>> {
        let names: Vec<String> = self
            .teams_of(person_id)
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .active_bindings()
            .await?
            .into_iter()
            .filter(|b| b.teams.iter().any(|t| names.contains(t)))
            .collect())
    }

    async fn load_scope(&self, namespace: &str, name: &str) -> AdapterResult<Option<Scope>> {
        use entities::scope::{Column, Entity};

        let Some(row) = Entity::find()
            .filter(Column::Namespace.eq(namespace))
            .filter(Column::Name.eq(name))
            .filter(Column::DeletedAt.is_null())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let Some(targets) = parse_json(&row.targets, "targets", &row.id) else {
            return Ok(None);
        };
        Ok(Some(Scope {
            name: row.name,
            namespace: row.namespace,
            targets,
        }))
    }

    async fn resolve_agent(&self, id_or_name: &str) -> AdapterResult<Option<String>> {
        use entities::agent::{Column, Entity};

        if let Some(agent) = Entity::find_by_id(id_or_name.to_string())
            .filter(Column::DeletedAt.is_null())
            .one(&self.db)
            .await?
        {
            return Ok(Some(agent.id));
        }

        let by_name = Entity::find()
            .filter(Column::Name.eq(id_or_name))
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        Ok(by_name.map(|a| a.id))
    }

    fn backend_name(&self) -> &'static str {
        "database"
    }
}
