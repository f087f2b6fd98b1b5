use mission_control_authz::authz::types::{ScopeResourceSelector, ScopeTarget};
use mission_control_authz::entities;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::{json, Value};

/// Builder for AccessScope rows
pub struct AccessScopeBuilder {
    id: String,
    namespace: String,
    person_id: Option<String>,
    team_id: Option<String>,
    resources: Vec<String>,
    criteria: Vec<Value>,
    deleted: bool,
}

impl AccessScopeBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            namespace: "default".to_string(),
            person_id: None,
            team_id: None,
            resources: vec!["*".to_string()],
            criteria: Vec::new(),
            deleted: false,
        }
    }

    pub fn for_person(mut self, person_id: &str) -> Self {
        self.person_id = Some(person_id.to_string());
        self
    }

    pub fn for_team(mut self, team_id: &str) -> Self {
        self.team_id = Some(team_id.to_string());
        self
    }

    pub fn resources(mut self, resources: &[&str]) -> Self {
        self.resources = resources.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Adds one `{tags, agents, names}` criterion.
    pub fn criterion(mut self, criterion: Value) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::access_scope::Model {
        entities::access_scope::ActiveModel {
            id: Set(self.id.clone()),
            name: Set(self.id),
            namespace: Set(self.namespace),
            person_id: Set(self.person_id),
            team_id: Set(self.team_id),
            resources: Set(json!(self.resources).to_string()),
            scopes: Set(Value::Array(self.criteria).to_string()),
            deleted_at: Set(self.deleted.then_some(1_700_000_000)),
        }
        .insert(db)
        .await
        .expect("Failed to create access scope")
    }
}

/// Builder for Scope rows
pub struct ScopeBuilder {
    name: String,
    namespace: String,
    targets: Vec<ScopeTarget>,
}

impl ScopeBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            targets: Vec::new(),
        }
    }

    pub fn config_target(mut self, selector: ScopeResourceSelector) -> Self {
        self.targets.push(ScopeTarget {
            config: Some(selector),
            ..Default::default()
        });
        self
    }

    pub fn global_target(mut self, selector: ScopeResourceSelector) -> Self {
        self.targets.push(ScopeTarget {
            global: Some(selector),
            ..Default::default()
        });
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::scope::Model {
        entities::scope::ActiveModel {
            id: Set(format!("{}/{}", self.namespace, self.name)),
            name: Set(self.name),
            namespace: Set(self.namespace),
            targets: Set(serde_json::to_string(&self.targets).expect("Failed to encode targets")),
            deleted_at: Set(None),
        }
        .insert(db)
        .await
        .expect("Failed to create scope")
    }
}

/// Builder for ScopeBinding rows
pub struct ScopeBindingBuilder {
    name: String,
    namespace: String,
    persons: Vec<String>,
    teams: Vec<String>,
    scopes: Vec<String>,
}

impl ScopeBindingBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            persons: Vec::new(),
            teams: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn person(mut self, email: &str) -> Self {
        self.persons.push(email.to_string());
        self
    }

    pub fn team(mut self, name: &str) -> Self {
        self.teams.push(name.to_string());
        self
    }

    pub fn scope(mut self, name: &str) -> Self {
        self.scopes.push(name.to_string());
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::scope_binding::Model {
        entities::scope_binding::ActiveModel {
            id: Set(format!("{}/{}", self.namespace, self.name)),
            name: Set(self.name),
            namespace: Set(self.namespace),
            persons: Set(json!(self.persons).to_string()),
            teams: Set(json!(self.teams).to_string()),
            scopes: Set(json!(self.scopes).to_string()),
            deleted_at: Set(None),
        }
        .insert(db)
        .await
        .expect("Failed to create scope binding")
    }
}
