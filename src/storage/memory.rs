//! In-memory adapter.
//!
//! Keeps everything in maps behind a `tokio::sync::RwLock`. Not durable; used by
//! tests and local development, and as the backend when no database is
//! configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Adapter, AdapterResult};
use crate::authz::errors::AuthzError;
use crate::authz::types::{AccessScope, Grouping, Permission, Scope, ScopeBinding};

#[derive(Debug, Default)]
struct State {
    rules: Vec<Permission>,
    groupings: Vec<Grouping>,
    /// person id -> email
    people: HashMap<String, Option<String>>,
    /// team id -> team name
    teams: HashMap<String, String>,
    /// (team id, person id)
    members: Vec<(String, String)>,
    /// agent id -> agent name
    agents: HashMap<String, String>,
    access_scopes: Vec<AccessScope>,
    scopes: Vec<Scope>,
    bindings: Vec<ScopeBinding>,
}

impl State {
    fn team_ids_of(&self, person_id: &str) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, p)| p == person_id)
            .map(|(t, _)| t.as_str())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `AdapterUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AdapterResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::AdapterUnavailable(
                "memory adapter marked unavailable".into(),
            ));
        }
        Ok(())
    }

    pub async fn add_rule(&self, rule: Permission) {
        self.state.write().await.rules.push(rule);
    }

    pub async fn add_person(&self, id: &str, email: Option<&str>) {
        self.state
            .write()
            .await
            .people
            .insert(id.to_string(), email.map(str::to_string));
    }

    pub async fn add_team(&self, id: &str, name: &str, members: &[&str]) {
        let mut state = self.state.write().await;
        state.teams.insert(id.to_string(), name.to_string());
        for person in members {
            state.members.push((id.to_string(), person.to_string()));
        }
    }

    pub async fn add_agent(&self, id: &str, name: &str) {
        self.state
            .write()
            .await
            .agents
            .insert(id.to_string(), name.to_string());
    }

    /// Rejects scopes owned by both or neither of a person and a team.
    pub async fn add_access_scope(&self, scope: AccessScope) -> AdapterResult<()> {
        scope.validate()?;
        self.state.write().await.access_scopes.push(scope);
        Ok(())
    }

    /// Rejects targets naming zero or several resource types.
    pub async fn add_scope(&self, scope: Scope) -> AdapterResult<()> {
        for target in &scope.targets {
            target.resolve()?;
        }
        let mut state = self.state.write().await;
        state
            .scopes
            .retain(|s| !(s.namespace == scope.namespace && s.name == scope.name));
        state.scopes.push(scope);
        Ok(())
    }

    pub async fn add_scope_binding(&self, binding: ScopeBinding) -> AdapterResult<()> {
        binding.validate()?;
        self.state.write().await.bindings.push(binding);
        Ok(())
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn load_rules(&self) -> AdapterResult<Vec<Permission>> {
        self.check_available()?;
        Ok(self.state.read().await.rules.clone())
    }

    async fn load_groupings(&self) -> AdapterResult<Vec<Grouping>> {
        self.check_available()?;
        Ok(self.state.read().await.groupings.clone())
    }

    async fn add_grouping(&self, principal: &str, inherited: &str) -> AdapterResult<()> {
        self.check_available()?;
        let grouping = Grouping::new(principal, inherited);
        let mut state = self.state.write().await;
        if !state.groupings.contains(&grouping) {
            state.groupings.push(grouping);
        }
        Ok(())
    }

    async fn remove_grouping(&self, principal: &str, inherited: &str) -> AdapterResult<()> {
        self.check_available()?;
        self.state
            .write()
            .await
            .groupings
            .retain(|g| !(g.principal == principal && g.inherited == inherited));
        Ok(())
    }

    async fn load_access_scopes_for_person(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<AccessScope>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .access_scopes
            .iter()
            .filter(|s| s.person_id.as_deref() == Some(person_id))
            .cloned()
            .collect())
    }

    async fn load_access_scopes_for_teams(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<AccessScope>> {
        self.check_available()?;
        let state = self.state.read().await;
        let teams = state.team_ids_of(person_id);
        Ok(state
            .access_scopes
            .iter()
            .filter(|s| s.team_id.as_deref().is_some_and(|t| teams.contains(&t)))
            .cloned()
            .collect())
    }

    async fn load_scope_bindings_for_person(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<ScopeBinding>> {
        self.check_available()?;
        let state = self.state.read().await;
        let Some(Some(email)) = state.people.get(person_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .bindings
            .iter()
            .filter(|b| b.persons.iter().any(|p| p == email))
            .cloned()
            .collect())
    }

    async fn load_scope_bindings_for_teams(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<ScopeBinding>> {
        self.check_available()?;
        let state = self.state.read().await;
        let names: Vec<&String> = state
            .team_ids_of(person_id)
            .into_iter()
            .filter_map(|t| state.teams.get(t))
            .collect();
        Ok(state
            .bindings
            .iter()
            .filter(|b| b.teams.iter().any(|t| names.contains(&t)))
            .cloned()
            .collect())
    }

    async fn load_scope(&self, namespace: &str, name: &str) -> AdapterResult<Option<Scope>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .scopes
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
            .cloned())
    }

    async fn resolve_agent(&self, id_or_name: &str) -> AdapterResult<Option<String>> {
        self.check_available()?;
        let state = self.state.read().await;
        if state.agents.contains_key(id_or_name) {
            return Ok(Some(id_or_name.to_string()));
        }
        let mut by_name: Vec<&String> = state
            .agents
            .iter()
            .filter(|(_, name)| name.as_str() == id_or_name)
            .map(|(id, _)| id)
            .collect();
        by_name.sort();
        Ok(by_name.first().map(|id| id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
