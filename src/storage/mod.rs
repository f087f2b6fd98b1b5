//! Persistence seam of the authorization core.
//!
//! The engine reads rules, role bindings and visibility resources through
//! [`Adapter`] and never talks to a database directly. Role binding mutations
//! are the only writes.

use async_trait::async_trait;

use crate::authz::errors::AuthzError;
use crate::authz::types::{AccessScope, Grouping, Permission, Scope, ScopeBinding};

pub mod db;
pub mod memory;

pub use db::DbAdapter;
pub use memory::MemoryAdapter;

pub type AdapterResult<T> = Result<T, AuthzError>;

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stored rules, merged with the bootstrap policy at load.
    async fn load_rules(&self) -> AdapterResult<Vec<Permission>>;
    async fn load_groupings(&self) -> AdapterResult<Vec<Grouping>>;

    /// Idempotent.
    async fn add_grouping(&self, principal: &str, inherited: &str) -> AdapterResult<()>;
    /// Removing a missing grouping is not an error.
    async fn remove_grouping(&self, principal: &str, inherited: &str) -> AdapterResult<()>;

    async fn load_access_scopes_for_person(&self, person_id: &str)
        -> AdapterResult<Vec<AccessScope>>;
    /// AccessScopes owned by any team the person belongs to.
    async fn load_access_scopes_for_teams(&self, person_id: &str)
        -> AdapterResult<Vec<AccessScope>>;

    /// Bindings listing the person's email.
    async fn load_scope_bindings_for_person(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<ScopeBinding>>;
    /// Bindings listing the name of any team the person belongs to.
    async fn load_scope_bindings_for_teams(
        &self,
        person_id: &str,
    ) -> AdapterResult<Vec<ScopeBinding>>;

    async fn load_scope(&self, namespace: &str, name: &str) -> AdapterResult<Option<Scope>>;

    /// Resolve an agent id or name to its id.
    async fn resolve_agent(&self, id_or_name: &str) -> AdapterResult<Option<String>>;

    fn backend_name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("backend", &self.backend_name())
            .finish()
    }
}
