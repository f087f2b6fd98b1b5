//! Subject Resolver: roles, AccessScopes and ScopeBindings of one subject.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::authz::cache::Caches;
use crate::authz::cancellable;
use crate::authz::errors::AuthzError;
use crate::authz::store::PolicyStore;
use crate::authz::types::{AccessScope, RlsPayload, ScopeBinding, EVERYONE_ROLE};
use crate::storage::Adapter;

/// Everything the engine knows about a subject, cached as one unit.
#[derive(Debug, Default)]
pub struct ResolvedSubject {
    pub roles: BTreeSet<String>,
    pub access_scopes: Vec<AccessScope>,
    pub team_access_scopes: Vec<AccessScope>,
    pub scope_bindings: Vec<ScopeBinding>,
    pub team_scope_bindings: Vec<ScopeBinding>,
    /// Computed on first request; agent lookups are cached with it.
    pub(crate) rls: OnceCell<RlsPayload>,
}

impl ResolvedSubject {
    pub fn all_access_scopes(&self) -> impl Iterator<Item = &AccessScope> {
        self.access_scopes.iter().chain(&self.team_access_scopes)
    }

    pub fn all_scope_bindings(&self) -> impl Iterator<Item = &ScopeBinding> {
        self.scope_bindings.iter().chain(&self.team_scope_bindings)
    }
}

#[derive(Debug, Clone)]
pub struct SubjectResolver {
    adapter: Arc<dyn Adapter>,
    store: Arc<PolicyStore>,
    caches: Arc<Caches>,
}

impl SubjectResolver {
    pub fn new(adapter: Arc<dyn Adapter>, store: Arc<PolicyStore>, caches: Arc<Caches>) -> Self {
        Self {
            adapter,
            store,
            caches,
        }
    }

    /// Unknown subjects resolve to empty sets plus `everyone`. Adapter
    /// failures propagate and are not cached.
    pub async fn resolve(
        &self,
        ctx: &CancellationToken,
        subject: &str,
    ) -> Result<Arc<ResolvedSubject>, AuthzError> {
        if let Some(hit) = self.caches.subjects.get(&subject.to_string()) {
            return Ok(hit);
        }
        let generation = self.caches.subjects.generation();

        let adapter = self.adapter.as_ref();
        let (access_scopes, team_access_scopes, scope_bindings, team_scope_bindings) =
            cancellable(ctx, async {
                tokio::try_join!(
                    adapter.load_access_scopes_for_person(subject),
                    adapter.load_access_scopes_for_teams(subject),
                    adapter.load_scope_bindings_for_person(subject),
                    adapter.load_scope_bindings_for_teams(subject),
                )
            })
            .await?;

        let resolved = Arc::new(ResolvedSubject {
            roles: self.roles(subject),
            access_scopes,
            team_access_scopes,
            scope_bindings,
            team_scope_bindings,
            rls: OnceCell::new(),
        });
        tracing::debug!(
            subject,
            roles = resolved.roles.len(),
            access_scopes = resolved.access_scopes.len() + resolved.team_access_scopes.len(),
            bindings = resolved.scope_bindings.len() + resolved.team_scope_bindings.len(),
            "Resolved subject"
        );
        self.caches
            .subjects
            .insert_if_current(generation, subject.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Effective roles from the current snapshot: direct, inherited, and
    /// `everyone`.
    pub fn roles(&self, subject: &str) -> BTreeSet<String> {
        let snapshot = self.store.snapshot();
        let mut roles = snapshot.implicit_roles(subject);
        roles.insert(EVERYONE_ROLE.to_string());
        roles.extend(snapshot.implicit_roles(EVERYONE_ROLE));
        roles
    }

    pub fn flush(&self, subject: Option<&str>) {
        match subject {
            Some(subject) => self.caches.subjects.remove(&subject.to_string()),
            None => self.caches.subjects.flush(),
        }
    }
}
