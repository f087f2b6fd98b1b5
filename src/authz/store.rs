//! Policy Store: rules and role bindings behind an atomically swapped snapshot.
//!
//! Readers take one `Arc<PolicySnapshot>` and never block. Writers serialize on
//! a mutex, validate a fresh snapshot, persist through the adapter and only
//! then publish.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::authz::cancellable;
use crate::authz::errors::AuthzError;
use crate::authz::loader::{compile_policy, PolicySnapshot};
use crate::authz::types::{Grouping, ParsedPolicy, Permission};
use crate::storage::Adapter;

pub struct PolicyStore {
    current: ArcSwap<PolicySnapshot>,
    bootstrap: ParsedPolicy,
    objects: HashSet<String>,
    adapter: Arc<dyn Adapter>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("PolicyStore")
            .field("backend", &self.adapter.backend_name())
            .field("rules", &snapshot.rules().len())
            .field("groupings", &snapshot.groupings().len())
            .finish()
    }
}

impl PolicyStore {
    /// Builds the first snapshot. Any invalid rule is fatal here.
    pub async fn load(
        ctx: &CancellationToken,
        adapter: Arc<dyn Adapter>,
        bootstrap: ParsedPolicy,
        objects: HashSet<String>,
    ) -> Result<Self, AuthzError> {
        let snapshot = build_snapshot(ctx, adapter.as_ref(), &bootstrap, &objects).await?;
        tracing::info!(
            backend = adapter.backend_name(),
            rules = snapshot.rules().len(),
            groupings = snapshot.groupings().len(),
            "Loaded policy store"
        );
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            bootstrap,
            objects,
            adapter,
            writer: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Rebuilds the snapshot from the adapter and swaps it in. On error the
    /// previous snapshot stays in place.
    pub async fn reload(&self, ctx: &CancellationToken) -> Result<(), AuthzError> {
        let _guard = self.writer.lock().await;
        let snapshot =
            build_snapshot(ctx, self.adapter.as_ref(), &self.bootstrap, &self.objects).await?;
        tracing::info!(
            rules = snapshot.rules().len(),
            groupings = snapshot.groupings().len(),
            "Reloaded policy store"
        );
        self.current.store(Arc::new(snapshot));
        Ok(())
    }

    /// Grants `role` to `user`. Returns false when the binding already existed.
    pub async fn add_role(
        &self,
        ctx: &CancellationToken,
        user: &str,
        role: &str,
    ) -> Result<bool, AuthzError> {
        let _guard = self.writer.lock().await;
        let current = self.current.load_full();
        if current.has_grouping(user, role) {
            return Ok(false);
        }

        let mut groupings = current.groupings().to_vec();
        groupings.push(Grouping::new(user, role));
        let next = self.recompile(&current, groupings)?;

        cancellable(ctx, self.adapter.add_grouping(user, role)).await?;
        self.current.store(Arc::new(next));
        tracing::info!(user, role, "Granted role");
        Ok(true)
    }

    /// Revokes `role` from `user`. Returns false when there was nothing to remove.
    pub async fn remove_role(
        &self,
        ctx: &CancellationToken,
        user: &str,
        role: &str,
    ) -> Result<bool, AuthzError> {
        let _guard = self.writer.lock().await;
        let current = self.current.load_full();
        if !current.has_grouping(user, role) {
            return Ok(false);
        }

        let groupings: Vec<Grouping> = current
            .groupings()
            .iter()
            .filter(|g| !(g.principal == user && g.inherited == role))
            .cloned()
            .collect();
        let next = self.recompile(&current, groupings)?;

        cancellable(ctx, self.adapter.remove_grouping(user, role)).await?;
        self.current.store(Arc::new(next));
        tracing::info!(user, role, "Revoked role");
        Ok(true)
    }

    pub fn implicit_roles(&self, user: &str) -> BTreeSet<String> {
        self.current.load().implicit_roles(user)
    }

    /// Direct and inherited rules of `principal`.
    pub fn rules_for(&self, principal: &str) -> Vec<Permission> {
        self.current
            .load()
            .rules_for(principal)
            .into_iter()
            .map(|r| r.permission.clone())
            .collect()
    }

    fn recompile(
        &self,
        current: &PolicySnapshot,
        groupings: Vec<Grouping>,
    ) -> Result<PolicySnapshot, AuthzError> {
        let rules = current
            .rules()
            .iter()
            .map(|r| r.permission.clone())
            .collect();
        compile_policy(rules, groupings, &self.objects)
    }
}

async fn build_snapshot(
    ctx: &CancellationToken,
    adapter: &dyn Adapter,
    bootstrap: &ParsedPolicy,
    objects: &HashSet<String>,
) -> Result<PolicySnapshot, AuthzError> {
    let (stored_rules, stored_groupings) = cancellable(ctx, async {
        tokio::try_join!(adapter.load_rules(), adapter.load_groupings())
    })
    .await?;

    let mut rules = bootstrap.rules.clone();
    rules.extend(stored_rules);
    let mut groupings = bootstrap.groupings.clone();
    groupings.extend(stored_groupings);

    compile_policy(rules, groupings, objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::loader::default_objects;
    use crate::authz::policy::parse_policy_document;
    use crate::authz::types::Effect;
    use crate::storage::MemoryAdapter;

    const POLICY: &str = r#"
- principal: editor
  inherit: [viewer]
  acl:
    - objects: catalog
      actions: update
- principal: viewer
  acl:
    - objects: catalog
      actions: read
"#;

    async fn store_with(adapter: Arc<MemoryAdapter>) -> PolicyStore {
        PolicyStore::load(
            &CancellationToken::new(),
            adapter,
            parse_policy_document(POLICY).unwrap(),
            default_objects(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_and_remove_role_persist() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = store_with(adapter.clone()).await;
        let ctx = CancellationToken::new();

        assert!(store.add_role(&ctx, "alice", "editor").await.unwrap());
        assert!(!store.add_role(&ctx, "alice", "editor").await.unwrap());
        assert_eq!(
            store.implicit_roles("alice"),
            BTreeSet::from(["editor".to_string(), "viewer".to_string()])
        );
        assert_eq!(adapter.load_groupings().await.unwrap().len(), 1);
        assert_eq!(store.rules_for("alice").len(), 2);

        assert!(store.remove_role(&ctx, "alice", "editor").await.unwrap());
        assert!(store.implicit_roles("alice").is_empty());
        assert!(adapter.load_groupings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_role_rejects_cycle_without_persisting() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = store_with(adapter.clone()).await;
        let ctx = CancellationToken::new();

        let err = store.add_role(&ctx, "viewer", "editor").await.unwrap_err();
        assert!(matches!(err, AuthzError::CyclicRoleInheritance(_)));
        assert!(adapter.load_groupings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_picks_up_stored_rules() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = store_with(adapter.clone()).await;
        let before = store.snapshot();

        adapter
            .add_rule(Permission::new("bob", "playbook", "run", Effect::Allow))
            .await;
        store.reload(&CancellationToken::new()).await.unwrap();

        assert_eq!(store.rules_for("bob").len(), 1);
        // readers holding the old snapshot are unaffected
        assert!(before.rules_for("bob").is_empty());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_snapshot() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = store_with(adapter.clone()).await;

        adapter
            .add_rule(Permission::new("bob", "spaceship", "fly", Effect::Allow))
            .await;
        let err = store.reload(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AuthzError::UnknownObject { .. }));
        assert_eq!(store.rules_for("viewer").len(), 1);

        adapter.set_unavailable(true);
        let err = store.reload(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AuthzError::AdapterUnavailable(_)));
        assert_eq!(store.rules_for("viewer").len(), 1);
    }

    #[tokio::test]
    async fn test_load_fails_on_unknown_object() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter
            .add_rule(Permission::new("bob", "spaceship", "read", Effect::Allow))
            .await;
        let result = PolicyStore::load(
            &CancellationToken::new(),
            adapter,
            ParsedPolicy::default(),
            default_objects(),
        )
        .await;
        assert!(matches!(result, Err(AuthzError::UnknownObject { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_mutation_is_not_published() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = store_with(adapter).await;
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = store.add_role(&ctx, "alice", "editor").await.unwrap_err();
        assert!(matches!(err, AuthzError::Cancelled));
        assert!(store.implicit_roles("alice").is_empty());
    }
}
