//! Scope Aggregator: turns a subject's AccessScopes and ScopeBindings into an
//! [`RlsPayload`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::authz::cancellable;
use crate::authz::errors::AuthzError;
use crate::authz::selector::{LabelSelector, Requirement};
use crate::authz::subject::ResolvedSubject;
use crate::authz::types::{
    AccessScope, RlsPayload, RlsResource, RlsScope, ScopeBinding, ScopeResourceSelector,
};
use crate::storage::Adapter;

const NAMESPACE_TAG: &str = "namespace";

#[derive(Debug, Clone)]
pub struct ScopeAggregator {
    adapter: Arc<dyn Adapter>,
}

/// Agent lookups memoized for one aggregation run.
struct AgentResolver<'a> {
    adapter: &'a dyn Adapter,
    ctx: &'a CancellationToken,
    seen: HashMap<String, Option<String>>,
}

impl AgentResolver<'_> {
    async fn resolve(&mut self, id_or_name: &str) -> Result<Option<String>, AuthzError> {
        if let Some(known) = self.seen.get(id_or_name) {
            return Ok(known.clone());
        }
        let resolved = cancellable(self.ctx, self.adapter.resolve_agent(id_or_name)).await?;
        if resolved.is_none() {
            let err = AuthzError::UnresolvedReference(format!("agent `{id_or_name}`"));
            tracing::warn!(agent = id_or_name, error = %err, "Dropping unresolved agent");
        }
        self.seen.insert(id_or_name.to_string(), resolved.clone());
        Ok(resolved)
    }
}

impl ScopeAggregator {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }

    /// Union of the AccessScope and ScopeBinding pipelines. Entries are
    /// deduplicated within each resource type.
    pub async fn payload_for(
        &self,
        ctx: &CancellationToken,
        subject: &ResolvedSubject,
    ) -> Result<RlsPayload, AuthzError> {
        let mut payload = RlsPayload::default();
        let mut agents = AgentResolver {
            adapter: self.adapter.as_ref(),
            ctx,
            seen: HashMap::new(),
        };

        for scope in subject.all_access_scopes() {
            self.push_access_scope(&mut payload, &mut agents, scope)
                .await?;
        }
        for binding in subject.all_scope_bindings() {
            self.push_binding(ctx, &mut payload, &mut agents, binding)
                .await?;
        }
        Ok(payload)
    }

    async fn push_access_scope(
        &self,
        payload: &mut RlsPayload,
        agents: &mut AgentResolver<'_>,
        scope: &AccessScope,
    ) -> Result<(), AuthzError> {
        if let Err(err) = scope.validate() {
            tracing::warn!(access_scope = %scope.id, error = %err, "Ignoring invalid access scope");
            return Ok(());
        }
        let criteria = match scope.criteria() {
            Ok(criteria) => criteria,
            Err(err) => {
                tracing::warn!(access_scope = %scope.id, error = %err, "Ignoring access scope with malformed criteria");
                return Ok(());
            }
        };

        for criterion in criteria {
            let named_agents = !criterion.agents.is_empty();
            let mut resolved = Vec::new();
            for agent in &criterion.agents {
                if let Some(id) = agents.resolve(agent).await? {
                    if !resolved.contains(&id) {
                        resolved.push(id);
                    }
                }
            }

            let entry = RlsScope {
                tags: criterion.tags,
                agents: resolved,
                names: criterion.names,
            };
            // every named agent was unknown and nothing else restricts the criterion
            if named_agents && entry.is_unrestricted() {
                tracing::warn!(access_scope = %scope.id, "Dropping criterion whose agents are all unresolved");
                continue;
            }

            for resource in &scope.resources {
                for bucket in resource.expand() {
                    payload.push(bucket, entry.clone());
                }
            }
        }
        Ok(())
    }

    async fn push_binding(
        &self,
        ctx: &CancellationToken,
        payload: &mut RlsPayload,
        agents: &mut AgentResolver<'_>,
        binding: &ScopeBinding,
    ) -> Result<(), AuthzError> {
        if let Err(err) = binding.validate() {
            tracing::warn!(binding = %binding.name, error = %err, "Ignoring invalid scope binding");
            return Ok(());
        }

        for name in &binding.scopes {
            let Some(scope) =
                cancellable(ctx, self.adapter.load_scope(&binding.namespace, name)).await?
            else {
                let err = AuthzError::UnresolvedReference(format!(
                    "scope `{}/{name}`",
                    binding.namespace
                ));
                tracing::warn!(binding = %binding.name, error = %err, "Skipping missing scope");
                continue;
            };

            for target in &scope.targets {
                let (kind, selector) = match target.resolve() {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        tracing::warn!(scope = %scope.name, error = %err, "Skipping invalid scope target");
                        continue;
                    }
                };
                let Some(entry) = target_entry(&scope.name, selector, agents).await? else {
                    continue;
                };
                for bucket in kind.buckets() {
                    payload.push(bucket, entry.clone());
                }
            }
        }
        Ok(())
    }
}

async fn target_entry(
    scope: &str,
    selector: &ScopeResourceSelector,
    agents: &mut AgentResolver<'_>,
) -> Result<Option<RlsScope>, AuthzError> {
    let mut tags = match selector.tag_selector.as_deref() {
        Some(raw) if !raw.trim().is_empty() => match tag_map(raw) {
            Ok(tags) => tags,
            Err(err) => {
                tracing::warn!(scope, error = %err, "Skipping scope target with invalid tag selector");
                return Ok(None);
            }
        },
        _ => BTreeMap::new(),
    };
    if let Some(namespace) = selector.namespace.as_deref().filter(|n| !n.is_empty()) {
        tags.entry(NAMESPACE_TAG.to_string())
            .or_insert_with(|| namespace.to_string());
    }

    let mut entry = RlsScope {
        tags,
        ..Default::default()
    };
    if let Some(name) = selector.name.as_deref().filter(|n| !n.is_empty()) {
        entry.names.push(name.to_string());
    }

    if let Some(agent) = selector.agent.as_deref().filter(|a| !a.is_empty()) {
        match agents.resolve(agent).await? {
            Some(id) => entry.agents.push(id),
            None if entry.is_unrestricted() => return Ok(None),
            None => {}
        }
    }
    Ok(Some(entry))
}

/// Equality terms of a tag selector. Other requirement kinds cannot be
/// expressed in an RLS entry and are dropped with a warning.
fn tag_map(raw: &str) -> Result<BTreeMap<String, String>, AuthzError> {
    let selector = LabelSelector::parse(raw)?;
    for requirement in selector.requirements() {
        if !matches!(requirement, Requirement::Equals(..)) {
            tracing::warn!(selector = raw, ?requirement, "Ignoring non-equality tag requirement");
        }
    }
    Ok(selector.equalities())
}

/// Buckets a payload has no entries for.
pub fn empty_buckets(payload: &RlsPayload) -> Vec<RlsResource> {
    RlsResource::ALL
        .into_iter()
        .filter(|r| payload.get(*r).is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::{AccessScopeResource, Scope, ScopeTarget};
    use crate::storage::MemoryAdapter;
    use serde_json::json;

    fn access_scope(id: &str, resources: Vec<AccessScopeResource>, scopes: serde_json::Value) -> AccessScope {
        AccessScope {
            id: id.into(),
            name: id.into(),
            namespace: "default".into(),
            person_id: Some("p1".into()),
            team_id: None,
            resources,
            scopes,
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn aggregate(adapter: Arc<MemoryAdapter>, subject: ResolvedSubject) -> RlsPayload {
        ScopeAggregator::new(adapter)
            .payload_for(&CancellationToken::new(), &subject)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_wildcard_resources_expand_to_every_bucket() {
        let subject = ResolvedSubject {
            access_scopes: vec![access_scope(
                "as-1",
                vec![AccessScopeResource::All],
                json!([{ "tags": { "cluster": "homelab" } }]),
            )],
            ..Default::default()
        };
        let payload = aggregate(Arc::new(MemoryAdapter::new()), subject).await;
        let expected = RlsScope {
            tags: tags(&[("cluster", "homelab")]),
            ..Default::default()
        };
        for resource in RlsResource::ALL {
            assert_eq!(payload.get(resource), &[expected.clone()]);
        }
    }

    #[tokio::test]
    async fn test_agents_resolve_and_unknown_agents_drop() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.add_agent("id-1", "agent-1").await;
        let subject = ResolvedSubject {
            team_access_scopes: vec![access_scope(
                "as-1",
                vec![AccessScopeResource::Component],
                json!([
                    { "agents": ["agent-1", "ghost"] },
                    { "agents": ["ghost"] },
                    { "agents": ["ghost"], "names": ["api-*"] }
                ]),
            )],
            ..Default::default()
        };
        let payload = aggregate(adapter, subject).await;
        assert_eq!(
            payload.component,
            vec![
                RlsScope {
                    agents: vec!["id-1".into()],
                    ..Default::default()
                },
                RlsScope {
                    names: vec!["api-*".into()],
                    ..Default::default()
                },
            ]
        );
        assert!(payload.config.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_entries_collapse() {
        let scope = access_scope(
            "as-1",
            vec![AccessScopeResource::Config],
            json!([{ "tags": { "env": "prod" } }]),
        );
        let subject = ResolvedSubject {
            access_scopes: vec![scope.clone()],
            team_access_scopes: vec![scope],
            ..Default::default()
        };
        let payload = aggregate(Arc::new(MemoryAdapter::new()), subject).await;
        assert_eq!(payload.config.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_access_scope_is_skipped() {
        let mut orphan = access_scope("as-2", vec![AccessScopeResource::Config], json!([]));
        orphan.person_id = None;
        let subject = ResolvedSubject {
            access_scopes: vec![
                access_scope("as-1", vec![AccessScopeResource::Config], json!("not json")),
                orphan,
            ],
            ..Default::default()
        };
        let payload = aggregate(Arc::new(MemoryAdapter::new()), subject).await;
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_binding_pipeline() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.add_agent("id-9", "edge").await;
        adapter
            .add_scope(Scope {
                name: "prod-configs".into(),
                namespace: "ns1".into(),
                targets: vec![
                    ScopeTarget {
                        config: Some(ScopeResourceSelector {
                            name: Some("prod-*".into()),
                            tag_selector: Some("env=prod, tier in (web)".into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    ScopeTarget {
                        global: Some(ScopeResourceSelector {
                            agent: Some("edge".into()),
                            namespace: Some("ops".into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
            })
            .await
            .unwrap();

        let subject = ResolvedSubject {
            scope_bindings: vec![ScopeBinding {
                name: "b1".into(),
                namespace: "ns1".into(),
                persons: vec!["a@x".into()],
                teams: vec![],
                scopes: vec!["prod-configs".into(), "missing".into()],
            }],
            ..Default::default()
        };
        let payload = aggregate(adapter, subject).await;

        let global = RlsScope {
            tags: tags(&[("namespace", "ops")]),
            agents: vec!["id-9".into()],
            names: vec![],
        };
        assert_eq!(
            payload.config,
            vec![
                RlsScope {
                    tags: tags(&[("env", "prod")]),
                    agents: vec![],
                    names: vec!["prod-*".into()],
                },
                global.clone(),
            ]
        );
        assert_eq!(payload.playbook, vec![global.clone()]);
        assert_eq!(payload.canary, vec![global.clone()]);
        assert_eq!(payload.component, vec![global]);
    }

    #[tokio::test]
    async fn test_target_with_only_unknown_agent_is_dropped() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter
            .add_scope(Scope {
                name: "s".into(),
                namespace: "ns1".into(),
                targets: vec![ScopeTarget {
                    playbook: Some(ScopeResourceSelector {
                        agent: Some("ghost".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
            })
            .await
            .unwrap();
        let subject = ResolvedSubject {
            team_scope_bindings: vec![ScopeBinding {
                name: "b".into(),
                namespace: "ns1".into(),
                persons: vec![],
                teams: vec!["sre".into()],
                scopes: vec!["s".into()],
            }],
            ..Default::default()
        };
        let payload = aggregate(adapter, subject).await;
        assert!(payload.is_empty());
        assert_eq!(empty_buckets(&payload).len(), 4);
    }

    #[tokio::test]
    async fn test_adapter_failure_propagates() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.set_unavailable(true);
        let subject = ResolvedSubject {
            access_scopes: vec![access_scope(
                "as-1",
                vec![AccessScopeResource::Config],
                json!([{ "agents": ["agent-1"] }]),
            )],
            ..Default::default()
        };
        let err = ScopeAggregator::new(adapter)
            .payload_for(&CancellationToken::new(), &subject)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::AdapterUnavailable(_)));
    }
}
