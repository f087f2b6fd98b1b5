//! Decision Engine and the [`Engine`] handle hosts embed.
//!
//! A check takes one policy snapshot at entry, collects the rules of every
//! principal the subject acts as, filters them by `(object, action)` and
//! condition, and lets any matching deny outrank every allow. Holders of
//! `admin` skip rule evaluation.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authz::cache::{CacheKind, CacheNotifier, Caches, DecisionKey};
use crate::authz::condition::{evaluate, Functions, Request};
use crate::authz::errors::AuthzError;
use crate::authz::loader::{
    default_objects, load_bootstrap_policy, CompiledRule, PolicySnapshot, RuleCondition,
};
use crate::authz::policy::parse_policy_document;
use crate::authz::scope::{empty_buckets, ScopeAggregator};
use crate::authz::selector::register_predicates;
use crate::authz::store::PolicyStore;
use crate::authz::subject::SubjectResolver;
use crate::authz::types::{
    Action, AttributeBundle, Decision, DecisionReason, Effect, ParsedPolicy, Permission,
    RlsPayload, ADMIN_ROLE, EVERYONE_ROLE,
};
use crate::jobs;
use crate::storage::Adapter;

/// Where the bootstrap role definitions come from.
#[derive(Debug, Clone, Default)]
pub enum PolicySource {
    #[default]
    Embedded,
    File(PathBuf),
    Inline(String),
}

impl PolicySource {
    fn load(&self) -> Result<ParsedPolicy, AuthzError> {
        match self {
            PolicySource::Embedded => load_bootstrap_policy(None),
            PolicySource::File(path) => load_bootstrap_policy(Some(path.as_path())),
            PolicySource::Inline(source) => parse_policy_document(source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: PolicySource,
    pub objects: HashSet<String>,
    pub reload_interval: Duration,
    pub cache_enabled: bool,
    pub decision_ttl: Duration,
    pub subject_ttl: Duration,
    /// Populate `Decision::trace`.
    pub explain: bool,
    /// Start the reload and sweep jobs.
    pub background: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicySource::Embedded,
            objects: default_objects(),
            reload_interval: Duration::from_secs(5 * 60),
            cache_enabled: true,
            decision_ttl: Duration::from_secs(60),
            subject_ttl: Duration::from_secs(2 * 60),
            explain: false,
            background: true,
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<PolicyStore>,
    resolver: SubjectResolver,
    aggregator: ScopeAggregator,
    caches: Arc<Caches>,
    functions: Functions,
    notifier: CacheNotifier,
    lifetime: CancellationToken,
    scheduler: Mutex<Option<JobScheduler>>,
}

/// Cheap to clone; every clone shares the same store, caches and jobs.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.inner.store)
            .field("explain", &self.inner.config.explain)
            .field("cache_enabled", &self.inner.config.cache_enabled)
            .finish()
    }
}

impl Engine {
    /// Loads the bootstrap policy and stored rules, grants `bootstrap_admin`
    /// the admin role and starts background work. An invalid policy is fatal.
    pub async fn init(
        ctx: &CancellationToken,
        config: EngineConfig,
        adapter: Arc<dyn Adapter>,
        bootstrap_admin: Option<&str>,
    ) -> Result<Self, AuthzError> {
        let bootstrap = config.policy.load()?;
        let store = Arc::new(
            PolicyStore::load(ctx, adapter.clone(), bootstrap, config.objects.clone()).await?,
        );

        if let Some(admin) = bootstrap_admin.filter(|s| !s.is_empty()) {
            if store.add_role(ctx, admin, ADMIN_ROLE).await? {
                info!(subject = admin, "Granted bootstrap admin");
            }
        }

        let caches = Arc::new(Caches::new(
            config.cache_enabled,
            config.decision_ttl,
            config.subject_ttl,
        ));
        let mut functions = Functions::with_builtins();
        register_predicates(&mut functions, caches.selectors.clone());

        let lifetime = CancellationToken::new();
        let (notifier, rx) = CacheNotifier::channel();
        jobs::spawn_invalidation_listener(caches.clone(), rx, lifetime.child_token());

        let scheduler = if config.background {
            let sweep_every = config.decision_ttl.min(config.subject_ttl);
            Some(
                jobs::init_scheduler(
                    store.clone(),
                    caches.clone(),
                    config.reload_interval,
                    sweep_every,
                    lifetime.clone(),
                )
                .await?,
            )
        } else {
            None
        };

        let engine = Self {
            inner: Arc::new(EngineInner {
                resolver: SubjectResolver::new(adapter.clone(), store.clone(), caches.clone()),
                aggregator: ScopeAggregator::new(adapter),
                config,
                store,
                caches,
                functions,
                notifier,
                lifetime,
                scheduler: Mutex::new(scheduler),
            }),
        };
        info!(?engine, "Authorization engine ready");
        Ok(engine)
    }

    /// Never fails: policy and persistence errors become a deny with a
    /// reason, and a cancelled `ctx` never yields an allow.
    pub async fn check(
        &self,
        ctx: &CancellationToken,
        subject: &str,
        object: &str,
        action: &str,
        attributes: Option<&AttributeBundle>,
    ) -> Decision {
        let Some(parsed_action) = Action::parse(action) else {
            debug!(subject, object, action, "Unknown action; denying");
            return Decision::deny(DecisionReason::Unauthorized);
        };
        if ctx.is_cancelled() {
            return Decision::deny(DecisionReason::Cancelled);
        }

        let key = DecisionKey {
            subject: subject.to_string(),
            object: object.to_string(),
            action: parsed_action.as_str().to_string(),
            fingerprint: attributes.map(AttributeBundle::fingerprint).unwrap_or_default(),
        };
        if let Some(hit) = self.inner.caches.decisions.get(&key) {
            return hit;
        }
        let generation = self.inner.caches.decisions.generation();

        let decision = match self
            .decide(ctx, subject, object, parsed_action, attributes)
            .await
        {
            Ok(decision) => decision,
            Err(AuthzError::Cancelled) => return Decision::deny(DecisionReason::Cancelled),
            Err(e) => {
                error!(subject, object, action, error = %e, "Check failed; denying");
                return Decision::deny(DecisionReason::InternalError);
            }
        };
        if ctx.is_cancelled() {
            return Decision::deny(DecisionReason::Cancelled);
        }

        debug!(
            subject,
            object,
            action,
            allowed = decision.allowed,
            rule = decision.matched_rule.as_deref().unwrap_or(""),
            "Checked"
        );
        self.inner
            .caches
            .decisions
            .insert_if_current(generation, key, decision.clone());
        decision
    }

    async fn decide(
        &self,
        ctx: &CancellationToken,
        subject: &str,
        object: &str,
        action: Action,
        attributes: Option<&AttributeBundle>,
    ) -> Result<Decision, AuthzError> {
        let snapshot = self.inner.store.snapshot();
        if subject != EVERYONE_ROLE && !snapshot.has_grouping(subject, EVERYONE_ROLE) {
            // effective principals already include `everyone`; this only
            // records the binding
            self.inner.store.add_role(ctx, subject, EVERYONE_ROLE).await?;
        }
        Ok(self.evaluate(&snapshot, subject, object, action, attributes))
    }

    /// Pure evaluation against one snapshot. Reloads published after the
    /// snapshot was taken are not observed.
    fn evaluate(
        &self,
        snapshot: &PolicySnapshot,
        subject: &str,
        object: &str,
        action: Action,
        attributes: Option<&AttributeBundle>,
    ) -> Decision {
        let principals = snapshot.effective_principals(subject);
        if principals.contains(ADMIN_ROLE) {
            return self.admin_decision(snapshot, &principals, object, action);
        }

        let request = Request {
            sub: subject,
            obj: attributes.map(AttributeBundle::to_value).unwrap_or(Value::Null),
            act: action.as_str(),
        };

        let mut trace = self.inner.config.explain.then(Vec::new);
        let mut allow: Option<&CompiledRule> = None;
        let mut deny: Option<&CompiledRule> = None;
        for rule in snapshot.candidates(&principals, object, action) {
            if let Some(trace) = trace.as_mut() {
                trace.push(rule.id().to_string());
            }
            if !self.condition_holds(rule, &request, attributes.is_some()) {
                continue;
            }
            match rule.permission.effect {
                Effect::Deny => {
                    deny = Some(rule);
                    break;
                }
                Effect::Allow => {
                    allow.get_or_insert(rule);
                }
            }
        }

        let mut decision = match (deny, allow) {
            (Some(rule), _) => Decision {
                matched_rule: Some(rule.id().to_string()),
                ..Decision::deny(DecisionReason::Unauthorized)
            },
            (None, Some(rule)) => Decision::allow(rule.id()),
            (None, None) => Decision::deny(DecisionReason::Unauthorized),
        };
        decision.trace = trace;
        decision
    }

    /// `admin` is allowed regardless of any deny reachable through its other
    /// roles. The admin allow rule, when the policy defines one, is reported as
    /// the match.
    fn admin_decision(
        &self,
        snapshot: &PolicySnapshot,
        principals: &BTreeSet<String>,
        object: &str,
        action: Action,
    ) -> Decision {
        let rule_id = snapshot
            .candidates(principals, object, action)
            .into_iter()
            .find(|r| {
                r.permission.principal == ADMIN_ROLE && r.permission.effect == Effect::Allow
            })
            .map(|r| r.id().to_string())
            .unwrap_or_else(|| ADMIN_ROLE.to_string());
        let mut decision = Decision::allow(&rule_id);
        if self.inner.config.explain {
            decision.trace = Some(vec![rule_id]);
        }
        decision
    }

    /// A condition that reads `r.obj` never matches a request without a bundle.
    fn condition_holds(
        &self,
        rule: &CompiledRule,
        request: &Request<'_>,
        has_bundle: bool,
    ) -> bool {
        match &rule.condition {
            RuleCondition::Always => true,
            RuleCondition::Unparseable(_) => false,
            RuleCondition::Expr(expr) if !has_bundle && expr.references_object() => {
                debug!(rule = rule.id(), "Condition needs attributes; rule skipped");
                false
            }
            RuleCondition::Expr(expr) => match evaluate(expr, request, &self.inner.functions) {
                Ok(holds) => holds,
                Err(e) => {
                    warn!(rule = rule.id(), error = %e, "Condition evaluation failed; rule skipped");
                    false
                }
            },
        }
    }

    pub async fn add_role(
        &self,
        ctx: &CancellationToken,
        subject: &str,
        role: &str,
    ) -> Result<(), AuthzError> {
        if self.inner.store.add_role(ctx, subject, role).await? {
            self.invalidate_roles();
        }
        Ok(())
    }

    pub async fn remove_role(
        &self,
        ctx: &CancellationToken,
        subject: &str,
        role: &str,
    ) -> Result<(), AuthzError> {
        if self.inner.store.remove_role(ctx, subject, role).await? {
            self.invalidate_roles();
        }
        Ok(())
    }

    /// A role change can alter every subject inheriting through it.
    fn invalidate_roles(&self) {
        self.inner.caches.flush(CacheKind::Decision);
        self.inner.caches.flush(CacheKind::Subject);
    }

    pub async fn roles_for(
        &self,
        ctx: &CancellationToken,
        subject: &str,
    ) -> Result<Vec<String>, AuthzError> {
        let resolved = self.inner.resolver.resolve(ctx, subject).await?;
        Ok(resolved.roles.iter().cloned().collect())
    }

    /// Rules of the subject and every role it holds, `everyone` included.
    pub async fn permissions_for(
        &self,
        ctx: &CancellationToken,
        subject: &str,
    ) -> Result<Vec<Permission>, AuthzError> {
        if ctx.is_cancelled() {
            return Err(AuthzError::Cancelled);
        }
        let snapshot = self.inner.store.snapshot();
        let principals = snapshot.effective_principals(subject);
        Ok(snapshot
            .rules()
            .iter()
            .filter(|r| principals.contains(&r.permission.principal))
            .map(|r| r.permission.clone())
            .collect())
    }

    /// Computed once per cached subject resolution.
    pub async fn rls_payload_for(
        &self,
        ctx: &CancellationToken,
        subject: &str,
    ) -> Result<RlsPayload, AuthzError> {
        let resolved = self.inner.resolver.resolve(ctx, subject).await?;
        let payload = resolved
            .rls
            .get_or_try_init(|| self.inner.aggregator.payload_for(ctx, &resolved))
            .await?;

        let empty = empty_buckets(payload);
        if !empty.is_empty() {
            debug!(subject, ?empty, "RLS payload has buckets without filters");
        }
        Ok(payload.clone())
    }

    pub fn flush_cache(&self, kind: Option<CacheKind>) {
        self.inner.caches.flush(kind.unwrap_or_default());
    }

    /// Handle for out-of-band invalidations.
    pub fn notifier(&self) -> CacheNotifier {
        self.inner.notifier.clone()
    }

    /// Reloads the Policy Store now instead of waiting for the next tick.
    pub async fn reload(&self, ctx: &CancellationToken) -> Result<(), AuthzError> {
        jobs::reload_policy(&self.inner.store, &self.inner.caches, ctx).await
    }

    pub fn explain_enabled(&self) -> bool {
        self.inner.config.explain
    }

    /// Stops background jobs and the invalidation listener.
    pub async fn shutdown(&self) -> Result<(), AuthzError> {
        self.inner.lifetime.cancel();
        if let Some(mut scheduler) = self.inner.scheduler.lock().await.take() {
            scheduler.shutdown().await?;
        }
        info!("Authorization engine stopped");
        Ok(())
    }
}
