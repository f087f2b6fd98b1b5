use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::authz::errors::AuthzError;

/// Role every subject implicitly holds.
pub const EVERYONE_ROLE: &str = "everyone";
pub const ADMIN_ROLE: &str = "admin";
pub const WILDCARD: &str = "*";

// ---------- Subjects ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Person,
    Team,
    Service,
    Group,
}

/// An identified principal. The engine only looks at `id`; kind and email are
/// carried for hosts and adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub kind: SubjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// ---------- Policy domain types ----------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Effect::Allow),
            "deny" => Some(Effect::Deny),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "run")]
    Run,
    #[serde(rename = "approve")]
    Approve,
    #[serde(rename = "*")]
    Any,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Read,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Run,
        Action::Approve,
        Action::Any,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Run => "run",
            Action::Approve => "approve",
            Action::Any => WILDCARD,
        }
    }

    /// `*` matches in either position.
    pub fn matches(&self, requested: Action) -> bool {
        *self == Action::Any || requested == Action::Any || *self == requested
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored rule. Objects and actions are kept as strings here and
/// validated when the policy snapshot is compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub principal: String,
    pub object: String,
    pub action: String,
    #[serde(default)]
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Permission {
    pub fn new(principal: &str, object: &str, action: &str, effect: Effect) -> Self {
        Self {
            id: format!("{principal}:{object}:{action}:{effect}"),
            principal: principal.to_string(),
            object: object.to_string(),
            action: action.to_string(),
            effect,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }
}

/// `principal` receives everything `inherited` has.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grouping {
    pub principal: String,
    pub inherited: String,
}

impl Grouping {
    pub fn new(principal: &str, inherited: &str) -> Self {
        Self {
            principal: principal.to_string(),
            inherited: inherited.to_string(),
        }
    }
}

/// Intermediate result of parsing a bootstrap policy document.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub rules: Vec<Permission>,
    pub groupings: Vec<Grouping>,
}

// ---------- Attribute bundles ----------

/// Attributes of one resource record as seen by rule conditions and selectors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ResourceAttributes {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }
}

/// Reference to a Scope resource by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRef {
    pub namespace: String,
    pub name: String,
}

/// Per-request context evaluated by rule conditions (`r.obj`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ResourceAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ResourceAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<ResourceAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<ResourceAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ResourceAttributes>,
    /// Scopes the requested resource falls in, as computed by the host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ScopeRef>,
}

impl AttributeBundle {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Stable hex digest of the bundle. Maps serialize with sorted keys, so
    /// equal bundles always produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

// ---------- Visibility resources ----------

/// Resource tables covered by row-level security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RlsResource {
    Config,
    Component,
    Canary,
    Playbook,
}

impl RlsResource {
    pub const ALL: [RlsResource; 4] = [
        RlsResource::Config,
        RlsResource::Component,
        RlsResource::Canary,
        RlsResource::Playbook,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScopeResource {
    #[serde(rename = "*")]
    All,
    Config,
    Component,
    Playbook,
    Canary,
}

impl AccessScopeResource {
    pub fn expand(&self) -> Vec<RlsResource> {
        match self {
            AccessScopeResource::All => RlsResource::ALL.to_vec(),
            AccessScopeResource::Config => vec![RlsResource::Config],
            AccessScopeResource::Component => vec![RlsResource::Component],
            AccessScopeResource::Playbook => vec![RlsResource::Playbook],
            AccessScopeResource::Canary => vec![RlsResource::Canary],
        }
    }
}

/// One criterion of an AccessScope. Fields AND together; tags AND across keys,
/// agents and names OR within their lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCriterion {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
}

/// Binds a person or a team to visible resource types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessScope {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub person_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    pub resources: Vec<AccessScopeResource>,
    /// Criteria as stored: either a JSON array or a string holding one.
    #[serde(default)]
    pub scopes: serde_json::Value,
}

impl AccessScope {
    pub fn validate(&self) -> Result<(), AuthzError> {
        match (&self.person_id, &self.team_id) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (None, None) => Err(AuthzError::InvalidInput(format!(
                "access scope `{}` has neither a person nor a team",
                self.name
            ))),
            (Some(_), Some(_)) => Err(AuthzError::InvalidInput(format!(
                "access scope `{}` names both a person and a team",
                self.name
            ))),
        }
    }

    pub fn criteria(&self) -> Result<Vec<ScopeCriterion>, AuthzError> {
        let parsed = match &self.scopes {
            serde_json::Value::Null => return Ok(Vec::new()),
            serde_json::Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| {
            AuthzError::InvalidInput(format!(
                "access scope `{}` has malformed scopes: {e}",
                self.name
            ))
        })
    }
}

/// Selector on one ScopeTarget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeResourceSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeResourceType {
    Config,
    Component,
    Playbook,
    Canary,
    All,
}

impl ScopeResourceType {
    pub fn buckets(&self) -> Vec<RlsResource> {
        match self {
            ScopeResourceType::Config => vec![RlsResource::Config],
            ScopeResourceType::Component => vec![RlsResource::Component],
            ScopeResourceType::Playbook => vec![RlsResource::Playbook],
            ScopeResourceType::Canary => vec![RlsResource::Canary],
            ScopeResourceType::All => RlsResource::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ScopeResourceSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ScopeResourceSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<ScopeResourceSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<ScopeResourceSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<ScopeResourceSelector>,
}

impl ScopeTarget {
    /// Returns the single resource type this target names.
    pub fn resolve(&self) -> Result<(ScopeResourceType, &ScopeResourceSelector), AuthzError> {
        let set: Vec<(ScopeResourceType, &ScopeResourceSelector)> = [
            (ScopeResourceType::Config, self.config.as_ref()),
            (ScopeResourceType::Component, self.component.as_ref()),
            (ScopeResourceType::Playbook, self.playbook.as_ref()),
            (ScopeResourceType::Canary, self.canary.as_ref()),
            (ScopeResourceType::All, self.global.as_ref()),
        ]
        .into_iter()
        .filter_map(|(t, sel)| sel.map(|s| (t, s)))
        .collect();

        match set.as_slice() {
            [single] => Ok(*single),
            [] => Err(AuthzError::InvalidInput(
                "scope target names no resource type".into(),
            )),
            _ => Err(AuthzError::InvalidInput(
                "scope target names more than one resource type".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub targets: Vec<ScopeTarget>,
}

/// Associates people (by email) and teams (by name) with Scopes in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeBinding {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ScopeBinding {
    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.persons.is_empty() && self.teams.is_empty() {
            return Err(AuthzError::InvalidInput(format!(
                "scope binding `{}/{}` names no subjects",
                self.namespace, self.name
            )));
        }
        Ok(())
    }
}

// ---------- RLS payload ----------

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RlsScope {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
}

impl RlsScope {
    /// No restriction at all: admits every row of its resource type.
    pub fn is_unrestricted(&self) -> bool {
        self.tags.is_empty() && self.agents.is_empty() && self.names.is_empty()
    }
}

/// Per-resource-type visibility filters. Entries in one list are disjunctive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlsPayload {
    #[serde(default)]
    pub config: Vec<RlsScope>,
    #[serde(default)]
    pub component: Vec<RlsScope>,
    #[serde(default)]
    pub canary: Vec<RlsScope>,
    #[serde(default)]
    pub playbook: Vec<RlsScope>,
}

impl RlsPayload {
    pub fn get(&self, resource: RlsResource) -> &[RlsScope] {
        match resource {
            RlsResource::Config => &self.config,
            RlsResource::Component => &self.component,
            RlsResource::Canary => &self.canary,
            RlsResource::Playbook => &self.playbook,
        }
    }

    fn bucket_mut(&mut self, resource: RlsResource) -> &mut Vec<RlsScope> {
        match resource {
            RlsResource::Config => &mut self.config,
            RlsResource::Component => &mut self.component,
            RlsResource::Canary => &mut self.canary,
            RlsResource::Playbook => &mut self.playbook,
        }
    }

    /// Appends `entry` unless an equal entry is already present.
    pub fn push(&mut self, resource: RlsResource, entry: RlsScope) {
        let bucket = self.bucket_mut(resource);
        if !bucket.contains(&entry) {
            bucket.push(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        RlsResource::ALL.iter().all(|r| self.get(*r).is_empty())
    }
}

// ---------- Decisions ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    /// No rule allowed the request, or a deny rule matched.
    Unauthorized,
    /// The persistence layer failed while resolving the request.
    InternalError,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DecisionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<String>>,
}

impl Decision {
    pub fn allow(rule: &str) -> Self {
        Self {
            allowed: true,
            reason: None,
            matched_rule: Some(rule.to_string()),
            trace: None,
        }
    }

    pub fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            matched_rule: None,
            trace: None,
        }
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Absent when the caller is unauthenticated.
    #[serde(default)]
    pub subject: Option<String>,
    /// e.g. "playbook"
    pub object: String,
    /// e.g. "run"
    pub action: String,
    #[serde(default)]
    pub attributes: Option<AttributeBundle>,
}
