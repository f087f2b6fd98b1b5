//! Resource selectors and the predicates that expose them to conditions.
//!
//! A [`ResourceSelector`] is a structured predicate over one
//! [`ResourceAttributes`] record. Populated fields AND together; an empty
//! selector matches nothing. Selectors embedded in rule conditions arrive as
//! base64-encoded JSON [`ObjectSelector`]s and are parsed once per raw string.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64ct::{Base64, Base64Unpadded, Base64Url, Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::cache::ParseCache;
use crate::authz::condition::{EvalValue, Functions};
use crate::authz::errors::AuthzError;
use crate::authz::types::{AttributeBundle, ResourceAttributes, ScopeRef, WILDCARD};

const SELF_AGENT: &str = "self";
const NIL_AGENT_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Glob match where `*` is the only metacharacter.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }

    let (mut p_idx, mut v_idx) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);
    let pattern_bytes = pattern.as_bytes();
    let value_bytes = value.as_bytes();

    while v_idx < value_bytes.len() {
        if p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
            star_idx = Some(p_idx);
            match_idx = v_idx;
            p_idx += 1;
            continue;
        }

        if p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == value_bytes[v_idx] {
            p_idx += 1;
            v_idx += 1;
            continue;
        }

        if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            v_idx = match_idx;
            continue;
        }

        return false;
    }

    while p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
        p_idx += 1;
    }

    p_idx == pattern_bytes.len()
}

// ─── Label selectors ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|l| values.contains(l)),
            Requirement::NotIn(k, values) => !labels.get(k).is_some_and(|l| values.contains(l)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// Kubernetes label-selector grammar over a string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let mut requirements = Vec::new();
        for term in split_top_level(raw) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(term)?);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// The `k=v` terms as a map; other requirement kinds are not representable.
    pub fn equalities(&self) -> BTreeMap<String, String> {
        self.requirements
            .iter()
            .filter_map(|r| match r {
                Requirement::Equals(k, v) => Some((k.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Splits on commas that are not inside parentheses.
fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

fn parse_requirement(term: &str) -> Result<Requirement, AuthzError> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(valid_key(key.trim(), term)?));
    }

    if term.contains('(') {
        let (key, rest) = term
            .split_once(char::is_whitespace)
            .ok_or_else(|| AuthzError::InvalidSelector(format!("malformed set term `{term}`")))?;
        let rest = rest.trim_start();
        let (negated, list) = if let Some(list) = rest.strip_prefix("notin") {
            (true, list)
        } else if let Some(list) = rest.strip_prefix("in") {
            (false, list)
        } else {
            return Err(AuthzError::InvalidSelector(format!(
                "expected `in` or `notin` in `{term}`"
            )));
        };
        let values = list
            .trim()
            .strip_prefix('(')
            .and_then(|l| l.strip_suffix(')'))
            .ok_or_else(|| {
                AuthzError::InvalidSelector(format!("set values must be parenthesised in `{term}`"))
            })?
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        let key = valid_key(key, term)?;
        return Ok(if negated {
            Requirement::NotIn(key, values)
        } else {
            Requirement::In(key, values)
        });
    }

    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(
            valid_key(k.trim(), term)?,
            v.trim().to_string(),
        ));
    }
    if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(
            valid_key(k.trim(), term)?,
            v.trim().to_string(),
        ));
    }

    Ok(Requirement::Exists(valid_key(term, term)?))
}

fn valid_key(key: &str, term: &str) -> Result<String, AuthzError> {
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(AuthzError::InvalidSelector(format!(
            "invalid key in selector term `{term}`"
        )));
    }
    Ok(key.to_string())
}

// ─── Resource selectors ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Glob with `*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Globs over the resource type; any may match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// Agent id, agent name, or `self` for resources without an agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

fn blank(field: &Option<String>) -> bool {
    field.as_deref().map(str::trim).unwrap_or("").is_empty()
}

impl ResourceSelector {
    pub fn is_empty(&self) -> bool {
        blank(&self.id)
            && blank(&self.name)
            && blank(&self.namespace)
            && self.types.is_empty()
            && blank(&self.agent)
            && blank(&self.tag_selector)
            && blank(&self.label_selector)
            && blank(&self.search)
    }

    /// `{name: "*"}` with nothing else: selects every resource of its class.
    pub fn is_wildcard(&self) -> bool {
        self.name.as_deref() == Some(WILDCARD)
            && Self {
                name: None,
                ..self.clone()
            }
            .is_empty()
    }

    pub fn matches(
        &self,
        resource: &ResourceAttributes,
        cache: &SelectorCache,
    ) -> Result<bool, AuthzError> {
        if self.is_empty() {
            return Ok(false);
        }
        if self.is_wildcard() {
            return Ok(true);
        }

        if let Some(id) = self.id.as_deref().filter(|s| !s.is_empty()) {
            if resource.id.as_deref() != Some(id) {
                return Ok(false);
            }
        }
        if let Some(pattern) = self.name.as_deref().filter(|s| !s.is_empty()) {
            if !wildcard_match(pattern, resource.name.as_deref().unwrap_or("")) {
                return Ok(false);
            }
        }
        if let Some(namespace) = self.namespace.as_deref().filter(|s| !s.is_empty()) {
            if resource.namespace.as_deref() != Some(namespace) {
                return Ok(false);
            }
        }
        if !self.types.is_empty() {
            let kind = resource.kind.as_deref().unwrap_or("");
            if !self.types.iter().any(|t| wildcard_match(t, kind)) {
                return Ok(false);
            }
        }
        if let Some(agent) = self.agent.as_deref().filter(|s| !s.is_empty()) {
            if !agent_matches(agent, resource) {
                return Ok(false);
            }
        }
        if let Some(raw) = self.tag_selector.as_deref().filter(|s| !s.trim().is_empty()) {
            if !cache.label(raw)?.matches(&resource.tags) {
                return Ok(false);
            }
        }
        if let Some(raw) = self.label_selector.as_deref().filter(|s| !s.trim().is_empty()) {
            if !cache.label(raw)?.matches(&resource.labels) {
                return Ok(false);
            }
        }
        if let Some(query) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            if !search_matches(query, resource) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn agent_matches(agent: &str, resource: &ResourceAttributes) -> bool {
    let agent_id = resource.agent_id.as_deref().unwrap_or("");
    if agent == SELF_AGENT {
        return agent_id.is_empty() || agent_id == NIL_AGENT_ID;
    }
    agent_id == agent || resource.agent_name.as_deref() == Some(agent)
}

/// Free-text filter: whitespace separated `key=v1,v2` terms, `!`-prefixed
/// values exclude, bare terms glob the name.
fn search_matches(query: &str, resource: &ResourceAttributes) -> bool {
    query.split_whitespace().all(|term| {
        let Some((key, values)) = term.split_once('=') else {
            return wildcard_match(term, resource.name.as_deref().unwrap_or(""));
        };
        let field = search_field(key, resource);
        let (excludes, includes): (Vec<&str>, Vec<&str>) = values
            .split(',')
            .filter(|v| !v.is_empty())
            .partition(|v| v.starts_with('!'));

        let included = includes.is_empty()
            || field.is_some_and(|f| includes.iter().any(|p| wildcard_match(p, f)));
        let excluded = field.is_some_and(|f| {
            excludes
                .iter()
                .any(|p| wildcard_match(p.trim_start_matches('!'), f))
        });
        included && !excluded
    })
}

fn search_field<'a>(key: &str, resource: &'a ResourceAttributes) -> Option<&'a str> {
    match key {
        "id" => resource.id.as_deref(),
        "name" => resource.name.as_deref(),
        "namespace" => resource.namespace.as_deref(),
        "type" => resource.kind.as_deref(),
        "agent" => resource
            .agent_id
            .as_deref()
            .or(resource.agent_name.as_deref()),
        _ => {
            if let Some(tag) = key.strip_prefix("tags.") {
                resource.tags.get(tag).map(String::as_str)
            } else if let Some(label) = key.strip_prefix("labels.") {
                resource.labels.get(label).map(String::as_str)
            } else {
                resource
                    .tags
                    .get(key)
                    .or_else(|| resource.labels.get(key))
                    .map(String::as_str)
            }
        }
    }
}

// ─── Object selectors ───────────────────────────────────────────────────

/// Selector object embedded in `matchResourceSelector` conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub playbooks: Vec<ResourceSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<ResourceSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ResourceSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<ResourceSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ResourceSelector>,
}

impl ObjectSelector {
    pub fn decode(encoded: &str) -> Result<Self, AuthzError> {
        let encoded = encoded.trim();
        let bytes = Base64::decode_vec(encoded)
            .or_else(|_| Base64Unpadded::decode_vec(encoded))
            .or_else(|_| Base64Url::decode_vec(encoded))
            .or_else(|_| Base64UrlUnpadded::decode_vec(encoded))
            .map_err(|e| AuthzError::InvalidSelector(format!("selector is not base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthzError::InvalidSelector(format!("selector is not valid JSON: {e}")))
    }

    pub fn encode(&self) -> String {
        Base64::encode_string(&serde_json::to_vec(self).unwrap_or_default())
    }

    fn fields(&self) -> [&[ResourceSelector]; 5] {
        [
            &self.playbooks,
            &self.configs,
            &self.components,
            &self.views,
            &self.scopes,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|f| f.is_empty())
    }

    /// Every populated field holds a wildcard: the selector covers the whole
    /// object class and needs no attributes to evaluate.
    pub fn is_global(&self) -> bool {
        !self.is_empty()
            && self
                .fields()
                .iter()
                .filter(|f| !f.is_empty())
                .all(|f| f.iter().any(ResourceSelector::is_wildcard))
    }

    /// AND across populated fields, OR within a field. A selector with no
    /// populated fields grants nothing.
    pub fn matches(
        &self,
        bundle: Option<&AttributeBundle>,
        cache: &SelectorCache,
    ) -> Result<bool, AuthzError> {
        if self.is_empty() {
            return Ok(false);
        }
        let pairs: [(&[ResourceSelector], Option<&ResourceAttributes>); 4] = [
            (&self.playbooks, bundle.and_then(|b| b.playbook.as_ref())),
            (&self.configs, bundle.and_then(|b| b.config.as_ref())),
            (&self.components, bundle.and_then(|b| b.component.as_ref())),
            (&self.views, bundle.and_then(|b| b.view.as_ref())),
        ];
        for (selectors, resource) in pairs {
            if !field_matches(selectors, resource.into_iter(), cache)? {
                return Ok(false);
            }
        }

        let scopes: Vec<ResourceAttributes> = bundle
            .map(|b| b.scopes.iter().map(scope_attributes).collect())
            .unwrap_or_default();
        field_matches(&self.scopes, scopes.iter(), cache)
    }
}

fn field_matches<'a>(
    selectors: &[ResourceSelector],
    resources: impl Iterator<Item = &'a ResourceAttributes> + Clone,
    cache: &SelectorCache,
) -> Result<bool, AuthzError> {
    if selectors.is_empty() || selectors.iter().any(ResourceSelector::is_wildcard) {
        return Ok(true);
    }
    for selector in selectors {
        for resource in resources.clone() {
            if selector.matches(resource, cache)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn scope_attributes(scope: &ScopeRef) -> ResourceAttributes {
    ResourceAttributes {
        name: Some(scope.name.clone()),
        namespace: Some(scope.namespace.clone()),
        ..Default::default()
    }
}

// ─── Parse cache and predicates ─────────────────────────────────────────

/// Memoized parses keyed by the raw selector string. Parsed forms are pure,
/// so entries never expire.
#[derive(Debug)]
pub struct SelectorCache {
    objects: ParseCache<ObjectSelector>,
    labels: ParseCache<LabelSelector>,
}

impl Default for SelectorCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SelectorCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            objects: ParseCache::new(enabled),
            labels: ParseCache::new(enabled),
        }
    }

    pub fn object(&self, encoded: &str) -> Result<Arc<ObjectSelector>, AuthzError> {
        self.objects.get_or_parse(encoded, ObjectSelector::decode)
    }

    pub fn label(&self, raw: &str) -> Result<Arc<LabelSelector>, AuthzError> {
        self.labels.get_or_parse(raw, LabelSelector::parse)
    }

    pub fn flush(&self) {
        self.objects.flush();
        self.labels.flush();
    }

    pub fn len(&self) -> usize {
        self.objects.len() + self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn bundle_from(value: &EvalValue) -> Result<Option<AttributeBundle>, AuthzError> {
    match value {
        EvalValue::Null => Ok(None),
        EvalValue::Object(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| AuthzError::InvalidCondition(format!("object is not an attribute bundle: {e}"))),
        other => Err(AuthzError::InvalidCondition(format!(
            "expected an attribute bundle, got {other:?}"
        ))),
    }
}

fn string_list(value: &EvalValue) -> Vec<String> {
    match value {
        EvalValue::Str(s) => s
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        EvalValue::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn tag_map(value: &EvalValue, cache: &SelectorCache) -> Result<BTreeMap<String, String>, AuthzError> {
    match value {
        EvalValue::Str(s) => Ok(cache.label(s)?.equalities()),
        EvalValue::Object(Value::Object(map)) => Ok(map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()),
        _ => Ok(BTreeMap::new()),
    }
}

/// `matchPerm(r.obj, agents, tags)`: the config carries every tag and, when
/// agents are listed, runs on one of them.
pub fn match_perm(
    obj: &EvalValue,
    agents: &EvalValue,
    tags: &EvalValue,
    cache: &SelectorCache,
) -> Result<bool, AuthzError> {
    let Some(config) = bundle_from(obj)?.and_then(|b| b.config) else {
        return Ok(false);
    };
    let required = tag_map(tags, cache)?;
    if !required
        .iter()
        .all(|(k, v)| config.tags.get(k) == Some(v))
    {
        return Ok(false);
    }
    let agents = string_list(agents);
    if agents.is_empty() {
        return Ok(true);
    }
    Ok(config
        .agent_id
        .as_deref()
        .is_some_and(|id| agents.iter().any(|a| a == id)))
}

/// Registers `matchResourceSelector` and `matchPerm`.
pub fn register_predicates(functions: &mut Functions, cache: Arc<SelectorCache>) {
    let selectors = cache.clone();
    functions.register("matchResourceSelector", move |args| {
        let [obj, encoded] = args else {
            return Err(AuthzError::InvalidCondition(format!(
                "`matchResourceSelector` expects 2 arguments, got {}",
                args.len()
            )));
        };
        let encoded = encoded.as_str().ok_or_else(|| {
            AuthzError::InvalidCondition(
                "`matchResourceSelector` expects an encoded selector string".into(),
            )
        })?;
        let selector = selectors.object(encoded)?;
        let bundle = bundle_from(obj)?;
        Ok(EvalValue::Bool(selector.matches(bundle.as_ref(), &selectors)?))
    });

    functions.register("matchPerm", move |args| {
        let [obj, agents, tags] = args else {
            return Err(AuthzError::InvalidCondition(format!(
                "`matchPerm` expects 3 arguments, got {}",
                args.len()
            )));
        };
        Ok(EvalValue::Bool(match_perm(obj, agents, tags, &cache)?))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::condition::{evaluate, parse_condition, Request};
    use serde_json::json;

    fn attrs(name: &str) -> ResourceAttributes {
        ResourceAttributes::named(name)
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("prod-*", "prod-api"));
        assert!(!wildcard_match("prod-*", "dev-api"));
        assert!(wildcard_match("*-api", "prod-api"));
        assert!(wildcard_match("a*c*e", "abcde"));
        assert!(wildcard_match("*", ""));
        assert!(!wildcard_match("exact", "exactly"));
    }

    #[test]
    fn test_label_selector_grammar() {
        let tags = BTreeMap::from([
            ("env".to_string(), "prod".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);
        let cases = [
            ("env=prod", true),
            ("env==prod", true),
            ("env!=prod", false),
            ("env!=dev", true),
            ("env in (prod, staging)", true),
            ("env notin (prod)", false),
            ("team notin (a)", true),
            ("tier", true),
            ("!tier", false),
            ("!team", true),
            ("env=prod,tier in (web,api)", true),
            ("env=prod,tier=api", false),
            ("", true),
        ];
        for (raw, expected) in cases {
            let sel = LabelSelector::parse(raw).unwrap();
            assert_eq!(sel.matches(&tags), expected, "selector `{raw}`");
        }
    }

    #[test]
    fn test_label_selector_rejects_malformed() {
        assert!(LabelSelector::parse("env in prod").is_err());
        assert!(LabelSelector::parse("=prod").is_err());
        assert!(LabelSelector::parse("env within (a)").is_err());
    }

    #[test]
    fn test_label_selector_equalities() {
        let sel = LabelSelector::parse("env=prod, cluster=homelab, !team").unwrap();
        assert_eq!(
            sel.equalities(),
            BTreeMap::from([
                ("cluster".to_string(), "homelab".to_string()),
                ("env".to_string(), "prod".to_string()),
            ])
        );
    }

    #[test]
    fn test_resource_selector_fields_and() {
        let cache = SelectorCache::default();
        let sel = ResourceSelector {
            name: Some("prod-*".into()),
            tag_selector: Some("env=prod".into()),
            ..Default::default()
        };
        let prod = attrs("prod-api").with_tag("env", "prod");
        assert!(sel.matches(&prod, &cache).unwrap());
        let wrong_tag = attrs("prod-api").with_tag("env", "dev");
        assert!(!sel.matches(&wrong_tag, &cache).unwrap());
        let wrong_name = attrs("dev-api").with_tag("env", "prod");
        assert!(!sel.matches(&wrong_name, &cache).unwrap());
    }

    #[test]
    fn test_empty_selector_matches_nothing() {
        let cache = SelectorCache::default();
        assert!(!ResourceSelector::default()
            .matches(&attrs("anything"), &cache)
            .unwrap());
    }

    #[test]
    fn test_wildcard_selector() {
        let cache = SelectorCache::default();
        let sel = ResourceSelector {
            name: Some("*".into()),
            ..Default::default()
        };
        assert!(sel.is_wildcard());
        assert!(sel.matches(&ResourceAttributes::default(), &cache).unwrap());

        let narrowed = ResourceSelector {
            name: Some("*".into()),
            namespace: Some("prod".into()),
            ..Default::default()
        };
        assert!(!narrowed.is_wildcard());
    }

    #[test]
    fn test_agent_self_and_names() {
        let cache = SelectorCache::default();
        let local = ResourceSelector {
            agent: Some("self".into()),
            ..Default::default()
        };
        assert!(local.matches(&attrs("a"), &cache).unwrap());
        assert!(local
            .matches(&attrs("a").with_agent(NIL_AGENT_ID), &cache)
            .unwrap());
        assert!(!local.matches(&attrs("a").with_agent("agent-1"), &cache).unwrap());

        let by_name = ResourceSelector {
            agent: Some("edge".into()),
            ..Default::default()
        };
        let mut remote = attrs("a").with_agent("agent-1");
        remote.agent_name = Some("edge".into());
        assert!(by_name.matches(&remote, &cache).unwrap());
    }

    #[test]
    fn test_types_and_labels() {
        let cache = SelectorCache::default();
        let sel = ResourceSelector {
            types: vec!["Kubernetes::*".into()],
            label_selector: Some("app in (api,web)".into()),
            ..Default::default()
        };
        let mut pod = attrs("p").with_label("app", "api");
        pod.kind = Some("Kubernetes::Pod".into());
        assert!(sel.matches(&pod, &cache).unwrap());
        pod.kind = Some("AWS::EC2".into());
        assert!(!sel.matches(&pod, &cache).unwrap());
    }

    #[test]
    fn test_search_terms() {
        let cache = SelectorCache::default();
        let mut pod = attrs("nginx-1").with_tag("cluster", "homelab");
        pod.kind = Some("Kubernetes::Pod".into());
        pod.namespace = Some("default".into());

        let matching = [
            "nginx-*",
            "type=Kubernetes::*",
            "namespace=default,kube-system",
            "cluster=homelab",
            "tags.cluster=home*",
            "type=!Kubernetes::Node",
        ];
        for query in matching {
            let sel = ResourceSelector {
                search: Some(query.into()),
                ..Default::default()
            };
            assert!(sel.matches(&pod, &cache).unwrap(), "query `{query}`");
        }

        let rejecting = ["redis-*", "type=!Kubernetes::*", "namespace=prod", "team=a"];
        for query in rejecting {
            let sel = ResourceSelector {
                search: Some(query.into()),
                ..Default::default()
            };
            assert!(!sel.matches(&pod, &cache).unwrap(), "query `{query}`");
        }
    }

    #[test]
    fn test_object_selector_round_trip_and_global() {
        let sel = ObjectSelector {
            configs: vec![ResourceSelector {
                name: Some("*".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let decoded = ObjectSelector::decode(&sel.encode()).unwrap();
        assert_eq!(decoded, sel);
        assert!(decoded.is_global());
        assert!(!ObjectSelector::default().is_global());
        assert!(ObjectSelector::decode("%%%").is_err());
    }

    #[test]
    fn test_object_selector_and_across_fields() {
        let cache = SelectorCache::default();
        let sel = ObjectSelector {
            playbooks: vec![ResourceSelector {
                name: Some("restart-*".into()),
                ..Default::default()
            }],
            configs: vec![
                ResourceSelector {
                    namespace: Some("default".into()),
                    ..Default::default()
                },
                ResourceSelector {
                    namespace: Some("prod".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut config = attrs("api");
        config.namespace = Some("prod".into());
        let bundle = AttributeBundle {
            playbook: Some(attrs("restart-deployment")),
            config: Some(config),
            ..Default::default()
        };
        assert!(sel.matches(Some(&bundle), &cache).unwrap());

        let missing_config = AttributeBundle {
            playbook: Some(attrs("restart-deployment")),
            ..Default::default()
        };
        assert!(!sel.matches(Some(&missing_config), &cache).unwrap());
        assert!(!sel.matches(None, &cache).unwrap());
    }

    #[test]
    fn test_object_selector_scopes_field() {
        let cache = SelectorCache::default();
        let sel = ObjectSelector {
            scopes: vec![ResourceSelector {
                name: Some("prod-configs".into()),
                namespace: Some("ns1".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let bundle = AttributeBundle {
            scopes: vec![ScopeRef {
                namespace: "ns1".into(),
                name: "prod-configs".into(),
            }],
            ..Default::default()
        };
        assert!(sel.matches(Some(&bundle), &cache).unwrap());
        assert!(!sel.matches(Some(&AttributeBundle::default()), &cache).unwrap());
    }

    #[test]
    fn test_match_resource_selector_predicate() {
        let cache = Arc::new(SelectorCache::default());
        let mut functions = Functions::with_builtins();
        register_predicates(&mut functions, cache.clone());

        let encoded = ObjectSelector {
            configs: vec![ResourceSelector {
                name: Some("prod-*".into()),
                tag_selector: Some("env=prod".into()),
                ..Default::default()
            }],
            ..Default::default()
        }
        .encode();
        let expr = parse_condition(&format!("matchResourceSelector(r.obj, '{encoded}')")).unwrap();

        let request = |obj| Request {
            sub: "bob",
            obj,
            act: "run",
        };
        let prod = json!({ "config": { "name": "prod-api", "tags": { "env": "prod" } } });
        assert!(evaluate(&expr, &request(prod), &functions).unwrap());
        let dev = json!({ "config": { "name": "dev-api", "tags": { "env": "prod" } } });
        assert!(!evaluate(&expr, &request(dev), &functions).unwrap());
        assert!(!evaluate(&expr, &request(Value::Null), &functions).unwrap());

        // the encoded selector and its tag selector are memoized
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_match_perm() {
        let cache = SelectorCache::default();
        let obj = EvalValue::Object(json!({
            "config": { "agent_id": "agent-1", "tags": { "cluster": "homelab", "env": "prod" } }
        }));
        let tags = EvalValue::Str("cluster=homelab".into());
        let none = EvalValue::Str(String::new());

        assert!(match_perm(&obj, &none, &tags, &cache).unwrap());
        assert!(match_perm(&obj, &EvalValue::Str("agent-1,agent-2".into()), &tags, &cache).unwrap());
        assert!(!match_perm(&obj, &EvalValue::Str("agent-2".into()), &tags, &cache).unwrap());
        assert!(!match_perm(
            &obj,
            &none,
            &EvalValue::Str("cluster=aws".into()),
            &cache
        )
        .unwrap());
        assert!(!match_perm(&EvalValue::Null, &none, &tags, &cache).unwrap());
    }
}
