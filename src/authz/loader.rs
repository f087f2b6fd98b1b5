use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::authz::condition::{parse_condition, Expr, LitValue};
use crate::authz::errors::AuthzError;
use crate::authz::policy::{parse_policy_document, DEFAULT_POLICY};
use crate::authz::selector::ObjectSelector;
use crate::authz::types::*;

/// Resource classes rules may reference unless `policy.objects` overrides them.
pub const DEFAULT_OBJECTS: &[&str] = &[
    WILDCARD,
    "catalog",
    "canaries",
    "connection",
    "database",
    "database.kratos",
    "database.public",
    "playbook",
    "topology",
    "agent",
    "agent-push",
    "application",
    "logs",
    "notification",
    "people",
    "rbac",
    "view",
    "mcp",
    "scope",
    "access-scope",
];

pub fn default_objects() -> HashSet<String> {
    DEFAULT_OBJECTS.iter().map(|s| s.to_string()).collect()
}

/// Read the bootstrap policy from `path`, or the embedded default.
pub fn load_bootstrap_policy(path: Option<&Path>) -> Result<ParsedPolicy, AuthzError> {
    let Some(path) = path else {
        return parse_policy_document(DEFAULT_POLICY);
    };
    let contents = std::fs::read_to_string(path).map_err(|source| AuthzError::PolicyLoadError {
        path: path.display().to_string(),
        source,
    })?;
    let parsed = parse_policy_document(&contents)?;
    tracing::info!(
        path = %path.display(),
        rules = parsed.rules.len(),
        groupings = parsed.groupings.len(),
        "Loaded bootstrap policy"
    );
    Ok(parsed)
}

#[derive(Debug, Clone)]
pub enum RuleCondition {
    Always,
    Expr(Expr),
    /// Kept so the rule shows up in traces; never matches.
    Unparseable(String),
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub permission: Permission,
    pub action: Action,
    pub condition: RuleCondition,
}

impl CompiledRule {
    pub fn id(&self) -> &str {
        &self.permission.id
    }

    pub fn matches_target(&self, object: &str, action: Action) -> bool {
        let rule_object = self.permission.object.as_str();
        (rule_object == WILDCARD || object == WILDCARD || rule_object == object)
            && self.action.matches(action)
    }
}

/// Immutable, fully indexed policy. Readers share it through an atomic
/// pointer; writers build a fresh one.
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    rules: Vec<CompiledRule>,
    by_principal: HashMap<String, Vec<usize>>,
    by_target: HashMap<(String, Action), Vec<usize>>,
    groupings: Vec<Grouping>,
    /// principal -> every principal it inherits from, transitively.
    closure: HashMap<String, BTreeSet<String>>,
}

impl PolicySnapshot {
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn groupings(&self) -> &[Grouping] {
        &self.groupings
    }

    pub fn has_grouping(&self, principal: &str, inherited: &str) -> bool {
        self.groupings
            .iter()
            .any(|g| g.principal == principal && g.inherited == inherited)
    }

    /// Transitive closure over the grouping relation, excluding `principal`.
    pub fn implicit_roles(&self, principal: &str) -> BTreeSet<String> {
        self.closure.get(principal).cloned().unwrap_or_default()
    }

    /// Every principal whose rules apply to `subject`: the subject itself,
    /// its implicit roles, and `everyone` with whatever it inherits.
    pub fn effective_principals(&self, subject: &str) -> BTreeSet<String> {
        let mut principals = self.implicit_roles(subject);
        principals.extend(self.implicit_roles(EVERYONE_ROLE));
        principals.insert(EVERYONE_ROLE.to_string());
        principals.insert(subject.to_string());
        principals
    }

    /// Direct and inherited rules of `principal`, in load order.
    pub fn rules_for(&self, principal: &str) -> Vec<&CompiledRule> {
        let mut principals = self.implicit_roles(principal);
        principals.insert(principal.to_string());
        self.collect(
            principals
                .iter()
                .filter_map(|p| self.by_principal.get(p))
                .flatten()
                .copied(),
        )
    }

    /// Rules of `principals` whose (object, action) admit the request.
    pub fn candidates(
        &self,
        principals: &BTreeSet<String>,
        object: &str,
        action: Action,
    ) -> Vec<&CompiledRule> {
        if object == WILDCARD || action == Action::Any {
            return self.collect(
                principals
                    .iter()
                    .filter_map(|p| self.by_principal.get(p))
                    .flatten()
                    .copied()
                    .filter(|i| self.rules[*i].matches_target(object, action)),
            );
        }

        let keys = [
            (object, action),
            (object, Action::Any),
            (WILDCARD, action),
            (WILDCARD, Action::Any),
        ];
        self.collect(
            keys.iter()
                .filter_map(|(o, a)| self.by_target.get(&(o.to_string(), *a)))
                .flatten()
                .copied()
                .filter(|i| principals.contains(&self.rules[*i].permission.principal)),
        )
    }

    fn collect(&self, indexes: impl Iterator<Item = usize>) -> Vec<&CompiledRule> {
        let ordered: BTreeSet<usize> = indexes.collect();
        ordered.into_iter().map(|i| &self.rules[i]).collect()
    }
}

/// Validate and index rules and groupings into a [`PolicySnapshot`].
///
/// Unknown objects, unknown actions and role cycles are rejected. Conditions
/// that fail to parse are logged and compiled to a never-matching rule.
pub fn compile_policy(
    rules: Vec<Permission>,
    groupings: Vec<Grouping>,
    objects: &HashSet<String>,
) -> Result<PolicySnapshot, AuthzError> {
    let mut snapshot = PolicySnapshot::default();

    for permission in rules {
        if !objects.contains(&permission.object) {
            return Err(AuthzError::UnknownObject {
                object: permission.object.clone(),
                rule: permission.id.clone(),
            });
        }
        let action = Action::parse(&permission.action).ok_or_else(|| AuthzError::UnknownAction {
            action: permission.action.clone(),
            rule: permission.id.clone(),
        })?;
        let condition = compile_condition(&permission);

        let index = snapshot.rules.len();
        snapshot
            .by_principal
            .entry(permission.principal.clone())
            .or_default()
            .push(index);
        snapshot
            .by_target
            .entry((permission.object.clone(), action))
            .or_default()
            .push(index);
        snapshot.rules.push(CompiledRule {
            permission,
            action,
            condition,
        });
    }

    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    let mut seen = HashSet::new();
    for grouping in groupings {
        if !seen.insert(grouping.clone()) {
            continue;
        }
        graph
            .entry(grouping.principal.clone())
            .or_default()
            .push(grouping.inherited.clone());
        snapshot.groupings.push(grouping);
    }

    check_role_cycles(&graph)?;

    let mut memo = HashMap::new();
    for principal in graph.keys() {
        closure_of(principal, &graph, &mut memo);
    }
    snapshot.closure = memo;

    Ok(snapshot)
}

fn compile_condition(permission: &Permission) -> RuleCondition {
    let Some(raw) = permission.condition.as_deref().filter(|c| !c.trim().is_empty()) else {
        return RuleCondition::Always;
    };
    match parse_condition(raw) {
        Ok(expr) if is_global_selector(&expr) => RuleCondition::Always,
        Ok(expr) => RuleCondition::Expr(expr),
        Err(err) => {
            tracing::warn!(rule = %permission.id, error = %err, "Rule condition does not parse; rule will never match");
            RuleCondition::Unparseable(err.to_string())
        }
    }
}

/// `matchResourceSelector(r.obj, "<wildcard selector>")` grants the whole class.
fn is_global_selector(expr: &Expr) -> bool {
    let Some(("matchResourceSelector", [Expr::Path(path), Expr::Literal(LitValue::Str(raw))])) =
        expr.as_call()
    else {
        return false;
    };
    path.len() == 2
        && path[0] == "r"
        && path[1] == "obj"
        && ObjectSelector::decode(raw).is_ok_and(|s| s.is_global())
}

/// Check for cycles in role inheritance using DFS.
fn check_role_cycles(graph: &HashMap<String, Vec<String>>) -> Result<(), AuthzError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    let mut names: Vec<&String> = graph.keys().collect();
    names.sort();
    for name in names {
        if !visited.contains(name.as_str()) {
            dfs_cycle_check(name, graph, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check(
    name: &str,
    graph: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    in_stack: &mut HashSet<String>,
) -> Result<(), AuthzError> {
    visited.insert(name.to_string());
    in_stack.insert(name.to_string());

    if let Some(inherited) = graph.get(name) {
        for parent in inherited {
            if in_stack.contains(parent.as_str()) {
                return Err(AuthzError::CyclicRoleInheritance(format!(
                    "{name} -> {parent}"
                )));
            }
            if !visited.contains(parent.as_str()) {
                dfs_cycle_check(parent, graph, visited, in_stack)?;
            }
        }
    }

    in_stack.remove(name);
    Ok(())
}

/// Memoized transitive closure. The graph must already be acyclic.
fn closure_of(
    principal: &str,
    graph: &HashMap<String, Vec<String>>,
    memo: &mut HashMap<String, BTreeSet<String>>,
) -> BTreeSet<String> {
    if let Some(done) = memo.get(principal) {
        return done.clone();
    }
    let mut roles = BTreeSet::new();
    for parent in graph.get(principal).into_iter().flatten() {
        roles.insert(parent.clone());
        roles.extend(closure_of(parent, graph, memo));
    }
    memo.insert(principal.to_string(), roles.clone());
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::selector::ResourceSelector;

    fn compile(rules: Vec<Permission>, groupings: Vec<Grouping>) -> PolicySnapshot {
        compile_policy(rules, groupings, &default_objects()).unwrap()
    }

    #[test]
    fn test_compile_default_policy() {
        let parsed = load_bootstrap_policy(None).unwrap();
        let snapshot = compile(parsed.rules, parsed.groupings);
        let editor = snapshot.implicit_roles("editor");
        assert!(editor.contains("commander"));
        assert!(editor.contains("viewer"));
        assert!(!snapshot.rules_for("admin").is_empty());
    }

    #[test]
    fn test_unknown_object_rejected() {
        let err = compile_policy(
            vec![Permission::new("bob", "spaceship", "read", Effect::Allow)],
            vec![],
            &default_objects(),
        )
        .unwrap_err();
        assert!(matches!(err, AuthzError::UnknownObject { ref object, .. } if object == "spaceship"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = compile_policy(
            vec![Permission::new("bob", "catalog", "launch", Effect::Allow)],
            vec![],
            &default_objects(),
        )
        .unwrap_err();
        assert!(matches!(err, AuthzError::UnknownAction { .. }));
    }

    #[test]
    fn test_cyclic_roles_detected() {
        let err = compile_policy(
            vec![],
            vec![
                Grouping::new("a", "b"),
                Grouping::new("b", "c"),
                Grouping::new("c", "a"),
            ],
            &default_objects(),
        )
        .unwrap_err();
        let AuthzError::CyclicRoleInheritance(edge) = err else {
            panic!("expected a cycle error");
        };
        assert_eq!(edge, "c -> a");
    }

    #[test]
    fn test_transitive_roles() {
        let snapshot = compile(
            vec![Permission::new("c", "catalog", "delete", Effect::Allow)],
            vec![Grouping::new("a", "b"), Grouping::new("b", "c")],
        );
        assert_eq!(
            snapshot.implicit_roles("a"),
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
        let inherited = snapshot.rules_for("a");
        assert_eq!(inherited.len(), 1);
        assert_eq!(inherited[0].permission.principal, "c");
    }

    #[test]
    fn test_effective_principals_include_everyone() {
        let snapshot = compile(vec![], vec![Grouping::new("everyone", "viewer")]);
        let principals = snapshot.effective_principals("stranger");
        assert!(principals.contains("stranger"));
        assert!(principals.contains("everyone"));
        assert!(principals.contains("viewer"));
    }

    #[test]
    fn test_candidates_with_wildcards() {
        let snapshot = compile(
            vec![
                Permission::new("admin", "*", "*", Effect::Allow),
                Permission::new("viewer", "catalog", "read", Effect::Allow),
                Permission::new("viewer", "playbook", "run", Effect::Allow),
            ],
            vec![],
        );
        let admin = BTreeSet::from(["admin".to_string()]);
        assert_eq!(snapshot.candidates(&admin, "catalog", Action::Delete).len(), 1);

        let viewer = BTreeSet::from(["viewer".to_string()]);
        assert_eq!(snapshot.candidates(&viewer, "catalog", Action::Read).len(), 1);
        assert!(snapshot.candidates(&viewer, "catalog", Action::Delete).is_empty());
        assert_eq!(snapshot.candidates(&viewer, "*", Action::Any).len(), 2);
        assert_eq!(snapshot.candidates(&viewer, "playbook", Action::Any).len(), 1);
    }

    #[test]
    fn test_bad_condition_is_never_matching() {
        let snapshot = compile(
            vec![Permission::new("bob", "playbook", "run", Effect::Allow)
                .with_condition("r.obj.playbook.name ==")],
            vec![],
        );
        assert!(matches!(
            snapshot.rules()[0].condition,
            RuleCondition::Unparseable(_)
        ));
    }

    #[test]
    fn test_global_selector_condition_is_unconditional() {
        let global = ObjectSelector {
            playbooks: vec![ResourceSelector {
                name: Some("*".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let narrow = ObjectSelector {
            playbooks: vec![ResourceSelector {
                name: Some("restart-*".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let snapshot = compile(
            vec![
                Permission::new("bob", "playbook", "run", Effect::Allow).with_condition(
                    &format!("matchResourceSelector(r.obj, '{}')", global.encode()),
                ),
                Permission::new("bob", "playbook", "read", Effect::Allow).with_condition(
                    &format!("matchResourceSelector(r.obj, '{}')", narrow.encode()),
                ),
            ],
            vec![],
        );
        assert!(matches!(snapshot.rules()[0].condition, RuleCondition::Always));
        assert!(matches!(snapshot.rules()[1].condition, RuleCondition::Expr(_)));
    }

    #[test]
    fn test_load_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(
            &path,
            r#"
- principal: ops
  acl:
    - objects: logs
      actions: read
"#,
        )
        .unwrap();
        let parsed = load_bootstrap_policy(Some(&path)).unwrap();
        assert_eq!(parsed.rules.len(), 1);

        let err = load_bootstrap_policy(Some(&dir.path().join("missing.yaml"))).unwrap_err();
        assert!(matches!(err, AuthzError::PolicyLoadError { .. }));
    }
}
