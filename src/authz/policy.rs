use serde::Deserialize;

use crate::authz::errors::AuthzError;
use crate::authz::types::*;

/// Role definitions shipped with the crate.
pub const DEFAULT_POLICY: &str = include_str!("policy.yaml");

#[derive(Debug, Deserialize)]
struct RoleDefinition {
    principal: String,
    #[serde(default)]
    acl: Vec<AclEntry>,
    #[serde(default)]
    inherit: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AclEntry {
    objects: String,
    actions: String,
    #[serde(default)]
    effect: Option<Effect>,
    #[serde(default)]
    condition: Option<String>,
}

/// Parse a bootstrap policy YAML document into rules and groupings.
///
/// `objects` and `actions` are comma-separated and expand to their
/// cross-product. An action prefixed with `!` produces a deny rule.
pub fn parse_policy_document(source: &str) -> Result<ParsedPolicy, AuthzError> {
    let roles: Vec<RoleDefinition> =
        serde_yaml::from_str(source).map_err(|e| AuthzError::PolicyParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for role in roles {
        let principal = role.principal.trim();
        if principal.is_empty() {
            return Err(AuthzError::InvalidPolicy(
                "role definition requires a non-empty `principal`".into(),
            ));
        }

        for entry in &role.acl {
            let objects = split_list(&entry.objects);
            let actions = split_list(&entry.actions);
            if objects.is_empty() || actions.is_empty() {
                return Err(AuthzError::InvalidPolicy(format!(
                    "acl entry of `{principal}` needs at least one object and one action"
                )));
            }

            for object in &objects {
                for action in &actions {
                    let (action, negated) = match action.strip_prefix('!') {
                        Some(rest) => (rest, true),
                        None => (action.as_str(), false),
                    };
                    let effect = if negated {
                        Effect::Deny
                    } else {
                        entry.effect.unwrap_or_default()
                    };
                    let mut rule = Permission::new(principal, object, action, effect);
                    if let Some(cond) = &entry.condition {
                        rule = rule.with_condition(cond);
                    }
                    policy.rules.push(rule);
                }
            }
        }

        for inherited in &role.inherit {
            policy
                .groupings
                .push(Grouping::new(principal, inherited.trim()));
        }
    }

    Ok(policy)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
