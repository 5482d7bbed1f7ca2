//! Request-bound variable substitution for resource templates

use serde::Serialize;
use std::collections::BTreeMap;

/// Variable bound to the authenticated user id
pub const VAR_ME: &str = "@me";

/// Variable bound to the organization in the route path
pub const VAR_ORG: &str = "@org";

/// Variable bound to the team in the route path
pub const VAR_TEAM: &str = "@team";

/// Bindings for `@me`, `@org` and `@team`
///
/// Resolution is literal substring substitution. Unbound variables are left
/// in place, so callers check [`Variables::is_bound`] before relying on a
/// resolved string.
///
/// # Examples
///
/// ```
/// use tenant_authz::variables::{Variables, VAR_ME, VAR_ORG, VAR_TEAM};
///
/// let mut vars = Variables::new();
/// vars.bind(VAR_ME, "123");
/// assert_eq!(vars.resolve("self:user:@me"), "self:user:123");
///
/// vars.bind(VAR_ORG, "7");
/// vars.bind(VAR_TEAM, "3");
/// assert_eq!(vars.resolve("org.@org.team.@team:*:*"), "org.7.team.3:*:*");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Variables {
    bindings: BTreeMap<String, String>,
}

impl Variables {
    /// Create an empty binding set
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable, replacing any previous value
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(name.into(), value.into());
    }

    /// Whether a variable has a value
    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Value of a bound variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }

    /// Substitute every bound variable in `template`
    pub fn resolve(&self, template: &str) -> String {
        // longest names first so a variable never clobbers a longer one it prefixes
        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut resolved = template.to_string();
        for name in names {
            if let Some(value) = self.bindings.get(name) {
                resolved = resolved.replace(name.as_str(), value);
            }
        }
        resolved
    }

    /// Resolve `template` only if every listed variable is bound
    pub fn resolve_bound(&self, template: &str, required: &[&str]) -> Option<String> {
        if required.iter().all(|name| self.is_bound(name)) {
            Some(self.resolve(template))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_passes_through() {
        let vars = Variables::new();
        assert_eq!(vars.resolve("self:user:@me"), "self:user:@me");
        assert!(!vars.is_bound(VAR_ME));
    }

    #[test]
    fn test_partial_binding() {
        let mut vars = Variables::new();
        vars.bind(VAR_ORG, "7");
        assert_eq!(
            vars.resolve("org.@org.team.@team:*:*"),
            "org.7.team.@team:*:*"
        );
        assert!(vars
            .resolve_bound("org.@org.team.@team:*:*", &[VAR_ORG, VAR_TEAM])
            .is_none());
        assert_eq!(
            vars.resolve_bound("org.@org:*:*", &[VAR_ORG]).as_deref(),
            Some("org.7:*:*")
        );
    }

    #[test]
    fn test_longer_names_resolve_first() {
        let mut vars = Variables::new();
        vars.bind("@me", "1");
        vars.bind("@member", "2");
        assert_eq!(vars.resolve("@member/@me"), "2/1");
    }

    #[test]
    fn test_rebind_replaces() {
        let mut vars = Variables::new();
        vars.bind(VAR_ME, "1");
        vars.bind(VAR_ME, "2");
        assert_eq!(vars.get(VAR_ME), Some("2"));
    }
}
