//! Token scopes and personal access tokens
//!
//! A personal access token carries a list of scopes that restrict which of
//! its owner's permissions the token may exercise:
//!
//! - `full` keeps every permission, including the `*:*:*` super-admin grant
//! - `self` keeps permissions whose operation pattern starts with `self:`
//! - `sys` keeps permissions whose operation pattern starts with `sys:`
//!
//! Restrictive scopes never re-admit `*:*:*`.
//!
//! # Examples
//!
//! ```
//! use tenant_authz::token::filter_by_scopes;
//! use tenant_authz::types::Permission;
//!
//! let perms = vec![
//!     Permission::any_resource("*:*:*"),
//!     Permission::any_resource("self:*:*"),
//! ];
//!
//! let scoped = filter_by_scopes(&["self".to_string()], &perms);
//! assert_eq!(scoped, vec![Permission::any_resource("self:*:*")]);
//! ```

mod pat;

pub use pat::{
    hash_token, InMemoryTokenStore, IssuedToken, PersonalAccessToken, TokenStatus, TokenStore,
};

use crate::error::{AuthzError, Result};
use crate::types::Permission;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Restriction tag attached to a personal access token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    /// All of the owner's permissions
    Full,
    /// Only `self:` operations
    #[serde(rename = "self")]
    SelfOnly,
    /// Only `sys:` operations
    Sys,
}

impl TokenScope {
    /// Every defined scope, in display order
    pub const ALL: [TokenScope; 3] = [TokenScope::Full, TokenScope::SelfOnly, TokenScope::Sys];

    /// Scope name as stored on tokens
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::SelfOnly => "self",
            Self::Sys => "sys",
        }
    }

    /// Describe this scope for client UIs
    pub fn info(&self) -> ScopeInfo {
        let (display_name, description) = match self {
            Self::Full => (
                "Full access",
                "Everything the token owner is allowed to do, including administration",
            ),
            Self::SelfOnly => (
                "Own account",
                "Read and manage the token owner's own profile and settings",
            ),
            Self::Sys => (
                "System administration",
                "System-level operations the token owner is allowed to perform",
            ),
        };

        ScopeInfo {
            name: self.as_str(),
            display_name,
            description,
        }
    }
}

impl FromStr for TokenScope {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "self" => Ok(Self::SelfOnly),
            "sys" => Ok(Self::Sys),
            other => Err(AuthzError::BadRequest(format!("unknown token scope '{}'", other))),
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Informational scope description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

/// List of scopes a client may request when creating a token
pub fn available_scopes() -> Vec<ScopeInfo> {
    TokenScope::ALL.iter().map(TokenScope::info).collect()
}

/// Restricts `permissions` to those a token with `scopes` may exercise
///
/// Empty scopes and any list containing `full` return the input unchanged.
/// Otherwise a permission is kept when its operation pattern begins with
/// `"<scope>:"` for one of the listed scopes; results are deduplicated and
/// keep input order. The super-admin grant `*:*:*` never survives a
/// restrictive scope.
pub fn filter_by_scopes(scopes: &[String], permissions: &[Permission]) -> Vec<Permission> {
    if scopes.is_empty() || scopes.iter().any(|s| s == TokenScope::Full.as_str()) {
        return permissions.to_vec();
    }

    let prefixes: Vec<String> = scopes.iter().map(|s| format!("{}:", s)).collect();
    let mut seen = HashSet::new();
    let mut filtered = Vec::new();

    for permission in permissions {
        if permission.is_super_admin() {
            continue;
        }

        let in_scope = prefixes
            .iter()
            .any(|prefix| permission.operation_pattern.starts_with(prefix.as_str()));

        if in_scope && seen.insert(permission.dedup_key()) {
            filtered.push(permission.clone());
        }
    }

    filtered
}

/// Validates requested scope names, normalizing an empty list to `["full"]`
pub fn normalize_scopes(requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(vec![TokenScope::Full.as_str().to_string()]);
    }

    let mut normalized = Vec::with_capacity(requested.len());
    for name in requested {
        let scope = TokenScope::from_str(name)?;
        let name = scope.as_str().to_string();
        if !normalized.contains(&name) {
            normalized.push(name);
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn mixed_permissions() -> Vec<Permission> {
        vec![
            Permission::any_resource("*:*:*"),
            Permission::any_resource("self:*:*"),
            Permission::any_resource("sys:users:list"),
            Permission::any_resource("org:*:*"),
            Permission::any_resource("self:*:*"),
            Permission::new("sys:roles:update", "role.4:*"),
        ]
    }

    #[test]
    fn test_empty_scopes_unchanged() {
        let perms = mixed_permissions();
        assert_eq!(filter_by_scopes(&[], &perms), perms);
    }

    #[test]
    fn test_full_scope_keeps_super_admin() {
        let perms = mixed_permissions();
        let filtered = filter_by_scopes(&scopes(&["full"]), &perms);
        assert_eq!(filtered, perms);
        assert!(filtered.iter().any(Permission::is_super_admin));
    }

    #[test]
    fn test_self_scope_drops_super_admin() {
        let perms = vec![Permission::any_resource("*:*:*")];
        assert!(filter_by_scopes(&scopes(&["self"]), &perms).is_empty());
    }

    #[test]
    fn test_union_of_restrictive_scopes() {
        let filtered = filter_by_scopes(&scopes(&["self", "sys"]), &mixed_permissions());
        assert_eq!(
            filtered,
            vec![
                Permission::any_resource("self:*:*"),
                Permission::any_resource("sys:users:list"),
                Permission::new("sys:roles:update", "role.4:*"),
            ]
        );
    }

    #[test]
    fn test_prefix_requires_delimiter() {
        let perms = vec![Permission::any_resource("system:x:y")];
        assert!(filter_by_scopes(&scopes(&["sys"]), &perms).is_empty());
    }

    #[test]
    fn test_idempotent() {
        let s = scopes(&["self", "sys"]);
        let once = filter_by_scopes(&s, &mixed_permissions());
        let twice = filter_by_scopes(&s, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_scopes() {
        assert_eq!(normalize_scopes(&[]).unwrap(), scopes(&["full"]));
        assert_eq!(
            normalize_scopes(&scopes(&["self", "self", "sys"])).unwrap(),
            scopes(&["self", "sys"])
        );
        assert!(normalize_scopes(&scopes(&["admin"])).is_err());
    }

    #[test]
    fn test_available_scopes() {
        let names: Vec<&str> = available_scopes().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["full", "self", "sys"]);
    }
}
