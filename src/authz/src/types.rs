//! Core authorization types

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique user identifier
pub type UserId = u64;

/// Unique role identifier
pub type RoleId = u64;

/// Unique organization identifier
pub type OrgId = u64;

/// Unique team identifier
pub type TeamId = u64;

/// Name of the built-in administrator role
pub const ADMIN_ROLE: &str = "admin";

/// Name of the built-in role every authenticated principal holds
pub const USER_ROLE: &str = "user";

/// Operation pattern granting every operation
pub const SUPER_ADMIN_OPERATION: &str = "*:*:*";

/// Resource pattern matching every resource
pub const ANY_RESOURCE: &str = "*";

/// Access domain of an operation (its first segment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationScope {
    /// No authentication required
    Public,
    /// Caller acting on their own account
    #[serde(rename = "self")]
    SelfScope,
    /// Organization / team scoped
    Org,
    /// System administration
    Sys,
}

impl OperationScope {
    /// Parse a scope segment
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "public" => Some(Self::Public),
            "self" => Some(Self::SelfScope),
            "org" => Some(Self::Org),
            "sys" => Some(Self::Sys),
            _ => None,
        }
    }

    /// Segment text of this scope
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::SelfScope => "self",
            Self::Org => "org",
            Self::Sys => "sys",
        }
    }
}

impl fmt::Display for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete operation identifier: `scope:resource-class:action`
///
/// # Examples
///
/// ```
/// use tenant_authz::types::{Operation, OperationScope};
///
/// let op = Operation::new("self:profile:get").unwrap();
/// assert_eq!(op.scope(), "self");
/// assert_eq!(op.operation_scope(), Some(OperationScope::SelfScope));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Operation(String);

impl Operation {
    /// Parses an operation, requiring exactly three non-empty segments
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let raw = s.into();
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() != 3 || segments.iter().any(|seg| seg.is_empty()) {
            return Err(AuthzError::BadRequest(format!(
                "operation '{}' must have the form scope:resource:action",
                raw
            )));
        }
        Ok(Self(raw))
    }

    /// First segment of the operation
    pub fn scope(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Typed scope, if the first segment is a defined scope
    pub fn operation_scope(&self) -> Option<OperationScope> {
        OperationScope::parse(self.scope())
    }

    /// Whether the operation needs no authentication
    pub fn is_public(&self) -> bool {
        self.operation_scope() == Some(OperationScope::Public)
    }

    /// Raw operation string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Operation {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Operation::new(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete resource identifier, such as the RBAC candidates
/// `self:user:123` and `org.7.team.3:*:*`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

impl Resource {
    /// Create a resource identifier
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Raw resource string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Resource {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<&str> for Resource {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

fn any_resource() -> String {
    ANY_RESOURCE.to_string()
}

fn deserialize_resource_pattern<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(if raw.is_empty() { any_resource() } else { raw })
}

/// A grant of an operation pattern over a resource pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Operation-shaped pattern, possibly with `*` segments
    pub operation_pattern: String,

    /// Resource-shaped pattern; `*` when unspecified
    #[serde(default = "any_resource", deserialize_with = "deserialize_resource_pattern")]
    pub resource_pattern: String,
}

impl Permission {
    /// Create a permission; an empty resource pattern becomes `*`
    pub fn new(operation_pattern: impl Into<String>, resource_pattern: impl Into<String>) -> Self {
        let resource_pattern = resource_pattern.into();
        Self {
            operation_pattern: operation_pattern.into(),
            resource_pattern: if resource_pattern.is_empty() {
                any_resource()
            } else {
                resource_pattern
            },
        }
    }

    /// Permission over any resource
    pub fn any_resource(operation_pattern: impl Into<String>) -> Self {
        Self::new(operation_pattern, ANY_RESOURCE)
    }

    /// Whether this is the unrestricted `*:*:*` grant
    pub fn is_super_admin(&self) -> bool {
        self.operation_pattern == SUPER_ADMIN_OPERATION
    }

    /// Key used for deduplication
    pub fn dedup_key(&self) -> String {
        format!("{}|{}", self.operation_pattern, self.resource_pattern)
    }

    /// Validate both patterns; called on every write path
    pub fn validate(&self) -> Result<()> {
        crate::matcher::validate_operation_pattern(&self.operation_pattern)?;
        crate::matcher::validate_resource_pattern(&self.resource_pattern)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.operation_pattern, self.resource_pattern)
    }
}

/// Named set of permissions assignable to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role identifier
    pub id: RoleId,

    /// Unique role name
    pub name: String,

    /// Human-readable name
    pub display_name: String,

    /// Built-in roles cannot be modified or deleted
    #[serde(default)]
    pub is_system: bool,

    /// Granted permissions, replaced wholesale on update
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Role {
    /// Create a non-system role
    pub fn new(id: RoleId, name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            display_name: display_name.into(),
            is_system: false,
            permissions: Vec::new(),
        }
    }

    /// Mark the role as built-in
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Attach permissions
    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.permissions = permissions;
        self
    }
}

/// How the caller authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// Signed session token
    Jwt,
    /// Personal access token
    Pat,
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jwt => f.write_str("jwt"),
            Self::Pat => f.write_str("pat"),
        }
    }
}
