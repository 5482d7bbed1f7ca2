//! Route metadata and the immutable route registry

use crate::error::{AuthzError, Result};
use crate::types::Operation;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Path placeholder that enables organization context
pub const ORG_PARAM: &str = "org_id";

/// Path placeholder that enables team context
pub const TEAM_PARAM: &str = "team_id";

/// Static declaration of one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMeta {
    /// HTTP method, upper case
    pub method: String,

    /// Path template using `{param}` placeholders
    pub path: String,

    /// Operation guarded by this route
    pub operation_id: Operation,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RouteMeta {
    /// Declare a route; fails on a malformed operation id
    pub fn new(method: &str, path: impl Into<String>, operation_id: &str) -> Result<Self> {
        Ok(Self {
            method: method.to_ascii_uppercase(),
            path: path.into(),
            operation_id: Operation::new(operation_id)?,
            tags: Vec::new(),
        })
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Placeholder names in declaration order
    pub fn params(&self) -> Vec<&str> {
        self.path
            .split('/')
            .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
            .collect()
    }

    /// Whether the path declares `{name}`
    pub fn has_param(&self, name: &str) -> bool {
        self.params().contains(&name)
    }

    pub fn needs_org_context(&self) -> bool {
        self.has_param(ORG_PARAM)
    }

    pub fn needs_team_context(&self) -> bool {
        self.has_param(TEAM_PARAM)
    }

    pub fn is_public(&self) -> bool {
        self.operation_id.is_public()
    }

    /// GET and HEAD requests skip auditing
    pub fn is_read_only(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD")
    }

    /// Match a concrete path against the template, capturing parameters
    pub fn extract_params(&self, path: &str) -> Option<HashMap<String, String>> {
        let template: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        let actual: Vec<&str> = path.trim_matches('/').split('/').collect();
        if template.len() != actual.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (tpl, value) in template.iter().zip(actual.iter()) {
            match tpl.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => {
                    if value.is_empty() {
                        return None;
                    }
                    params.insert(name.to_string(), value.to_string());
                }
                None if tpl == value => {}
                None => return None,
            }
        }
        Some(params)
    }

    /// Path in axum 0.7 syntax (`{org_id}` becomes `:org_id`)
    pub fn axum_path(&self) -> String {
        self.path
            .split('/')
            .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => format!(":{}", name),
                None => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Immutable lookup table of declared routes, keyed by operation id
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: Vec<Arc<RouteMeta>>,
    by_operation: HashMap<String, usize>,
}

impl RouteRegistry {
    /// Build the registry from a route table
    ///
    /// Rejects duplicate operation ids, duplicate method/path pairs and team
    /// routes without an enclosing organization.
    pub fn build(routes: Vec<RouteMeta>) -> Result<Self> {
        let mut registry = Self::default();
        let mut seen_paths = HashMap::new();

        for route in routes {
            if route.needs_team_context() && !route.needs_org_context() {
                return Err(AuthzError::BadRequest(format!(
                    "route {} {} declares {{{}}} without {{{}}}",
                    route.method, route.path, TEAM_PARAM, ORG_PARAM
                )));
            }

            let op = route.operation_id.as_str().to_string();
            if registry.by_operation.contains_key(&op) {
                return Err(AuthzError::BadRequest(format!(
                    "duplicate operation id '{}'",
                    op
                )));
            }
            if let Some(existing) =
                seen_paths.insert((route.method.clone(), route.path.clone()), op.clone())
            {
                return Err(AuthzError::BadRequest(format!(
                    "{} {} is declared by both '{}' and '{}'",
                    route.method, route.path, existing, op
                )));
            }

            registry.by_operation.insert(op, registry.routes.len());
            registry.routes.push(Arc::new(route));
        }

        info!("Route registry built with {} routes", registry.routes.len());
        Ok(registry)
    }

    /// Route guarding an operation
    pub fn get(&self, operation_id: &str) -> Option<&Arc<RouteMeta>> {
        self.by_operation.get(operation_id).map(|&i| &self.routes[i])
    }

    /// Route declared for a concrete method and path
    pub fn find(&self, method: &str, path: &str) -> Option<(&Arc<RouteMeta>, HashMap<String, String>)> {
        self.routes.iter().find_map(|route| {
            if !route.method.eq_ignore_ascii_case(method) {
                return None;
            }
            route.extract_params(path).map(|params| (route, params))
        })
    }

    /// Routes in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RouteMeta>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
