//! # Tenant Authorization Engine
//!
//! Role-based authorization for a multi-tenant HTTP API.
//!
//! ## Features
//!
//! - **Permission grammar** of `scope:resource:action` operations and
//!   hierarchical resources with `*` wildcards
//! - **Request variables** `@me`, `@org`, `@team` bound from the caller and path
//! - **Personal access tokens** narrowed by `full` / `self` / `sys` scopes
//! - **Per-route pipelines** for authentication, org/team context, RBAC and audit
//! - **Permission cache** with event-driven invalidation
//!
//! ## Example
//!
//! ```rust
//! use tenant_authz::pipeline::{find_grant, resource_candidates, RequestContext};
//! use tenant_authz::types::{Operation, Permission};
//! use tenant_authz::variables::VAR_ME;
//!
//! let mut ctx = RequestContext::new(Operation::new("self:profile:get").unwrap());
//! ctx.variables.bind(VAR_ME, "123");
//! ctx.permissions = vec![Permission::any_resource("self:*:*")];
//!
//! let candidates = resource_candidates(&ctx.operation, &ctx);
//! assert!(find_grant(&ctx.permissions, &ctx.operation, &candidates).is_some());
//! ```

pub mod api;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod matcher;
pub mod membership;
pub mod pipeline;
pub mod roles;
pub mod token;
pub mod types;
pub mod variables;

// Re-export commonly used types
pub use config::AuthzConfig;
pub use engine::{AuthzEngine, Collaborators};
pub use error::{AuthzError, Result};
pub use matcher::{match_operation, match_resource};
pub use token::filter_by_scopes;
pub use types::{AuthKind, Operation, Permission, Resource, Role};
pub use variables::Variables;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
