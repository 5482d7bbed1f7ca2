//! Bearer credential parsing and identity resolution
//!
//! A bearer token is either a personal access token (recognized by its
//! literal prefix) or a signed session token. Both resolve to a user id and
//! an [`AuthKind`]; the [`Authenticator`] then attaches the user's cached
//! roles and permissions, narrowing them by token scope on the PAT path.

use crate::cache::PermissionCache;
use crate::error::{AuthzError, Result};
use crate::token::{filter_by_scopes, hash_token, TokenStore};
use crate::types::{AuthKind, Permission, UserId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Default prefix of personal access tokens
pub const DEFAULT_PAT_PREFIX: &str = "pat_";

const BEARER_SCHEME: &str = "bearer";

/// Verifies signed session tokens (JWT signing and verification live outside
/// this crate)
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// Validate the token and return its subject
    async fn verify(&self, token: &str) -> Result<UserId>;
}

/// Session verifier backed by a fixed token table, for development and tests
#[derive(Debug, Default, Clone)]
pub struct StaticSessionVerifier {
    sessions: HashMap<String, UserId>,
}

impl StaticSessionVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session token for a user
    pub fn with_session(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.sessions.insert(token.into(), user_id);
        self
    }
}

#[async_trait]
impl SessionVerifier for StaticSessionVerifier {
    async fn verify(&self, token: &str) -> Result<UserId> {
        self.sessions
            .get(token)
            .copied()
            .ok_or_else(|| AuthzError::Unauthenticated("invalid session token".to_string()))
    }
}

/// Collaborators needed to resolve a credential
#[derive(Clone)]
pub struct CredentialResolvers {
    pub sessions: Arc<dyn SessionVerifier>,
    pub tokens: Arc<dyn TokenStore>,
}

/// Identity established by a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub auth_kind: AuthKind,
    /// Scopes of the personal access token; `None` for session tokens
    pub token_scopes: Option<Vec<String>>,
}

/// A bearer credential, dispatched by prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Signed session token
    Session(String),
    /// Opaque personal access token
    Personal(String),
}

impl Credential {
    /// Parse an `Authorization` header value
    pub fn from_header(header: Option<&str>, pat_prefix: &str) -> Result<Self> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AuthzError::Unauthenticated("missing authorization header".to_string()))?;

        let (scheme, token) = header.split_once(' ').ok_or_else(|| {
            AuthzError::Unauthenticated("malformed authorization header".to_string())
        })?;

        if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            return Err(AuthzError::Unauthenticated(format!(
                "unsupported authorization scheme '{}'",
                scheme
            )));
        }

        let token = token.trim();
        if token.is_empty() {
            return Err(AuthzError::Unauthenticated("empty bearer token".to_string()));
        }

        Ok(Self::from_token(token, pat_prefix))
    }

    /// Classify a raw bearer token
    pub fn from_token(token: &str, pat_prefix: &str) -> Self {
        if !pat_prefix.is_empty() && token.starts_with(pat_prefix) {
            Self::Personal(token.to_string())
        } else {
            Self::Session(token.to_string())
        }
    }

    /// Auth kind this credential yields
    pub fn kind(&self) -> AuthKind {
        match self {
            Self::Session(_) => AuthKind::Jwt,
            Self::Personal(_) => AuthKind::Pat,
        }
    }

    /// Resolve the credential to an identity
    pub async fn resolve(
        &self,
        resolvers: &CredentialResolvers,
        client_ip: Option<IpAddr>,
    ) -> Result<Identity> {
        match self {
            Self::Session(token) => {
                let user_id = resolvers.sessions.verify(token).await?;
                Ok(Identity {
                    user_id,
                    auth_kind: AuthKind::Jwt,
                    token_scopes: None,
                })
            }
            Self::Personal(secret) => {
                let token = resolvers
                    .tokens
                    .find_by_hash(&hash_token(secret))
                    .await?
                    .ok_or_else(|| AuthzError::Unauthenticated("unknown access token".to_string()))?;

                token.validate(Utc::now(), client_ip)?;

                Ok(Identity {
                    user_id: token.user_id,
                    auth_kind: AuthKind::Pat,
                    token_scopes: Some(token.scopes),
                })
            }
        }
    }
}

/// Authenticated caller with effective roles and permissions
#[derive(Debug, Clone)]
pub struct Principal {
    pub identity: Identity,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}

/// Resolves bearer headers into principals
pub struct Authenticator {
    resolvers: CredentialResolvers,
    permissions: Arc<PermissionCache>,
    pat_prefix: String,
}

impl Authenticator {
    pub fn new(
        resolvers: CredentialResolvers,
        permissions: Arc<PermissionCache>,
        pat_prefix: impl Into<String>,
    ) -> Self {
        Self {
            resolvers,
            permissions,
            pat_prefix: pat_prefix.into(),
        }
    }

    /// Prefix identifying personal access tokens
    pub fn pat_prefix(&self) -> &str {
        &self.pat_prefix
    }

    /// Authenticate an `Authorization` header
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        client_ip: Option<IpAddr>,
    ) -> Result<Principal> {
        let credential = Credential::from_header(authorization, &self.pat_prefix)?;
        let identity = credential.resolve(&self.resolvers, client_ip).await?;

        let loaded = self.permissions.load(identity.user_id).await?;

        let permissions = match &identity.token_scopes {
            Some(scopes) => filter_by_scopes(scopes, &loaded.permissions),
            None => loaded.permissions,
        };

        debug!(
            user_id = identity.user_id,
            auth_kind = %identity.auth_kind,
            permissions = permissions.len(),
            "Authenticated caller"
        );

        Ok(Principal {
            identity,
            roles: loaded.roles,
            permissions,
        })
    }
}
