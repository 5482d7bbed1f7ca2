//! Personal access token model and lookup

use super::normalize_scopes;
use crate::error::{AuthzError, Result};
use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const SECRET_LEN: usize = 40;

/// Lifecycle state of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Disabled,
    /// Reported lazily once `expires_at` has passed; never stored
    Expired,
}

/// Long-lived opaque credential owned by a user
///
/// Only the BLAKE3 hash of the secret is kept. Expiry is evaluated on use
/// rather than by a background sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalAccessToken {
    /// Token identifier
    pub id: String,

    /// Owner
    pub user_id: UserId,

    /// Label chosen by the owner
    pub name: String,

    /// Hex-encoded BLAKE3 hash of the secret
    pub token_hash: String,

    /// Restricting scopes, never empty once issued
    pub scopes: Vec<String>,

    /// Stored status (`Active` or `Disabled`)
    pub status: TokenStatus,

    /// Optional expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Allowed client addresses or CIDR ranges; empty allows all
    #[serde(default)]
    pub ip_whitelist: Vec<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A freshly issued token together with its one-time visible secret
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: PersonalAccessToken,
    pub secret: String,
}

/// Hash a presented secret the way tokens are stored
pub fn hash_token(secret: &str) -> String {
    blake3::hash(secret.as_bytes()).to_hex().to_string()
}

impl PersonalAccessToken {
    /// Issue a new active token for `user_id`
    ///
    /// The secret starts with `prefix` so the authenticator can route it to
    /// the personal-token path. An empty scope list becomes `["full"]`.
    pub fn issue(
        user_id: UserId,
        name: impl Into<String>,
        scopes: &[String],
        expires_at: Option<DateTime<Utc>>,
        ip_whitelist: Vec<String>,
        prefix: &str,
    ) -> Result<IssuedToken> {
        let scopes = normalize_scopes(scopes)?;

        for entry in &ip_whitelist {
            parse_allowlist_entry(entry)?;
        }

        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LEN)
            .map(char::from)
            .collect();
        let secret = format!("{}{}", prefix, random);

        let token = Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            name: name.into(),
            token_hash: hash_token(&secret),
            scopes,
            status: TokenStatus::Active,
            expires_at,
            ip_whitelist,
            created_at: Utc::now(),
        };

        Ok(IssuedToken { token, secret })
    }

    /// Whether the token has passed its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Effective status at `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        match self.status {
            TokenStatus::Disabled => TokenStatus::Disabled,
            _ if self.is_expired(now) => TokenStatus::Expired,
            status => status,
        }
    }

    /// Disable the token
    pub fn disable(&mut self) {
        self.status = TokenStatus::Disabled;
    }

    /// Re-enable a disabled token
    pub fn enable(&mut self) {
        self.status = TokenStatus::Active;
    }

    /// Whether `client_ip` passes the allowlist
    pub fn allows_ip(&self, client_ip: Option<IpAddr>) -> bool {
        if self.ip_whitelist.is_empty() {
            return true;
        }

        let Some(ip) = client_ip else {
            return false;
        };

        self.ip_whitelist.iter().any(|entry| match parse_allowlist_entry(entry) {
            Ok(net) => net.contains(&ip),
            Err(_) => false,
        })
    }

    /// Check that the token is usable at `now` from `client_ip`
    pub fn validate(&self, now: DateTime<Utc>, client_ip: Option<IpAddr>) -> Result<()> {
        match self.status_at(now) {
            TokenStatus::Active => {}
            TokenStatus::Disabled => {
                return Err(AuthzError::Unauthenticated("token is disabled".to_string()))
            }
            TokenStatus::Expired => {
                return Err(AuthzError::Unauthenticated("token has expired".to_string()))
            }
        }

        if !self.allows_ip(client_ip) {
            return Err(AuthzError::Unauthenticated(
                "token is not valid from this address".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse an allowlist entry: a bare address or a CIDR range
fn parse_allowlist_entry(entry: &str) -> Result<IpNet> {
    if let Ok(net) = entry.parse::<IpNet>() {
        return Ok(net);
    }
    entry
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| AuthzError::BadRequest(format!("invalid IP allowlist entry '{}'", entry)))
}

/// Token persistence backend
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Find a token by the hash of its secret
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PersonalAccessToken>>;

    /// Store a new token
    async fn insert(&self, token: PersonalAccessToken) -> Result<()>;

    /// Change the stored status of a token owned by `user_id`
    async fn set_status(&self, user_id: UserId, token_id: &str, status: TokenStatus) -> Result<()>;

    /// Tokens owned by a user
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PersonalAccessToken>>;
}

/// In-memory token store
#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, PersonalAccessToken>>>,
}

impl InMemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PersonalAccessToken>> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(token_hash).cloned())
    }

    async fn insert(&self, token: PersonalAccessToken) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn set_status(&self, user_id: UserId, token_id: &str, status: TokenStatus) -> Result<()> {
        if status == TokenStatus::Expired {
            return Err(AuthzError::BadRequest(
                "expired status is derived, not stored".to_string(),
            ));
        }

        let mut tokens = self.tokens.write().await;
        let token = tokens
            .values_mut()
            .find(|t| t.id == token_id && t.user_id == user_id)
            .ok_or_else(|| AuthzError::NotFound(format!("token {}", token_id)))?;

        match status {
            TokenStatus::Disabled => token.disable(),
            _ => token.enable(),
        }
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PersonalAccessToken>> {
        let tokens = self.tokens.read().await;
        Ok(tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issue(scopes: &[&str], ips: &[&str]) -> IssuedToken {
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        let ips = ips.iter().map(|s| s.to_string()).collect();
        PersonalAccessToken::issue(42, "ci", &scopes, None, ips, "pat_").unwrap()
    }

    #[test]
    fn test_issue_normalizes_and_hashes() {
        let issued = issue(&[], &[]);
        assert!(issued.secret.starts_with("pat_"));
        assert_eq!(issued.token.scopes, vec!["full".to_string()]);
        assert_eq!(issued.token.token_hash, hash_token(&issued.secret));
        assert_ne!(issued.token.token_hash, issued.secret);
        assert_eq!(issued.token.status, TokenStatus::Active);
    }

    #[test]
    fn test_issue_rejects_bad_input() {
        let bad_scope = vec!["root".to_string()];
        assert!(PersonalAccessToken::issue(1, "x", &bad_scope, None, vec![], "pat_").is_err());
        assert!(
            PersonalAccessToken::issue(1, "x", &[], None, vec!["not-an-ip".into()], "pat_")
                .is_err()
        );
    }

    #[test]
    fn test_lazy_expiry() {
        let mut token = issue(&["self"], &[]).token;
        let now = Utc::now();
        token.expires_at = Some(now + Duration::minutes(5));
        assert_eq!(token.status_at(now), TokenStatus::Active);
        assert_eq!(token.status_at(now + Duration::minutes(5)), TokenStatus::Expired);
        assert!(token.validate(now + Duration::hours(1), None).is_err());
    }

    #[test]
    fn test_disable_enable() {
        let mut token = issue(&["self"], &[]).token;
        let now = Utc::now();
        token.disable();
        assert!(matches!(
            token.validate(now, None),
            Err(AuthzError::Unauthenticated(_))
        ));
        token.enable();
        assert!(token.validate(now, None).is_ok());
    }

    #[test]
    fn test_ip_allowlist() {
        let token = issue(&["full"], &["10.0.0.0/8", "192.168.1.7"]).token;
        assert!(token.allows_ip(Some("10.2.3.4".parse().unwrap())));
        assert!(token.allows_ip(Some("192.168.1.7".parse().unwrap())));
        assert!(!token.allows_ip(Some("192.168.1.8".parse().unwrap())));
        assert!(!token.allows_ip(None));

        let open = issue(&["full"], &[]).token;
        assert!(open.allows_ip(None));
    }

    #[tokio::test]
    async fn test_store_lookup_and_status() {
        let store = InMemoryTokenStore::new();
        let issued = issue(&["self"], &[]);
        let id = issued.token.id.clone();
        store.insert(issued.token).await.unwrap();

        let found = store.find_by_hash(&hash_token(&issued.secret)).await.unwrap();
        assert!(found.is_some());

        store.set_status(42, &id, TokenStatus::Disabled).await.unwrap();
        let found = store
            .find_by_hash(&hash_token(&issued.secret))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, TokenStatus::Disabled);

        // another user cannot toggle it
        assert!(store.set_status(7, &id, TokenStatus::Active).await.is_err());
        assert_eq!(store.list_for_user(42).await.unwrap().len(), 1);
    }
}
