//! Domain events and a small publish/subscribe bus
//!
//! Subscriptions are a flat `(topic pattern, handler)` registry. A pattern
//! is an exact topic (`role.permissions_changed`), an aggregate wildcard
//! (`user.*`) or `*`. Handlers run sequentially inside `publish`; their
//! errors are logged and never reach the publisher.

mod invalidation;

pub use invalidation::CacheInvalidator;

use crate::error::Result;
use crate::types::{RoleId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Topic of [`DomainEvent::RolePermissionsChanged`]
pub const TOPIC_ROLE_PERMISSIONS_CHANGED: &str = "role.permissions_changed";

/// Topic of [`DomainEvent::UserRoleAssigned`]
pub const TOPIC_USER_ROLE_ASSIGNED: &str = "user.role_assigned";

/// Topic of [`DomainEvent::UserDeleted`]
pub const TOPIC_USER_DELETED: &str = "user.deleted";

/// Write-side events that affect computed permission sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A role's permission list was replaced
    RolePermissionsChanged { role_id: RoleId },
    /// A user's role assignments changed
    UserRoleAssigned { user_id: UserId },
    /// A user was removed
    UserDeleted { user_id: UserId },
}

impl DomainEvent {
    /// Topic the event is published under
    pub fn topic(&self) -> &'static str {
        match self {
            Self::RolePermissionsChanged { .. } => TOPIC_ROLE_PERMISSIONS_CHANGED,
            Self::UserRoleAssigned { .. } => TOPIC_USER_ROLE_ASSIGNED,
            Self::UserDeleted { .. } => TOPIC_USER_DELETED,
        }
    }
}

/// Consumer of domain events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs
    fn name(&self) -> &str;

    /// Handle one event
    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

/// Checks whether a subscription pattern covers a topic
///
/// # Examples
///
/// ```
/// use tenant_authz::events::topic_matches;
///
/// assert!(topic_matches("*", "user.deleted"));
/// assert!(topic_matches("user.*", "user.deleted"));
/// assert!(!topic_matches("role.*", "user.deleted"));
/// assert!(topic_matches("user.deleted", "user.deleted"));
/// ```
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(aggregate) = pattern.strip_suffix(".*") {
        return topic
            .strip_prefix(aggregate)
            .map_or(false, |rest| rest.starts_with('.') && rest.len() > 1);
    }

    pattern == topic
}

/// In-process event bus
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<(String, Arc<dyn EventHandler>)>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for topics matching `pattern`
    pub async fn subscribe(&self, pattern: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let pattern = pattern.into();
        debug!("Subscribing handler '{}' to '{}'", handler.name(), pattern);
        self.subscriptions.write().await.push((pattern, handler));
    }

    /// Deliver `event` to every matching handler; returns how many ran
    pub async fn publish(&self, event: DomainEvent) -> usize {
        let topic = event.topic();
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        debug!("Publishing {} to {} handler(s)", topic, handlers.len());

        for handler in &handlers {
            if let Err(e) = handler.handle(&event).await {
                warn!(
                    handler = handler.name(),
                    topic = topic,
                    "Event handler failed: {}",
                    e
                );
            }
        }

        handlers.len()
    }

    /// Number of registered subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}
