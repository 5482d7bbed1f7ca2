//! # Authorization HTTP Server
//!
//! Runs the tenant authorization engine over in-memory collaborators.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `RUST_LOG` - Log level (default: info)
//! - `CACHE_TTL` - Permission cache TTL in seconds (default: 300)
//! - `CACHE_KEY_PREFIX` - Permission cache key prefix (default: `authz:perms:`)
//! - `PAT_PREFIX` - Personal access token prefix (default: `pat_`)
//! - `DEV_SESSION_TOKENS` - Development sessions, `token=user_id` pairs separated by commas
//! - `DEV_ADMIN_USERS` - Comma separated user ids granted the `admin` role

use anyhow::Context;
use axum::serve;
use std::net::SocketAddr;
use std::sync::Arc;
use tenant_authz::api::{build_router, AppState};
use tenant_authz::audit::{AuditSink, ChannelAuditSink, TracingAuditSink};
use tenant_authz::auth::StaticSessionVerifier;
use tenant_authz::membership::InMemoryMembershipStore;
use tenant_authz::roles::{InMemoryRoleStore, RoleStore};
use tenant_authz::token::InMemoryTokenStore;
use tenant_authz::types::{Permission, Role, UserId, ADMIN_ROLE, USER_ROLE};
use tenant_authz::{AuthzConfig, AuthzEngine, Collaborators};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ADMIN_ROLE_ID: u64 = 1;
const USER_ROLE_ID: u64 = 2;

/// Seed the built-in roles
async fn seed_roles(store: &InMemoryRoleStore) -> anyhow::Result<()> {
    store
        .put_role(
            Role::new(ADMIN_ROLE_ID, ADMIN_ROLE, "Administrator")
                .system()
                .with_permissions(vec![Permission::any_resource("*:*:*")]),
        )
        .await?;
    store
        .put_role(
            Role::new(USER_ROLE_ID, USER_ROLE, "User")
                .system()
                .with_permissions(vec![Permission::any_resource("self:*:*")]),
        )
        .await?;
    Ok(())
}

/// Parse `token=user_id` pairs
fn dev_sessions(raw: &str) -> StaticSessionVerifier {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .fold(StaticSessionVerifier::new(), |verifier, pair| {
            match pair.split_once('=').map(|(t, u)| (t.trim(), u.trim().parse::<UserId>())) {
                Some((token, Ok(user_id))) if !token.is_empty() => {
                    verifier.with_session(token, user_id)
                }
                _ => {
                    warn!("Ignoring malformed DEV_SESSION_TOKENS entry");
                    verifier
                }
            }
        })
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tenant authorization server v{}", tenant_authz::VERSION);

    let config = AuthzConfig::from_env();
    info!("Configuration:");
    info!("  Port: {}", config.port);
    info!("  Cache TTL: {}s", config.cache.ttl_secs);
    info!("  Cache key prefix: {}", config.cache.key_prefix);
    info!("  PAT prefix: {}", config.pat_prefix);

    let roles = Arc::new(InMemoryRoleStore::new());
    seed_roles(&roles).await.context("seeding built-in roles")?;

    let sessions = dev_sessions(&std::env::var("DEV_SESSION_TOKENS").unwrap_or_default());

    if let Ok(admins) = std::env::var("DEV_ADMIN_USERS") {
        for raw in admins.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let user_id: UserId = raw
                .parse()
                .with_context(|| format!("invalid DEV_ADMIN_USERS entry '{}'", raw))?;
            roles.assign_role(user_id, ADMIN_ROLE_ID).await?;
            info!("Granted admin role to user {}", user_id);
        }
    }

    // audit entries are drained off the request path
    let (audit, mut audit_rx) = ChannelAuditSink::new(config.audit_buffer);
    tokio::spawn(async move {
        let sink = TracingAuditSink;
        while let Some(entry) = audit_rx.recv().await {
            sink.record(entry);
        }
    });

    let engine = AuthzEngine::new(
        config.clone(),
        Collaborators {
            roles,
            memberships: Arc::new(InMemoryMembershipStore::new()),
            tokens: Arc::new(InMemoryTokenStore::new()),
            sessions: Arc::new(sessions),
            audit: Arc::new(audit),
            cache_backend: None,
        },
    )
    .await;

    let app = build_router(AppState::from_engine(&engine), &engine.stage_set())
        .context("building router")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shut down gracefully");
    Ok(())
}
