//! HTTP API: route table, handlers and router assembly
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check (public)
//! - `GET /tokens/scopes` - Personal access token scopes (public)
//! - `GET /profile` - Caller identity and effective permissions
//! - `GET /tokens` - Caller's personal access tokens
//! - `POST /tokens` - Issue a personal access token
//! - `GET /admin/users` - Users holding any role
//! - `GET /admin/cache/stats` - Permission cache statistics
//! - `PUT /admin/roles/{role_id}/permissions` - Replace a role's permissions
//! - `GET /orgs/{org_id}/teams/{team_id}/settings` - Team settings

use crate::cache::{CacheStats, PermissionCache};
use crate::engine::AuthzEngine;
use crate::error::{AuthzError, Result};
use crate::http::mount;
use crate::membership::{OrgRole, TeamRole};
use crate::pipeline::{assemble, RequestContext, RouteMeta, RouteRegistry, StageSet};
use crate::roles::RoleService;
use crate::token::{available_scopes, PersonalAccessToken, ScopeInfo, TokenStatus, TokenStore};
use crate::types::{AuthKind, OrgId, Permission, RoleId, TeamId, UserId};
use axum::{
    extract::{Path, State},
    http::{header, HeaderName, Method, StatusCode},
    response::Json,
    routing::{get, post, put, MethodRouter},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub role_service: Arc<RoleService>,
    pub tokens: Arc<dyn TokenStore>,
    pub cache: Arc<PermissionCache>,
    pub pat_prefix: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn from_engine(engine: &AuthzEngine) -> Self {
        Self {
            role_service: engine.role_service().clone(),
            tokens: engine.tokens().clone(),
            cache: engine.cache().clone(),
            pat_prefix: engine.config().pat_prefix.clone(),
            start_time: Instant::now(),
        }
    }
}

/// Routes served by this API
pub fn route_table() -> Result<Vec<RouteMeta>> {
    Ok(vec![
        RouteMeta::new("GET", "/health", "public:health:get")?.with_tags(&["system"]),
        RouteMeta::new("GET", "/tokens/scopes", "public:tokens:scopes")?.with_tags(&["tokens"]),
        RouteMeta::new("GET", "/profile", "self:profile:get")?.with_tags(&["profile"]),
        RouteMeta::new("GET", "/tokens", "self:tokens:list")?.with_tags(&["tokens"]),
        RouteMeta::new("POST", "/tokens", "self:tokens:create")?.with_tags(&["tokens"]),
        RouteMeta::new("GET", "/admin/users", "sys:users:list")?.with_tags(&["admin"]),
        RouteMeta::new("GET", "/admin/cache/stats", "sys:cache:stats")?.with_tags(&["admin"]),
        RouteMeta::new("PUT", "/admin/roles/{role_id}/permissions", "sys:roles:update")?
            .with_tags(&["admin", "roles"]),
        RouteMeta::new(
            "GET",
            "/orgs/{org_id}/teams/{team_id}/settings",
            "org:team:settings",
        )?
        .with_tags(&["teams"]),
    ])
}

fn handler_for(operation_id: &str) -> Option<MethodRouter<AppState>> {
    let handler = match operation_id {
        "public:health:get" => get(health_check),
        "public:tokens:scopes" => get(token_scopes),
        "self:profile:get" => get(profile),
        "self:tokens:list" => get(list_tokens),
        "self:tokens:create" => post(create_token),
        "sys:users:list" => get(list_users),
        "sys:cache:stats" => get(cache_stats),
        "sys:roles:update" => put(update_role_permissions),
        "org:team:settings" => get(team_settings),
        _ => return None,
    };
    Some(handler)
}

/// Configure CORS middleware
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(crate::http::X_REQUEST_ID),
        ])
        .expose_headers([HeaderName::from_static(crate::http::X_REQUEST_ID)])
}

/// Create the HTTP router, every route behind its pipeline
pub fn build_router(state: AppState, stages: &StageSet) -> Result<Router> {
    let registry = RouteRegistry::build(route_table()?)?;
    let pipelines = assemble(&registry, stages);

    let mut router = Router::new();
    for route in registry.iter() {
        let op = route.operation_id.as_str();
        let pipeline = pipelines
            .get(op)
            .cloned()
            .ok_or_else(|| AuthzError::Internal(format!("no pipeline for '{}'", op)))?;
        let handler = handler_for(op)
            .ok_or_else(|| AuthzError::Internal(format!("no handler for '{}'", op)))?;
        router = mount(router, pipeline, handler);
    }

    info!("HTTP router built with {} routes", registry.len());

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Ok(router
        .layer(ServiceBuilder::new().layer(trace).layer(cors_layer()))
        .with_state(state))
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: crate::VERSION.to_string(),
    })
}

/// GET /tokens/scopes
async fn token_scopes() -> Json<Vec<ScopeInfo>> {
    Json(available_scopes())
}

fn caller(ctx: &RequestContext) -> Result<UserId> {
    ctx.user_id
        .ok_or_else(|| AuthzError::Unauthenticated("no authenticated caller".to_string()))
}

/// Caller identity and effective permissions
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user_id: UserId,
    pub auth_kind: Option<AuthKind>,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}

/// GET /profile
async fn profile(Extension(ctx): Extension<RequestContext>) -> Result<Json<ProfileResponse>> {
    Ok(Json(ProfileResponse {
        user_id: caller(&ctx)?,
        auth_kind: ctx.auth_kind,
        roles: ctx.roles,
        permissions: ctx.permissions,
    }))
}

/// Token metadata exposed to its owner; never includes the hash
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenView {
    pub id: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub status: TokenStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&PersonalAccessToken> for TokenView {
    fn from(token: &PersonalAccessToken) -> Self {
        Self {
            id: token.id.clone(),
            name: token.name.clone(),
            scopes: token.scopes.clone(),
            status: token.status_at(Utc::now()),
            expires_at: token.expires_at,
            ip_whitelist: token.ip_whitelist.clone(),
            created_at: token.created_at,
        }
    }
}

/// GET /tokens
async fn list_tokens(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<TokenView>>> {
    let mut tokens = state.tokens.list_for_user(caller(&ctx)?).await?;
    tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(Json(tokens.iter().map(TokenView::from).collect()))
}

/// Token issue request
#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
}

/// Issued token; the secret is shown only here
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTokenResponse {
    pub token: String,
    #[serde(flatten)]
    pub info: TokenView,
}

/// POST /tokens
async fn create_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CreateTokenResponse>)> {
    let user_id = caller(&ctx)?;
    if req.name.trim().is_empty() {
        return Err(AuthzError::BadRequest("token name cannot be empty".to_string()));
    }

    let issued = PersonalAccessToken::issue(
        user_id,
        req.name,
        &req.scopes,
        req.expires_at,
        req.ip_whitelist,
        &state.pat_prefix,
    )?;
    let info = TokenView::from(&issued.token);
    state.tokens.insert(issued.token).await?;

    info!(user_id, token_id = %info.id, scopes = ?info.scopes, "Issued personal access token");
    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            token: issued.secret,
            info,
        }),
    ))
}

/// Users holding at least one explicit role
#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserId>,
}

/// GET /admin/users
async fn list_users(State(state): State<AppState>) -> Result<Json<UsersResponse>> {
    let store = state.role_service.store();
    let mut users = BTreeSet::new();
    for role in store.list_roles().await? {
        users.extend(store.user_ids_with_role(role.id).await?);
    }
    Ok(Json(UsersResponse {
        users: users.into_iter().collect(),
    }))
}

/// GET /admin/cache/stats
async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// Role permission replacement request
#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    pub permissions: Vec<Permission>,
}

/// PUT /admin/roles/{role_id}/permissions
async fn update_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    Json(req): Json<SetPermissionsRequest>,
) -> Result<StatusCode> {
    state
        .role_service
        .set_permissions(role_id, req.permissions)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Team settings as seen by the caller
#[derive(Debug, Serialize, Deserialize)]
pub struct TeamSettingsResponse {
    pub org_id: OrgId,
    pub team_id: TeamId,
    pub org_role: Option<OrgRole>,
    pub team_role: Option<TeamRole>,
    pub granted_by: Option<Permission>,
}

/// GET /orgs/{org_id}/teams/{team_id}/settings
async fn team_settings(Extension(ctx): Extension<RequestContext>) -> Result<Json<TeamSettingsResponse>> {
    match (ctx.org_id, ctx.team_id) {
        (Some(org_id), Some(team_id)) => Ok(Json(TeamSettingsResponse {
            org_id,
            team_id,
            org_role: ctx.org_role,
            team_role: ctx.team_role,
            granted_by: ctx.granted_by,
        })),
        _ => Err(AuthzError::Internal("team context missing".to_string())),
    }
}
