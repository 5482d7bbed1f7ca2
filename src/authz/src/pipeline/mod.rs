//! Per-route authorization pipeline
//!
//! Every declared route gets a fixed, linear chain of stages assembled once
//! at startup:
//!
//! ```text
//! request_id → authentication → org_context → team_context → rbac → audit → response_log
//!               (non-public)    ({org_id})     ({team_id})   (non-public) (non-GET, non-public)
//! ```
//!
//! Stages run in order against a [`RequestContext`]. The first stage that
//! fails rejects the request and no later stage processes it; every stage
//! still sees the final outcome through [`Stage::complete`].

mod context;
mod route;
mod stages;

pub use context::{IncomingRequest, RequestContext};
pub use route::{RouteMeta, RouteRegistry, ORG_PARAM, TEAM_PARAM};
pub use stages::{
    find_grant, resource_candidates, team_lead_permission, AuditStage, AuthenticationStage,
    OrgContextStage, RbacStage, RequestIdStage, ResponseLogStage, TeamContextStage,
    TEAM_LEAD_OPERATION, UNIVERSAL_CANDIDATE,
};

use crate::audit::AuditSink;
use crate::auth::Authenticator;
use crate::error::Result;
use crate::membership::MembershipStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One step of a route's chain
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name used in logs
    fn name(&self) -> &'static str;

    /// Process the request, enriching the context or rejecting
    async fn process(&self, request: &IncomingRequest, ctx: &mut RequestContext) -> Result<()>;

    /// Called once the chain has finished, with the final outcome
    fn complete(&self, _request: &IncomingRequest, _ctx: &RequestContext, _outcome: &Result<()>) {}
}

/// Optional stage per conditional concern; `None` disables the concern
#[derive(Clone, Default)]
pub struct StageSet {
    pub authentication: Option<Arc<dyn Stage>>,
    pub org_context: Option<Arc<dyn Stage>>,
    pub team_context: Option<Arc<dyn Stage>>,
    pub rbac: Option<Arc<dyn Stage>>,
    pub audit: Option<Arc<dyn Stage>>,
}

impl StageSet {
    /// Every concern enabled with the standard stages
    pub fn standard(
        authenticator: Arc<Authenticator>,
        memberships: Arc<dyn MembershipStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            authentication: Some(Arc::new(AuthenticationStage::new(authenticator))),
            org_context: Some(Arc::new(OrgContextStage::new(memberships.clone()))),
            team_context: Some(Arc::new(TeamContextStage::new(memberships))),
            rbac: Some(Arc::new(RbacStage)),
            audit: Some(Arc::new(AuditStage::new(audit))),
        }
    }
}

/// Pure builder mapping route metadata to a stage chain
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Assemble the chain for one route
    pub fn build(route: &RouteMeta, set: &StageSet) -> Pipeline {
        let public = route.is_public();
        let mut chain: Vec<Arc<dyn Stage>> = vec![Arc::new(RequestIdStage)];

        let conditional = [
            (&set.authentication, !public),
            (&set.org_context, route.needs_org_context()),
            (&set.team_context, route.needs_team_context()),
            (&set.rbac, !public),
            (&set.audit, !public && !route.is_read_only()),
        ];
        for (stage, wanted) in conditional {
            if let (Some(stage), true) = (stage, wanted) {
                chain.push(Arc::clone(stage));
            }
        }

        chain.push(Arc::new(ResponseLogStage));

        Pipeline {
            route: Arc::new(route.clone()),
            stages: chain,
        }
    }
}

/// Assembled chain for one route; immutable and shared across requests
#[derive(Clone)]
pub struct Pipeline {
    route: Arc<RouteMeta>,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn route(&self) -> &RouteMeta {
        &self.route
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the chain for one request
    ///
    /// Returns the populated context when every stage passed.
    pub async fn execute(&self, request: &IncomingRequest) -> Result<RequestContext> {
        let (ctx, outcome) = self.run(request).await;
        outcome.map(|()| ctx)
    }

    /// Run the chain, returning the context reached alongside the outcome
    pub async fn run(&self, request: &IncomingRequest) -> (RequestContext, Result<()>) {
        let mut ctx = RequestContext::new(self.route.operation_id.clone());

        let mut outcome = Ok(());
        for stage in &self.stages {
            if let Err(e) = stage.process(request, &mut ctx).await {
                debug!(stage = stage.name(), "Stage rejected request: {}", e);
                outcome = Err(e);
                break;
            }
        }

        for stage in &self.stages {
            stage.complete(request, &ctx, &outcome);
        }

        (ctx, outcome)
    }
}

/// Pipelines for every declared route, keyed by operation id
#[derive(Clone, Default)]
pub struct PipelineTable {
    pipelines: HashMap<String, Arc<Pipeline>>,
}

impl PipelineTable {
    pub fn get(&self, operation_id: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(operation_id)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// Build the pipeline of every route in the registry
pub fn assemble(registry: &RouteRegistry, set: &StageSet) -> PipelineTable {
    let pipelines = registry
        .iter()
        .map(|route| {
            let pipeline = PipelineBuilder::build(route, set);
            debug!(
                operation = %route.operation_id,
                stages = ?pipeline.stage_names(),
                "Assembled pipeline"
            );
            (route.operation_id.to_string(), Arc::new(pipeline))
        })
        .collect();
    PipelineTable { pipelines }
}
