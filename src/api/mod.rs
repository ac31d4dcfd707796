//! Broker HTTP surface.
//!
//! Routes are grouped by resource into the submodules below; this module
//! owns the server, the shared [`AppState`], and the router assembly.
//! The protected API sits behind the bearer-auth layer; `/health` and the
//! signature-verified webhook endpoints do not.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    auth::{auth_middleware, create_auth_state},
    config::BrokerConfig,
    engine::TaskEngine,
    rate_limit::{rate_limit_middleware, RateLimitState},
    router::InboxRouter,
    store::{
        AgentStore, ChannelStore, ConfigStore, Database, EpicStore, InboxStore, RepoStore,
        ServiceStore, SessionStore, TaskStore,
    },
    triggers::TriggerResolver,
    Result, SwarmError,
};

mod agents;
mod channels;
mod epics;
mod misc;
mod poll;
mod tasks;
mod types;
mod webhooks;

#[cfg(test)]
mod tests;

pub use types::*;

pub const SERVICE_NAME: &str = "swarm-core";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Route table — single source of truth for the HTTP surface.
const ROUTE_HEALTH: &str = "/health";
const ROUTE_ME: &str = "/me";
const ROUTE_PING: &str = "/ping";
const ROUTE_CLOSE: &str = "/close";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_POLL: &str = "/api/poll";
const ROUTE_TASKS: &str = "/api/tasks";
const ROUTE_TASK_BY_ID: &str = "/api/tasks/{task_id}";
const ROUTE_TASK_CLAIM: &str = "/api/tasks/{task_id}/claim";
const ROUTE_TASK_ACCEPT: &str = "/api/tasks/{task_id}/accept";
const ROUTE_TASK_REJECT: &str = "/api/tasks/{task_id}/reject";
const ROUTE_TASK_ACTIVATE: &str = "/api/tasks/{task_id}/activate";
const ROUTE_TASK_FINISH: &str = "/api/tasks/{task_id}/finish";
const ROUTE_TASK_PAUSE: &str = "/api/tasks/{task_id}/pause";
const ROUTE_TASK_RESUME: &str = "/api/tasks/{task_id}/resume";
const ROUTE_TASK_CANCEL: &str = "/api/tasks/{task_id}/cancel";
const ROUTE_PAUSED_TASKS: &str = "/api/paused-tasks";
const ROUTE_CANCELLED_TASKS: &str = "/cancelled-tasks";
const ROUTE_SESSION_LOGS: &str = "/api/session-logs";
const ROUTE_SESSION_COSTS: &str = "/api/session-costs";
const ROUTE_INBOX_STATUS: &str = "/api/inbox/{message_id}/status";
const ROUTE_CHANNELS: &str = "/api/channels";
const ROUTE_CHANNEL_MESSAGES: &str = "/api/channels/{channel_id}/messages";
const ROUTE_EPICS: &str = "/api/epics";
const ROUTE_EPIC_BY_ID: &str = "/api/epics/{epic_id}";
const ROUTE_SERVICES: &str = "/api/services";
const ROUTE_REPOS: &str = "/api/repos";
const ROUTE_CONFIGS: &str = "/api/configs";
const ROUTE_CONFIGS_RELOAD: &str = "/api/configs/reload";
const ROUTE_WEBHOOK_SLACK: &str = "/webhooks/slack";
const ROUTE_WEBHOOK_GITHUB: &str = "/webhooks/github";
const ROUTE_WEBHOOK_AGENTMAIL: &str = "/webhooks/agentmail";

/// Everything a handler needs, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: BrokerConfig,
    pub engine: TaskEngine,
    pub resolver: TriggerResolver,
    pub router: InboxRouter,
    pub agents: AgentStore,
    pub tasks: TaskStore,
    pub inbox: InboxStore,
    pub channels: ChannelStore,
    pub epics: EpicStore,
    pub services: ServiceStore,
    pub repos: RepoStore,
    pub sessions: SessionStore,
    pub configs: ConfigStore,
}

impl AppState {
    pub fn new(config: BrokerConfig, db: Database) -> Self {
        let engine = TaskEngine::new(db.clone());
        let agents = AgentStore::new(db.clone());
        let tasks = TaskStore::new(db.clone());
        let inbox = InboxStore::new(db.clone());
        Self {
            router: InboxRouter::new(
                engine.clone(),
                agents.clone(),
                inbox.clone(),
                tasks.clone(),
            ),
            resolver: TriggerResolver::new(db.clone()),
            channels: ChannelStore::new(db.clone()),
            epics: EpicStore::new(db.clone()),
            services: ServiceStore::new(db.clone()),
            repos: RepoStore::new(db.clone()),
            sessions: SessionStore::new(db.clone()),
            configs: ConfigStore::new(db),
            config,
            engine,
            agents,
            tasks,
            inbox,
        }
    }
}

pub struct ApiServer {
    config: BrokerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: BrokerConfig, db: Database) -> Self {
        let state = AppState::new(config.clone(), db);
        Self { config, state }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();

        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await
                .map_err(|e| SwarmError::Internal(e.into()))?;

        info!(
            "broker listening on {}:{}",
            self.config.host, self.config.port
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| SwarmError::Internal(e.into()))?;

        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.api_key.clone());
        let rate_limit_state = RateLimitState::new();

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::PATCH,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-agent-id"),
            ]);

        let protected = Router::new()
            .route(ROUTE_ME, get(agents::get_me))
            .route(ROUTE_PING, post(agents::ping))
            .route(ROUTE_CLOSE, post(agents::close))
            .route(ROUTE_AGENTS, post(agents::register).get(agents::list))
            .route(ROUTE_POLL, get(poll::poll))
            .route(ROUTE_TASKS, post(tasks::create).get(tasks::list))
            .route(ROUTE_TASK_BY_ID, get(tasks::get))
            .route(ROUTE_TASK_CLAIM, post(tasks::claim))
            .route(ROUTE_TASK_ACCEPT, post(tasks::accept))
            .route(ROUTE_TASK_REJECT, post(tasks::reject))
            .route(ROUTE_TASK_ACTIVATE, post(tasks::activate))
            .route(ROUTE_TASK_FINISH, post(tasks::finish))
            .route(ROUTE_TASK_PAUSE, post(tasks::pause))
            .route(ROUTE_TASK_RESUME, post(tasks::resume))
            .route(ROUTE_TASK_CANCEL, post(tasks::cancel))
            .route(ROUTE_PAUSED_TASKS, get(tasks::paused))
            .route(ROUTE_CANCELLED_TASKS, get(tasks::cancelled))
            .route(
                ROUTE_SESSION_LOGS,
                post(misc::append_session_logs).get(misc::list_session_logs),
            )
            .route(
                ROUTE_SESSION_COSTS,
                post(misc::append_session_cost).get(misc::list_session_costs),
            )
            .route(ROUTE_INBOX_STATUS, post(misc::set_inbox_status))
            .route(
                ROUTE_CHANNELS,
                post(channels::create).get(channels::list),
            )
            .route(
                ROUTE_CHANNEL_MESSAGES,
                post(channels::post_message).get(channels::messages),
            )
            .route(ROUTE_EPICS, post(epics::create).get(epics::list))
            .route(ROUTE_EPIC_BY_ID, get(epics::get).patch(epics::update))
            .route(
                ROUTE_SERVICES,
                post(misc::register_service).get(misc::list_services),
            )
            .route(ROUTE_REPOS, post(misc::create_repo).get(misc::list_repos))
            .route(ROUTE_CONFIGS, get(misc::list_configs).put(misc::set_config))
            .route(ROUTE_CONFIGS_RELOAD, post(misc::reload_configs))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let webhooks = Router::new()
            .route(ROUTE_WEBHOOK_SLACK, post(webhooks::slack))
            .route(ROUTE_WEBHOOK_GITHUB, post(webhooks::github))
            .route(ROUTE_WEBHOOK_AGENTMAIL, post(webhooks::agentmail))
            .layer(middleware::from_fn_with_state(
                rate_limit_state,
                rate_limit_middleware,
            ));

        Router::new()
            .route(ROUTE_HEALTH, get(misc::health))
            .merge(protected)
            .merge(webhooks)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
            .with_state(self.state.clone())
    }
}
