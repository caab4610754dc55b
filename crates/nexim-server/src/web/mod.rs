pub mod middleware;
pub mod response;
pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::ConfigHandle;
use crate::convo::ConversationEngine;
use crate::delivery::membership::MembershipCache;
use crate::delivery::Pipeline;
use crate::gateway;
use crate::gateway::table::SessionTable;
use crate::store::Store;

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigHandle,
    pub store: Arc<Store>,
    pub convo: Arc<ConversationEngine>,
    pub table: Arc<SessionTable>,
    pub pipeline: Arc<Pipeline>,
    pub membership: Arc<MembershipCache>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state);

    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/ws", get(gateway::ws_upgrade));

    let user_routes = Router::new()
        .route("/user/info", get(routes::users::info))
        .route("/user/profile/{user_id}", get(routes::users::profile))
        .route("/user/update", put(routes::users::update))
        .route("/user/batch_info", post(routes::users::batch_info))
        .route(
            "/user/get_users_online_status",
            post(routes::users::online_status),
        )
        .route("/group/create", post(routes::groups::create))
        .route("/group/join", post(routes::groups::join))
        .route("/group/quit", post(routes::groups::quit))
        .route("/group/info", get(routes::groups::info))
        .route("/group/members", get(routes::groups::members))
        .route("/msg/send", post(routes::messages::send))
        .route("/msg/pull", get(routes::messages::pull))
        .route("/msg/max_seq", get(routes::messages::max_seq))
        .route("/msg/recall", post(routes::messages::recall))
        .route(
            "/conversation/list",
            get(routes::conversations::list_get).post(routes::conversations::list_post),
        )
        .route(
            "/conversation/all",
            get(routes::conversations::all_get).post(routes::conversations::all_post),
        )
        .route("/conversation/info", get(routes::conversations::info))
        .route("/conversation/update", put(routes::conversations::update))
        .route(
            "/conversation/mark_read",
            post(routes::conversations::mark_read),
        )
        .route(
            "/conversation/max_read_seq",
            get(routes::conversations::max_read_seq),
        )
        .route(
            "/conversation/unread_count",
            get(routes::conversations::unread_count),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::jwt_auth,
        ));

    let internal_plain = Router::new()
        .route("/internal/health", get(health))
        .route("/internal/auth/register", post(routes::auth::register))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::internal_auth::internal_auth,
        ));

    let internal_user = Router::new()
        .route("/internal/user/info", get(routes::users::info))
        .route(
            "/internal/user/profile/{user_id}",
            get(routes::users::profile),
        )
        .route("/internal/user/update", put(routes::users::update))
        .route("/internal/user/batch_info", post(routes::users::batch_info))
        .route(
            "/internal/user/get_users_online_status",
            post(routes::users::online_status),
        )
        .route("/internal/msg/send", post(routes::messages::send))
        .route(
            "/internal/conversation/list",
            get(routes::conversations::list_get).post(routes::conversations::list_post),
        )
        .route(
            "/internal/conversation/all",
            get(routes::conversations::all_get).post(routes::conversations::all_post),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::internal_auth::internal_auth_as_user,
        ));

    Router::new()
        .merge(public)
        .merge(user_routes)
        .merge(internal_plain)
        .merge(internal_user)
        .layer(axum::middleware::from_fn(middleware::trace::trace_id))
        .layer(cors)
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.config.load().cors_origins;
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<axum::http::HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_origin(allow_origin)
}
