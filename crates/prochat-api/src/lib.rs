pub mod auth;
pub mod error;
pub mod extract;
pub mod friends;
pub mod messages;
pub mod middleware;
pub mod session;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
};

use prochat_db::Database;
use prochat_gateway::Dispatcher;
use prochat_gateway::connection;
use prochat_types::api::ErrorResponse;

use crate::middleware::require_session;
use crate::session::SessionCodec;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionCodec,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    /// Wire the shared state. The dispatcher persists through the same database.
    pub fn new(db: Arc<Database>, jwt_secret: &str) -> AppState {
        let dispatcher = Dispatcher::new(db.clone());
        Arc::new(Self {
            db,
            sessions: SessionCodec::new(jwt_secret),
            dispatcher,
        })
    }
}

/// All routes: the auth/friends/messages API under `/api/auth`, the realtime
/// socket at `/socket` and the health checks.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/user/register", post(auth::register))
        .route("/user/login", post(auth::login))
        .route("/user/logout", post(auth::logout));

    let protected_routes = Router::new()
        .route("/user", get(auth::current_user))
        .route("/search", get(friends::search_users))
        .route("/user/add-friend", post(friends::add_friend))
        .route("/user/remove-friend", post(friends::remove_friend))
        .route("/user/friends", get(friends::list_friends))
        .route("/messages/conversation/{friend_id}", get(messages::get_conversation))
        .route("/messages/send", post(messages::send_message))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_session));

    let api = public_routes.merge(protected_routes);

    Router::new()
        .route("/", get(banner))
        .route("/api/health", get(health))
        .route("/socket", get(ws_upgrade))
        .nest("/api/auth", api)
        .fallback(not_found)
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}

async fn banner() -> &'static str {
    "ProChat API is running"
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Route not found".into(),
        }),
    )
}
