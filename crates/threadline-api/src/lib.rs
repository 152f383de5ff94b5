pub mod error;
pub mod membership;
pub mod messages;
pub mod middleware;
pub mod threads;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use threadline_db::{Database, StoreGateway};
use threadline_sync::{AuthState, Services, ThreadlineClient};
use threadline_types::models::PrincipalId;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Services acting as `principal`, subject to the store's access rules.
    pub fn client_for(&self, principal: &PrincipalId) -> ThreadlineClient {
        let store: Arc<dyn StoreGateway> = Arc::new(self.db.scoped(principal.as_str()));
        ThreadlineClient::new(
            Services::new(store),
            Arc::new(AuthState::signed_in(principal.clone())),
        )
    }
}

/// REST routes. Every route requires a bearer token.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/threads", post(threads::create_thread))
        .route(
            "/threads/{thread_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/threads/{thread_id}/membership",
            get(membership::get_membership)
                .put(membership::join)
                .delete(membership::leave),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
