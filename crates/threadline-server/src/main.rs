mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use threadline_api::{AppState, AppStateInner};
use threadline_db::{Database, StoreGateway};
use threadline_gateway::connection;
use threadline_sync::Services;

use crate::config::ServerConfig;

#[derive(Clone)]
struct ServerState {
    db: Arc<Database>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "threadline=debug,threadline_api=debug,threadline_gateway=debug,\
                 threadline_sync=debug,threadline_db=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let db = Arc::new(Database::open(&config.db_path)?);

    if let Some(interval) = config.reconcile_interval {
        spawn_index_sweep(db.clone(), interval);
    }

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });
    let state = ServerState {
        db,
        jwt_secret: config.jwt_secret.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(threadline_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Threadline server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically rebuild every principal's mirror index from memberships.
fn spawn_index_sweep(db: Arc<Database>, interval: std::time::Duration) {
    let store: Arc<dyn StoreGateway> = Arc::new(db.admin());
    let services = Services::new(store);
    info!("Mirror index sweep every {:?}", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match services.threads.reconcile_all_indexes().await {
                Ok(report) => info!(
                    "Mirror index sweep: {} upserted, {} removed",
                    report.upserted, report.removed
                ),
                Err(e) => warn!("Mirror index sweep failed: {}", e),
            }
        }
    });
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.db, state.jwt_secret))
}
