use std::sync::Arc;

use {
    axum::{Json, Router, extract::State, routing::{any, get}},
    tokio::net::TcpListener,
    tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer},
    tracing::info,
};

use crate::{routes, state::GatewayState, ws};

/// Assemble the gateway application: health, WebSocket upgrade, and the
/// `/api/v1` surface, wrapped in trace/cors/panic-catch layers so a
/// panicking handler never takes the process down.
pub fn build_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", any(ws::ws_handler))
        .nest("/api/v1", routes::api_router(Arc::clone(&state)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.registry.connection_count(),
    }))
}

/// Serve until the state's shutdown token fires, then close every socket
/// with a "going away" frame and drain.
pub async fn run(state: Arc<GatewayState>, listener: TcpListener) -> anyhow::Result<()> {
    let app = build_app(Arc::clone(&state));
    info!(addr = %listener.local_addr()?, "gateway listening");

    // When shutdown fires, tell every connected client we are going away.
    // The write pumps emit the close frame and exit, which ends the read
    // pumps and lets the graceful shutdown below complete.
    let closer = Arc::clone(&state);
    tokio::spawn(async move {
        closer.shutdown.cancelled().await;
        let clients = closer.registry.all_clients();
        info!(connections = clients.len(), "closing client connections");
        for client in clients {
            client.send_close("going away");
        }
    });

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("gateway stopped");
    Ok(())
}
