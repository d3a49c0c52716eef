//! Scrawl-Live Rendezvous Server
//!
//! Matchbox signaling behind axum: peers register here, discover each other
//! and negotiate their WebRTC data channels. Game state never touches this
//! process; it only brokers introductions.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use matchbox_signaling::SignalingServer;
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Peers currently registered with the signaling room, for the health
/// endpoint.
#[derive(Clone, Default)]
struct PeerLog {
    peers: Arc<Mutex<HashSet<String>>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("SCRAWL_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(3210);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let peer_log = PeerLog::default();
    let connected = peer_log.clone();
    let disconnected = peer_log.clone();
    let health_state = peer_log.clone();

    let server = SignalingServer::full_mesh_builder(addr)
        .cors()
        .trace()
        .on_peer_connected(move |peer_id| {
            connected.peers.lock().insert(peer_id.0.to_string());
            tracing::info!(%peer_id, "peer connected");
        })
        .on_peer_disconnected(move |peer_id| {
            disconnected.peers.lock().remove(&peer_id.0.to_string());
            tracing::info!(%peer_id, "peer disconnected");
        })
        .build_with(move |signaling_router| {
            let health = Router::new()
                .route("/healthz", get(healthz))
                .with_state(health_state);
            Router::new()
                .nest("/signaling", signaling_router)
                .merge(health)
        });

    tracing::info!("Rendezvous server listening on {addr}");
    tracing::info!("  - Signaling: ws://{addr}/signaling/{{app_key}}");
    tracing::info!("  - Health:    http://{addr}/healthz");

    server.serve().await?;
    Ok(())
}

async fn healthz(State(log): State<PeerLog>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "peers": log.peers.lock().len(),
    }))
}
