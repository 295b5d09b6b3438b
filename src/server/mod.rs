//! Web server: telephony webhook endpoint plus the media WebSocket.

pub mod media_ws;
pub mod webhook;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::call::{spawn_call, CallDeps};
use crate::types::Call;

/// Counts live media WebSocket connections against the configured cap.
pub struct ConnectionGauge {
    active: AtomicUsize,
    cap: usize,
}

impl ConnectionGauge {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            cap,
        })
    }

    /// Take a slot, or refuse when the cap is reached. Warns at 80%.
    pub fn acquire(gauge: &Arc<Self>) -> Option<ConnectionSlot> {
        let current = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        if current > gauge.cap {
            gauge.active.fetch_sub(1, Ordering::SeqCst);
            warn!(current = current - 1, cap = gauge.cap, "connection cap reached, refusing socket");
            return None;
        }
        if current * 10 >= gauge.cap * 8 {
            warn!(current, cap = gauge.cap, "websocket connections at 80% of cap");
        }
        Some(ConnectionSlot(gauge.clone()))
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// RAII slot; dropping it releases the connection count.
pub struct ConnectionSlot(Arc<ConnectionGauge>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct ServerState {
    pub deps: CallDeps,
    pub connections: Arc<ConnectionGauge>,
}

pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);
    Router::new()
        .route("/webhooks/telephony", post(webhook::handle))
        .route("/media", get(media_ws::handle))
        .route("/calls", post(originate_call))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server until ctrl-c.
pub async fn start(deps: CallDeps) -> Result<()> {
    let config = deps.config.clone();
    let state = ServerState {
        connections: ConnectionGauge::new(config.server.max_ws_connections),
        deps,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(%addr, "callcore server listening");
    let registry = state.deps.registry.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    // Terminate surviving calls so every supervisor runs its cleanup
    // fan-out (STT disconnect, TTS abort, archive snapshot).
    let live = registry.all().await;
    if !live.is_empty() {
        info!(calls = live.len(), "terminating live calls for shutdown");
        for (_, handle) in live {
            let _ = handle
                .events
                .send(crate::call::CallEvent::Telephony(
                    crate::telephony::TelephonyEvent::Hangup {
                        cause: Some("shutdown".to_string()),
                    },
                ))
                .await;
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct DialRequest {
    to: String,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Serialize)]
struct DialResponse {
    call_control_id: String,
}

/// Originate an outbound call and start its supervisor.
async fn originate_call(
    State(state): State<ServerState>,
    Json(req): Json<DialRequest>,
) -> Result<Json<DialResponse>, axum::http::StatusCode> {
    let from = req
        .from
        .unwrap_or_else(|| state.deps.config.telephony.from_number.clone());

    let call_control_id = state
        .deps
        .telephony
        .originate(&from, &req.to)
        .await
        .map_err(|e| {
            warn!("originate failed: {}", e);
            axum::http::StatusCode::BAD_GATEWAY
        })?;

    let call = Call::new(&call_control_id, &from, &req.to);
    spawn_call(call, state.deps.clone()).await;
    info!(call = %call_control_id, to = %req.to, "outbound call originated");

    Ok(Json(DialResponse { call_control_id }))
}

#[derive(Debug, Serialize)]
struct Health {
    active_calls: usize,
    active_connections: usize,
}

async fn health(State(state): State<ServerState>) -> Json<Health> {
    Json(Health {
        active_calls: state.deps.registry.len().await,
        active_connections: state.connections.active(),
    })
}
