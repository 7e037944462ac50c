//! WebSocket transport boundary.
//!
//! One reader loop and one writer task per connection. The reader registers
//! the connection, turns each `askAi` into a streaming session and, when the
//! socket goes away, unregisters it and makes a best-effort attempt to send a
//! final `aiResponseComplete`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderValue, Method};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::config::{Config, ServerCfg};
use crate::error::{CoreResult, StreamError};
use crate::model::{BUSY_MESSAGE, ClientEvent, ConnectionId, Request, ServerEvent};
use crate::provider::GenerationProvider;
use crate::registry::SessionRegistry;
use crate::session::{SessionContext, StreamingSession};

#[derive(Clone)]
pub struct GatewayState {
    registry: Arc<SessionRegistry>,
    sessions: SessionContext,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl GatewayState {
    pub fn new(cfg: &Config, provider: Arc<dyn GenerationProvider>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let sessions = SessionContext::new(Arc::clone(&registry), provider, &cfg.streaming);
        Self {
            registry,
            sessions,
            ping_interval: Duration::from_millis(cfg.server.ping_interval_ms),
            ping_timeout: Duration::from_millis(cfg.server.ping_timeout_ms),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// `/ws` for the streaming protocol, `/health` for probes.
pub fn router(state: GatewayState, server: &ServerCfg) -> CoreResult<Router> {
    let origin = HeaderValue::from_str(&server.cors_origin).map_err(|e| {
        StreamError::Validation(format!("invalid cors origin '{}': {e}", server.cors_origin))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET]);
    Ok(Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(cors)
        .with_state(state))
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: GatewayState,
    server: &ServerCfg,
    shutdown: F,
) -> CoreResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, server)?;
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "gateway listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(StreamError::from)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let id = ConnectionId::new();
        let span = info_span!("connection", conn.id = %id);
        handle_socket(socket, state, id).instrument(span)
    })
}

async fn handle_socket(socket: WebSocket, state: GatewayState, id: ConnectionId) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.registry.register(id.clone(), tx);
    info!("client connected");

    let ping_every = state.ping_interval;
    let writer = tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(ping_every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    ev = rx.recv() => {
                        let Some(ev) = ev else { break };
                        let text = match serde_json::to_string(&ev) {
                            Ok(t) => t,
                            Err(e) => {
                                warn!(error = %e, "failed to encode event");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            debug!("socket closed, writer stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        }
        .in_current_span(),
    );

    loop {
        let next = match tokio::time::timeout(state.ping_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!("ping timeout, dropping connection");
                break;
            }
        };
        match next {
            Some(Ok(Message::Text(text))) => on_text(&state, &id, text.as_str()),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "socket read error");
                break;
            }
        }
    }

    if let Some(tx) = state.registry.unregister(&id)
        && tx.send(ServerEvent::AiResponseComplete).is_err()
    {
        debug!("final completion not delivered");
    }
    info!("client disconnected");
    // Sessions still holding a handle notice the unregister at their next
    // check; the writer exits once the last handle is dropped.
    drop(writer);
}

fn on_text(state: &GatewayState, id: &ConnectionId, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(error = %e, "ignoring malformed client event");
            return;
        }
    };
    match event {
        ClientEvent::AskAi(payload) => {
            let request = Request::new(id.clone(), payload.message);
            info!(
                req.id = %request.id,
                from = %request.sender,
                at = %request.timestamp.to_rfc3339(),
                content = %request.content,
                "received message"
            );
            start_session(state, request);
        }
    }
}

fn start_session(state: &GatewayState, request: Request) {
    let slot = match state.registry.try_begin(&request.sender) {
        Ok(slot) => slot,
        Err(StreamError::Busy { .. }) => {
            warn!(req.id = %request.id, "rejecting request, a response is already streaming");
            if let Some(tx) = state.registry.handle(&request.sender) {
                if tx.send(ServerEvent::error(BUSY_MESSAGE, "busy")).is_err() {
                    debug!("writer gone before busy rejection");
                }
            }
            return;
        }
        Err(e) => {
            warn!(error = %e, "cannot start session");
            return;
        }
    };
    let ctx = state.sessions.clone();
    tokio::spawn(
        async move {
            let _slot = slot;
            let mut session = StreamingSession::new(ctx, request.sender.clone());
            session.handle(request).await;
        }
        .in_current_span(),
    );
}
