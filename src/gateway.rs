//! WebSocket gateway: accepts connections and hands each one a session
//!
//! The socket is split on accept. A single writer task owns the sending half
//! and drains the session's outbound queue, so JSON control messages and
//! binary audio chunks never interleave. The receiving half is adapted into
//! the session's inbound stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};

use crate::clients::ExternalClients;
use crate::config::Config;
use crate::session::{Inbound, OutboundFrame, OutboundSink, Session};
use crate::silence::SilenceConfig;
use crate::{Error, Result};

/// Outbound frames buffered per connection before senders block
const OUTBOUND_QUEUE: usize = 32;

/// A slower client write than this tears the session down
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared gateway state
pub struct AppState {
    clients: ExternalClients,
    silence: SilenceConfig,
    sessions: AtomicUsize,
}

/// Run the gateway until the listener fails
///
/// # Errors
///
/// Returns error if the vendor clients cannot be constructed or the port
/// cannot be bound
pub async fn serve(config: Config) -> Result<()> {
    let clients = ExternalClients::from_config(&config)?;
    let state = Arc::new(AppState {
        clients,
        silence: config.silence.clone(),
        sessions: AtomicUsize::new(0),
    });

    let app = router(state, config.static_dir.as_deref());

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Config(format!("server error: {e}")))?;

    Ok(())
}

/// Build the gateway router
pub fn router(state: Arc<AppState>, static_dir: Option<&std::path::Path>) -> Router {
    let mut router = Router::new().route("/ws", get(ws_upgrade)).with_state(state);

    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        router = router
            .nest_service("/static", ServeDir::new(dir))
            .route_service("/", ServeFile::new(index));
        tracing::info!(path = %dir.display(), "serving browser shell");
    }

    router
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = short_session_id();
    let active = state.sessions.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(session_id = %session_id, active, "voice session connected");

    let (ws_tx, ws_rx) = socket.split();

    let (out_tx, out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE);
    let writer = tokio::spawn(write_loop(ws_tx, out_rx));

    let inbound = ws_rx.filter_map(|message| {
        std::future::ready(match message {
            Ok(Message::Binary(frame)) => Some(Inbound::Audio(frame)),
            Ok(Message::Text(text)) => Some(Inbound::Text(text.to_string())),
            Ok(Message::Close(_)) | Err(_) => Some(Inbound::Closed),
            Ok(_) => None,
        })
    });
    futures::pin_mut!(inbound);

    let session = Session::new(
        session_id.as_str(),
        OutboundSink::new(out_tx),
        state.clients.clone(),
        state.silence.clone(),
    );
    session.run(inbound).await;

    // The session dropped its sink and stopped its turn task, so the writer
    // drains and exits
    let _ = writer.await;

    let active = state.sessions.fetch_sub(1, Ordering::SeqCst) - 1;
    tracing::info!(session_id = %session_id, active, "voice session removed");
}

/// Forward outbound frames to the socket, one writer per connection
async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = out_rx.recv().await {
        let message = match frame {
            OutboundFrame::Control(text) => Message::Text(text.into()),
            OutboundFrame::Audio(bytes) => Message::Binary(bytes),
        };

        match tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "client write failed");
                break;
            }
            Err(_) => {
                tracing::warn!("client write stalled, dropping connection");
                break;
            }
        }
    }

    let _ = ws_tx.close().await;
}

/// Short random id for log correlation
fn short_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
