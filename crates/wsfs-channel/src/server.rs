//! WebSocket server feeding the channel endpoint.
//!
//! The peer (typically a browser page) connects to `GET /ws`; `GET /` serves
//! a small landing page pointing at it. One peer is active at a time — a new
//! connection replaces the current one, the same way the original backend
//! page could reload and reconnect.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ChannelEndpoint;

const LANDING_PAGE: &str = r#"<!doctype html>
<html>
  <head><title>wsfs</title></head>
  <body>
    <h1>wsfs</h1>
    <p>This mount is waiting for a backend peer. Connect a WebSocket to
    <code>/ws</code> and answer filesystem commands.</p>
  </body>
</html>
"#;

/// Accept peers on `listener` and pump the active one through `endpoint`.
///
/// Runs until the listener fails or the channel half is dropped.
pub async fn serve(listener: TcpListener, endpoint: ChannelEndpoint) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening for backend peer");
    }

    let (socket_tx, socket_rx) = mpsc::channel::<WebSocket>(1);
    tokio::spawn(pump(endpoint, socket_rx));

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_upgrade))
        .with_state(socket_tx);

    axum::serve(listener, app).await
}

async fn index() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

async fn ws_upgrade(
    State(sockets): State<mpsc::Sender<WebSocket>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| async move {
        if sockets.send(socket).await.is_err() {
            debug!("socket pump is gone; dropping new peer connection");
        }
    })
}

/// How one peer connection ended.
enum SocketEnd {
    /// The peer disconnected or errored.
    Disconnected,
    /// A new peer connected and takes over.
    Replaced(WebSocket),
    /// The channel half was dropped; shut the pump down.
    ChannelDropped,
}

/// Owns the endpoint; attaches each active socket and moves frames both ways.
async fn pump(mut endpoint: ChannelEndpoint, mut sockets: mpsc::Receiver<WebSocket>) {
    let mut takeover: Option<WebSocket> = None;
    loop {
        let mut socket = match takeover.take() {
            Some(socket) => socket,
            None => match sockets.recv().await {
                Some(socket) => socket,
                None => return,
            },
        };

        info!("backend peer connected");
        endpoint.attach();
        let end = serve_socket(&mut endpoint, &mut sockets, &mut socket).await;
        endpoint.detach();

        match end {
            SocketEnd::Disconnected => info!("backend peer disconnected"),
            SocketEnd::Replaced(next) => {
                info!("backend peer replaced by a new connection");
                takeover = Some(next);
            }
            SocketEnd::ChannelDropped => return,
        }
    }
}

async fn serve_socket(
    endpoint: &mut ChannelEndpoint,
    sockets: &mut mpsc::Receiver<WebSocket>,
    socket: &mut WebSocket,
) -> SocketEnd {
    loop {
        tokio::select! {
            outbound = endpoint.next_outbound() => match outbound {
                Some(text) => {
                    if let Err(e) = socket.send(Message::Text(text)).await {
                        warn!(error = %e, "send to peer failed");
                        return SocketEnd::Disconnected;
                    }
                }
                None => return SocketEnd::ChannelDropped,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if !endpoint.push_inbound(text) {
                        return SocketEnd::ChannelDropped;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if !endpoint.push_inbound(text) {
                            return SocketEnd::ChannelDropped;
                        }
                    }
                    Err(_) => warn!("dropping non-UTF-8 binary frame from peer"),
                },
                Some(Ok(Message::Close(_))) | None => return SocketEnd::Disconnected,
                Some(Ok(_)) => {} // ping/pong
                Some(Err(e)) => {
                    warn!(error = %e, "receive from peer failed");
                    return SocketEnd::Disconnected;
                }
            },
            replacement = sockets.recv() => match replacement {
                Some(next) => return SocketEnd::Replaced(next),
                None => return SocketEnd::Disconnected,
            },
        }
    }
}
