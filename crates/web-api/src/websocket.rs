use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use parlay_core::Viewer;
use parlay_live::Subscription;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let viewer = state.identity.resolve(&headers);
    let id = state.next_connection_id();
    ws.on_upgrade(move |socket| websocket_connection(socket, state, id, viewer))
}

async fn websocket_connection(mut socket: WebSocket, state: AppState, id: String, viewer: Viewer) {
    let mut subscription: Subscription = state.broadcaster.subscribe(id.clone(), viewer);
    tracing::info!(connection = %id, viewers = state.broadcaster.viewer_count(), "viewer connected");

    loop {
        tokio::select! {
            payload = subscription.recv() => {
                let Some(payload) = payload else {
                    // Replaced or evicted by the broadcaster.
                    break;
                };
                if socket.send(Message::Text(payload.to_json())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    drop(subscription);
    tracing::info!(connection = %id, "WebSocket connection closed");
}
