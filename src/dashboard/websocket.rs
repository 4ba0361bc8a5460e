//! WebSocket handler for live updates

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;

use super::protocol::{ClientMessage, ServerMessage, topics_to_tables};
use super::server::AppState;
use crate::feed::Subscription;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle one dashboard connection.
///
/// Table subscriptions live only as long as the socket; they are released
/// on every exit path.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Forward queued messages to the client
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(Message::Text(msg.to_json())).await.is_err() {
                break;
            }
        }
    });

    // Push the current snapshot, then every change to it
    let mut live = state.live.clone();
    let stats_tx = out_tx.clone();
    let stats_task = tokio::spawn(async move {
        let initial = live.borrow_and_update().clone();
        if stats_tx.send(ServerMessage::Stats { stats: initial }).is_err() {
            return;
        }
        while live.changed().await.is_ok() {
            let stats = live.borrow_and_update().clone();
            if stats_tx.send(ServerMessage::Stats { stats }).is_err() {
                break;
            }
        }
    });

    let mut subscriptions: Vec<Subscription> = Vec::new();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                handle_client_message(&text, &state, &out_tx, &mut subscriptions);
            }
            _ = &mut send_task => break,
        }
    }

    for subscription in subscriptions.drain(..) {
        subscription.unsubscribe();
    }
    stats_task.abort();
    send_task.abort();
    tracing::debug!(
        active = state.feed.active_subscriptions(),
        "dashboard socket closed"
    );
}

fn handle_client_message(
    text: &str,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
    subscriptions: &mut Vec<Subscription>,
) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
        Ok(ClientMessage::Subscribe { topics }) => match topics_to_tables(&topics) {
            Ok(tables) => {
                for old in subscriptions.drain(..) {
                    old.unsubscribe();
                }
                for table in tables {
                    let tx = out_tx.clone();
                    subscriptions.push(state.feed.subscribe(table, move |event| {
                        let _ = tx.send(ServerMessage::from(event));
                    }));
                }
                tracing::debug!(count = subscriptions.len(), "socket subscribed");
                None
            }
            Err(message) => Some(ServerMessage::error(message)),
        },
        Err(e) => Some(ServerMessage::error(format!("Invalid message: {}", e))),
    };

    if let Some(reply) = reply {
        let _ = out_tx.send(reply);
    }
}
