use crate::hub::Hub;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Inbound frames larger than this are ignored; clients only send pings.
const READ_LIMIT: usize = 512;
const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
pub struct WsQuery {
    user_id: Uuid,
}

/// Routes exposing the realtime channel:
/// `GET /projects/:id/ws?user_id=<uuid>`.
pub fn hub_routes(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/projects/:id/ws", get(ws_handler))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub, project_id, query.user_id))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, project_id: Uuid, user_id: Uuid) {
    let (subscriber_id, mut events) = hub.subscribe(project_id, user_id).await;
    info!(%subscriber_id, %project_id, %user_id, "realtime client connected");

    let (mut sender, mut receiver) = socket.split();

    // Writer: forward hub events, ping every 30 s, give up on a 10 s stall.
    let mut write_task = tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(KEEPALIVE);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(payload) = event else { break };
                    let send = sender.send(Message::Text(payload));
                    match tokio::time::timeout(WRITE_TIMEOUT, send).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = keepalive.tick() => {
                    let send = sender.send(Message::Ping(Vec::new()));
                    match tokio::time::timeout(WRITE_TIMEOUT, send).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
            }
        }
    });

    // Reader: 60 s deadline refreshed by any inbound frame (pongs included);
    // inbound `{"type":"ping"}` is answered through the subscriber queue.
    let read_hub = hub.clone();
    let mut read_task = tokio::spawn(async move {
        loop {
            let frame = match tokio::time::timeout(READ_DEADLINE, receiver.next()).await {
                Err(_) => {
                    debug!(%subscriber_id, "read deadline expired");
                    break;
                }
                Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => {
                    if text.len() > READ_LIMIT {
                        continue;
                    }
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                        if value["type"] == "ping" {
                            read_hub
                                .send_to(subscriber_id, r#"{"type":"pong"}"#.to_string())
                                .await;
                        }
                    }
                }
                Message::Close(_) => break,
                // Ping/pong frames only refresh the deadline.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.unsubscribe(subscriber_id).await;
    info!(%subscriber_id, "realtime client disconnected");
}
