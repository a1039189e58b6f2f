//! Websocket and server-sent-events surface over the event bus and
//! broadcast hub.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use fleet_events::WebhookEvent;

use crate::server::AppState;

const ROOMS: &[&str] = &["severity:critical", "severity:warning", "severity:info", "severity:all"];

#[derive(Deserialize)]
pub struct WsParams {
    room: Option<String>,
}

fn resolve_room(requested: Option<&str>) -> &'static str {
    match requested {
        Some(r) if ROOMS.contains(&r) => ROOMS.iter().find(|room| **room == r).copied().unwrap_or("severity:all"),
        _ => "severity:all",
    }
}

/// Upgrades to a websocket subscribed to one severity room (default
/// `severity:all`), per the `severity:<critical|warning|info|all>` rooms
/// convention the broadcast hub exposes.
pub async fn ws_handler(ws: WebSocketUpgrade, Query(params): Query<WsParams>, State(gateway): State<AppState>) -> impl IntoResponse {
    let room = resolve_room(params.room.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, room))
}

async fn handle_socket(mut socket: WebSocket, gateway: AppState, room: &'static str) {
    let mut rx = gateway.hub.subscribe(room);
    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Ok(payload) => {
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

/// Read-only SSE translation of every domain event, heartbeating every 30s
/// so idle connections survive intermediary timeouts.
pub async fn sse_handler(State(gateway): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = gateway.events.subscribe_broadcast();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let webhook_event: WebhookEvent = (&event).into();
                    let json = serde_json::to_string(&webhook_event).unwrap_or_default();
                    let sse_event = Event::default().event(webhook_event.event_type).data(json);
                    return Some((Ok(sse_event), rx));
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("heartbeat"))
}
