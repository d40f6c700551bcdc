//! WebSocket sessions: accepted (`ws_server`) and initiated (`ws_clients`).
//!
//! Both directions speak the same frame contract. Every text frame is one
//! request envelope answered with one response frame; events published for
//! the bot are written to the same socket as they arrive.

use std::time::Duration;

use axum::extract::ws::{Message as ServerMessage, WebSocket};
use cqbridge_config::WsClient;
use cqbridge_kernel::Transport;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as ClientMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Bridge;

pub(crate) async fn serve_session(socket: WebSocket, bridge: Bridge, bot_id: i64, peer: String) {
    let session = Uuid::new_v4();
    let Some(mut events) = bridge.subscribe(bot_id) else {
        warn!(bot_id, %session, "no event channel for bot, closing session");
        return;
    };
    info!(bot_id, %session, peer = %peer, "ws session opened");
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(ServerMessage::Text(text))) => {
                        let reply = bridge
                            .dispatch_frame(bot_id, Transport::WsServer, peer.clone(), text.as_str().as_bytes().to_vec())
                            .await;
                        if sink.send(ServerMessage::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(ServerMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(bot_id, %session, error = %err, "ws read failed");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if sink.send(ServerMessage::Text(event.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(bot_id, %session, skipped, "ws session lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    info!(bot_id, %session, "ws session closed");
}

/// Keeps one outbound connection alive, reconnecting after every drop.
pub async fn run_client(bridge: Bridge, bot_id: i64, cfg: WsClient) -> Result<(), String> {
    let interval = Duration::from_millis(cfg.reconnect_interval_ms.max(1));
    loop {
        match connect_once(&bridge, bot_id, &cfg).await {
            Ok(()) => info!(bot_id, url = %cfg.url, "ws client disconnected"),
            Err(err) => warn!(bot_id, url = %cfg.url, error = %err, "ws client connection failed"),
        }
        sleep(interval).await;
    }
}

async fn connect_once(bridge: &Bridge, bot_id: i64, cfg: &WsClient) -> Result<(), String> {
    let mut request = cfg
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    let headers = request.headers_mut();
    headers.insert(
        "x-self-id",
        HeaderValue::from_str(&bot_id.to_string()).map_err(|e| e.to_string())?,
    );
    headers.insert("x-client-role", HeaderValue::from_static("Universal"));
    if let Some(token) = cfg.access_token.as_deref().filter(|t| !t.is_empty()) {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| e.to_string())?,
        );
    }

    let (stream, _response) = connect_async(request).await.map_err(|e| e.to_string())?;
    let Some(mut events) = bridge.subscribe(bot_id) else {
        return Err(format!("no event channel for bot {bot_id}"));
    };
    let session = Uuid::new_v4();
    info!(bot_id, %session, url = %cfg.url, "ws client connected");
    let (mut sink, mut reader) = stream.split();

    loop {
        tokio::select! {
            frame = reader.next() => {
                match frame {
                    Some(Ok(ClientMessage::Text(text))) => {
                        let reply = bridge
                            .dispatch_frame(bot_id, Transport::WsClient, cfg.url.clone(), text.as_str().as_bytes().to_vec())
                            .await;
                        sink.send(ClientMessage::Text(reply.into()))
                            .await
                            .map_err(|e| e.to_string())?;
                    }
                    Some(Ok(ClientMessage::Ping(data))) => {
                        sink.send(ClientMessage::Pong(data)).await.map_err(|e| e.to_string())?;
                    }
                    Some(Ok(ClientMessage::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.to_string()),
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        sink.send(ClientMessage::Text(event.to_string().into()))
                            .await
                            .map_err(|e| e.to_string())?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(bot_id, %session, skipped, "ws client lagging, events dropped");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}
