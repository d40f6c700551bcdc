use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cqbridge_config::{Bot, Config};
use cqbridge_contracts::{ActionResponse, QuickReply};
use cqbridge_kernel::{
    ActionRegistry, Dispatcher, Engine, Lookup, MediaStore, MemoryMessageLog, MessageLog, Origin,
    SegmentCodec, Transport,
};
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub mod engine;
pub mod store;
mod ws;

pub use engine::HttpEngine;
pub use store::SqliteMessageLog;
pub use ws::run_client as run_ws_client;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub async fn serve(cfg: Config) -> Result<(), String> {
    let engine_cfg = cfg.engine.clone();
    let engine = tokio::task::spawn_blocking(move || {
        HttpEngine::new(&engine_cfg.endpoint, engine_cfg.timeout_ms)
    })
    .await
    .map_err(|e| format!("engine client setup failed: {e}"))??;
    let bridge = Bridge::new(&cfg, Arc::new(engine))?;

    let mut tasks = JoinSet::new();
    if let Some(addr) = &cfg.engine.event_listen_addr {
        let addr = parse_addr(addr, "engine.event_listen_addr")?;
        tasks.spawn(serve_router(addr, build_event_app(bridge.clone())));
    }
    for bot in &cfg.bots {
        if let Some(http) = &bot.http {
            let addr = parse_addr(&http.listen_addr, "http.listen_addr")?;
            let app = build_http_app(bridge.clone(), bot.bot_id, http.access_token.clone());
            tasks.spawn(serve_router(addr, app));
        }
        if let Some(ws_server) = &bot.ws_server {
            let addr = parse_addr(&ws_server.listen_addr, "ws_server.listen_addr")?;
            let app = build_ws_app(bridge.clone(), bot.bot_id, ws_server.access_token.clone());
            tasks.spawn(serve_router(addr, app));
        }
        for client in &bot.ws_clients {
            tasks.spawn(ws::run_client(bridge.clone(), bot.bot_id, client.clone()));
        }
    }
    info!(bots = cfg.bots.len(), "cqbridge started");

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(err) => return Err(format!("listener task failed: {err}")),
        }
    }
    Ok(())
}

fn parse_addr(value: &str, field: &str) -> Result<SocketAddr, String> {
    value
        .parse()
        .map_err(|e| format!("invalid {field} {value}: {e}"))
}

async fn serve_router(addr: SocketAddr, app: Router) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind {addr} failed: {e}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve {addr} failed: {e}"))
}

/// Shared runtime state: the dispatcher plus each bot's event fan-out.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    dispatcher: Arc<Dispatcher>,
    bots: HashMap<i64, BotChannel>,
    http: Client,
}

struct BotChannel {
    events: broadcast::Sender<Value>,
    post_urls: Vec<String>,
    post_timeout: Duration,
    array_format: bool,
}

impl BotChannel {
    fn new(bot: &Bot) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (post_urls, post_timeout_ms) = bot
            .http
            .as_ref()
            .map(|http| (http.post_urls.clone(), http.post_timeout_ms))
            .unwrap_or_default();
        Self {
            events,
            post_urls,
            post_timeout: Duration::from_millis(post_timeout_ms.max(1)),
            array_format: bot.post_message_format == "array",
        }
    }
}

impl Bridge {
    pub fn new(cfg: &Config, engine: Arc<dyn Engine>) -> Result<Self, String> {
        let history: Arc<dyn MessageLog> = if cfg.store.kind == "sqlite" {
            let sqlite_path = cfg
                .store
                .sqlite_path
                .as_deref()
                .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
            Arc::new(SqliteMessageLog::open(sqlite_path)?)
        } else {
            Arc::new(MemoryMessageLog::with_max_entries(cfg.store.max_entries))
        };
        let lookup = Lookup::parse(&cfg.dispatch.lookup)
            .ok_or_else(|| format!("unsupported dispatch.lookup {}", cfg.dispatch.lookup))?;
        let codec = SegmentCodec::new().map_err(|e| format!("tag grammar failed: {e}"))?;
        let media = MediaStore::new(
            &cfg.media.image_dir,
            &cfg.media.record_dir,
            &cfg.media.video_dir,
        );
        let registry = Arc::new(ActionRegistry::build());
        debug!(actions = registry.len(), ?lookup, "action registry built");
        let dispatcher = Dispatcher::new(registry, lookup, engine, history, media, codec);

        let http = Client::builder()
            .build()
            .map_err(|e| format!("event poster setup failed: {e}"))?;
        Ok(Self {
            inner: Arc::new(BridgeInner {
                dispatcher: Arc::new(dispatcher),
                bots: cfg
                    .bots
                    .iter()
                    .map(|bot| (bot.bot_id, BotChannel::new(bot)))
                    .collect(),
                http,
            }),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn subscribe(&self, bot_id: i64) -> Option<broadcast::Receiver<Value>> {
        self.inner.bots.get(&bot_id).map(|bot| bot.events.subscribe())
    }

    /// Runs one request frame off the async runtime.
    pub async fn dispatch_frame(
        &self,
        bot_id: i64,
        transport: Transport,
        peer: String,
        raw: Vec<u8>,
    ) -> String {
        let dispatcher = self.inner.dispatcher.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let origin = Origin {
                bot_id,
                transport,
                peer: &peer,
            };
            dispatcher.dispatch(&raw, &origin)
        })
        .await;
        match joined {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                error!(bot_id, transport = transport.as_str(), error = %err, "dispatch task failed");
                envelope_text(&ActionResponse::failure("internal error"))
            }
        }
    }

    pub async fn dispatch_action(
        &self,
        bot_id: i64,
        transport: Transport,
        peer: String,
        action: String,
        params: Value,
        echo: Option<Value>,
    ) -> ActionResponse {
        let dispatcher = self.inner.dispatcher.clone();
        let fallback_echo = echo.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let origin = Origin {
                bot_id,
                transport,
                peer: &peer,
            };
            dispatcher.dispatch_action(&action, params, echo, &origin)
        })
        .await;
        joined.unwrap_or_else(|err| {
            error!(bot_id, transport = transport.as_str(), error = %err, "dispatch task failed");
            ActionResponse::failure("internal error").with_echo(fallback_echo)
        })
    }

    /// Publishes an engine event to every WebSocket session of the bot and
    /// posts it to the bot's HTTP receivers. A receiver may answer with a
    /// quick reply, which is sent before this returns.
    pub async fn publish_event(&self, bot_id: i64, event: Value) -> Result<(), String> {
        let bot = self
            .inner
            .bots
            .get(&bot_id)
            .ok_or_else(|| format!("unknown bot {bot_id}"))?;
        let event = normalize_event(self.inner.dispatcher.codec(), event, bot.array_format);

        let sessions = bot.events.send(event.clone()).unwrap_or(0);
        debug!(bot_id, sessions, posts = bot.post_urls.len(), "event published");

        let posts = bot
            .post_urls
            .iter()
            .map(|url| self.post_event(bot_id, url, bot.post_timeout, &event));
        join_all(posts).await;
        Ok(())
    }

    async fn post_event(&self, bot_id: i64, url: &str, timeout: Duration, event: &Value) {
        let response = self
            .inner
            .http
            .post(url)
            .header("x-self-id", bot_id.to_string())
            .timeout(timeout)
            .json(event)
            .send()
            .await;
        let body = match response {
            Ok(response) if response.status().is_success() => response.bytes().await,
            Ok(response) => {
                warn!(bot_id, url, status = %response.status(), "event post rejected");
                return;
            }
            Err(err) => {
                warn!(bot_id, url, error = %err, "event post failed");
                return;
            }
        };
        let body = match body {
            Ok(body) if !body.is_empty() => body,
            Ok(_) => return,
            Err(err) => {
                warn!(bot_id, url, error = %err, "event post response unreadable");
                return;
            }
        };
        let reply: QuickReply = match serde_json::from_slice(&body) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(bot_id, url, error = %err, "event post response is not a quick reply");
                return;
            }
        };
        if reply.reply.is_none() {
            return;
        }

        let dispatcher = self.inner.dispatcher.clone();
        let event = event.clone();
        let peer = url.to_string();
        let joined = tokio::task::spawn_blocking(move || {
            let origin = Origin {
                bot_id,
                transport: Transport::QuickReply,
                peer: &peer,
            };
            dispatcher.send_quick_reply(&event, reply, &origin)
        })
        .await;
        if let Err(err) = joined {
            error!(bot_id, url, error = %err, "quick reply task failed");
        }
    }
}

/// Rewrites a string `message` from engine tags to `[CQ:...]` form, or to a
/// segment array for bots configured with the array format.
fn normalize_event(codec: &SegmentCodec, mut event: Value, array_format: bool) -> Value {
    let Some(Value::String(message)) = event.get("message") else {
        return event;
    };
    let standard = codec.engine_to_standard(message);
    let converted = if array_format {
        serde_json::to_value(codec.parse_text(&standard))
            .unwrap_or_else(|_| Value::String(standard.clone()))
    } else {
        Value::String(standard.clone())
    };
    event["message"] = converted;
    if event.get("raw_message").is_some_and(Value::is_string) {
        event["raw_message"] = Value::String(standard);
    }
    event
}

fn envelope_text(response: &ActionResponse) -> String {
    serde_json::to_string(response).unwrap_or_default()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("Token "))
        .map(str::trim)
}

/// `None` or an empty configured token disables the check.
fn authorized(expected: Option<&str>, headers: &HeaderMap, query: &HashMap<String, String>) -> bool {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return true;
    };
    bearer_token(headers) == Some(expected)
        || query.get("access_token").map(String::as_str) == Some(expected)
}

#[derive(Clone)]
struct EndpointState {
    bridge: Bridge,
    bot_id: i64,
    access_token: Option<String>,
}

/// HTTP API for one bot: `GET|POST /{action}`.
pub fn build_http_app(bridge: Bridge, bot_id: i64, access_token: Option<String>) -> Router {
    Router::new()
        .route("/{action}", get(http_action).post(http_action))
        .with_state(EndpointState {
            bridge,
            bot_id,
            access_token,
        })
}

async fn http_action(
    State(state): State<EndpointState>,
    Path(action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(state.access_token.as_deref(), &headers, &query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut params: Map<String, Value> = query
        .into_iter()
        .filter(|(key, _)| key != "access_token")
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let mut echo = None;
    if !body.iter().all(u8::is_ascii_whitespace) {
        let mut object = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(object)) => object,
            _ => return Json(ActionResponse::failure("invalid request")).into_response(),
        };
        echo = object.remove("echo");
        let overlay = match object.remove("params") {
            Some(Value::Object(inner)) => inner,
            _ => object,
        };
        params.extend(overlay);
    }

    let response = state
        .bridge
        .dispatch_action(
            state.bot_id,
            Transport::Http,
            "http".to_string(),
            action.trim_start_matches('/').to_string(),
            Value::Object(params),
            echo,
        )
        .await;
    Json(response).into_response()
}

/// WebSocket endpoint for one bot, served at `/`.
pub fn build_ws_app(bridge: Bridge, bot_id: i64, access_token: Option<String>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .with_state(EndpointState {
            bridge,
            bot_id,
            access_token,
        })
}

async fn ws_upgrade(
    State(state): State<EndpointState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !authorized(state.access_token.as_deref(), &headers, &query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let peer = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("ws")
        .to_string();
    ws.on_upgrade(move |socket| ws::serve_session(socket, state.bridge, state.bot_id, peer))
}

#[derive(Debug, Deserialize)]
struct EventInput {
    bot_id: i64,
    event: Value,
}

/// Ingress the host posts events to: `POST /events`.
pub fn build_event_app(bridge: Bridge) -> Router {
    Router::new()
        .route("/events", post(event_ingress))
        .with_state(bridge)
}

async fn event_ingress(State(bridge): State<Bridge>, Json(input): Json<EventInput>) -> StatusCode {
    match bridge.publish_event(input.bot_id, input.event).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => {
            warn!(bot_id = input.bot_id, error = %err, "event rejected");
            StatusCode::NOT_FOUND
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn codec() -> SegmentCodec {
        SegmentCodec::new().unwrap()
    }

    #[test]
    fn string_events_get_standard_tags() {
        let event = json!({"post_type": "message", "message": "[@1] hi [Face2.gif]", "raw_message": "x"});
        let out = normalize_event(&codec(), event, false);
        assert_eq!(out["message"], json!("[CQ:at,qq=1] hi [CQ:face,id=2]"));
        assert_eq!(out["raw_message"], out["message"]);
    }

    #[test]
    fn array_format_events_get_segments() {
        let event = json!({"message": "[@1]hi"});
        let out = normalize_event(&codec(), event, true);
        assert_eq!(
            out["message"],
            json!([
                {"type": "at", "data": {"qq": "1"}},
                {"type": "text", "data": {"text": "hi"}}
            ])
        );
    }

    #[test]
    fn events_without_message_are_untouched() {
        let event = json!({"post_type": "notice", "notice_type": "group_increase"});
        assert_eq!(normalize_event(&codec(), event.clone(), true), event);
    }

    #[test]
    fn token_accepted_from_header_or_query() {
        let mut headers = HeaderMap::new();
        let mut query = HashMap::new();
        assert!(authorized(None, &headers, &query));
        assert!(authorized(Some(""), &headers, &query));
        assert!(!authorized(Some("s3"), &headers, &query));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3"));
        assert!(authorized(Some("s3"), &headers, &query));

        headers.clear();
        query.insert("access_token".to_string(), "s3".to_string());
        assert!(authorized(Some("s3"), &headers, &query));
        assert!(!authorized(Some("other"), &headers, &query));
    }
}
