use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use cqbridge_config::{Bot, Config, Dispatch, Engine, Http, Log, Media, Store, WsClient, WsServer};
use cqbridge_kernel::testing::RecordingEngine;
use cqbridge_server::{build_event_app, build_http_app, build_ws_app, run_ws_client, Bridge};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::Message;
use tower::util::ServiceExt;

const BOT: i64 = 10001;

fn nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos()
}

fn test_config() -> Config {
    let root = std::env::temp_dir().join(format!("cqbridge-api-{}", nanos()));
    let dir = |name: &str| root.join(name).to_string_lossy().to_string();
    Config {
        engine: Engine {
            endpoint: "http://127.0.0.1:9/engine".to_string(),
            timeout_ms: 1_000,
            event_listen_addr: None,
        },
        media: Media {
            image_dir: dir("image"),
            record_dir: dir("record"),
            video_dir: dir("video"),
        },
        store: Store {
            kind: "memory".to_string(),
            sqlite_path: None,
            max_entries: 100,
        },
        dispatch: Dispatch {
            lookup: "sorted".to_string(),
        },
        log: Log {
            filter: "info".to_string(),
        },
        bots: vec![Bot {
            bot_id: BOT,
            post_message_format: "string".to_string(),
            http: Some(Http {
                listen_addr: "127.0.0.1:0".to_string(),
                access_token: None,
                post_urls: vec![],
                post_timeout_ms: 2_000,
            }),
            ws_server: Some(WsServer {
                listen_addr: "127.0.0.1:0".to_string(),
                access_token: None,
            }),
            ws_clients: vec![],
        }],
    }
}

fn online_engine() -> Arc<RecordingEngine> {
    Arc::new(RecordingEngine {
        online: true,
        ..RecordingEngine::default()
    })
}

fn http_app(cfg: &Config, engine: Arc<RecordingEngine>, token: Option<&str>) -> Router {
    let bridge = Bridge::new(cfg, engine).unwrap();
    build_http_app(bridge, BOT, token.map(str::to_string))
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, payload)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn serve_local(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn get_status_reports_online() {
    let (status, payload) = call(
        http_app(&test_config(), online_engine(), None),
        get("/get_status"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        payload,
        json!({"status": "ok", "retcode": 0, "data": {"online": true, "good": true}, "echo": null})
    );
}

#[tokio::test]
async fn unknown_action_is_still_http_200() {
    let (status, payload) = call(
        http_app(&test_config(), online_engine(), None),
        post_json("/foo_bar", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("failed"));
    assert_eq!(payload["retcode"], json!(100));
    assert_eq!(payload["data"], json!({"data": "no such api"}));
}

#[tokio::test]
async fn async_suffix_in_path_sends_message() {
    let engine = online_engine();
    let (_, payload) = call(
        http_app(&test_config(), engine.clone(), None),
        post_json(
            "/send_group_msg_async",
            json!({"group_id": 7, "message": "[CQ:at,qq=3]hello"}),
        ),
    )
    .await;
    assert_eq!(payload["status"], json!("ok"));
    assert_eq!(payload["data"], json!({"message_id": 1}));
    assert_eq!(engine.calls(), ["send_msg 10001 group 7 0 [@3]hello"]);
}

#[tokio::test]
async fn wrapped_params_keep_echo() {
    let engine = online_engine();
    let (_, payload) = call(
        http_app(&test_config(), engine.clone(), None),
        post_json(
            "/send_like",
            json!({"params": {"user_id": 42}, "echo": {"seq": 9}}),
        ),
    )
    .await;
    assert_eq!(payload["status"], json!("ok"));
    assert_eq!(payload["echo"], json!({"seq": 9}));
    assert_eq!(engine.calls(), ["up_vote 10001 42"]);
}

#[tokio::test]
async fn query_params_are_merged_under_body() {
    let engine = online_engine();
    let (_, payload) = call(
        http_app(&test_config(), engine.clone(), None),
        post_json("/set_group_ban?group_id=1&user_id=2", json!({"duration": 60})),
    )
    .await;
    assert_eq!(payload["status"], json!("ok"));

    let (_, payload) = call(
        http_app(&test_config(), engine.clone(), None),
        get("/set_group_kick?group_id=1&user_id=0"),
    )
    .await;
    assert_eq!(payload["data"], json!({"data": "invalid 'user_id'"}));
    assert_eq!(engine.calls(), ["mute 10001 1 2 60"]);
}

#[tokio::test]
async fn malformed_body_is_an_invalid_request() {
    let (status, payload) = call(
        http_app(&test_config(), online_engine(), None),
        Request::builder()
            .method("POST")
            .uri("/get_status")
            .body(Body::from("[1,2"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["data"], json!({"data": "invalid request"}));
}

#[tokio::test]
async fn access_token_is_enforced() {
    let cfg = test_config();
    let (status, _) = call(
        http_app(&cfg, online_engine(), Some("s3cret")),
        get("/get_status"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/get_status")
        .header("authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, payload) = call(http_app(&cfg, online_engine(), Some("s3cret")), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("ok"));

    let (status, _) = call(
        http_app(&cfg, online_engine(), Some("s3cret")),
        get("/get_status?access_token=s3cret"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn sqlite_log_backs_get_msg_and_delete_msg() {
    let mut cfg = test_config();
    cfg.store.kind = "sqlite".to_string();
    cfg.store.sqlite_path = Some(
        std::env::temp_dir()
            .join(format!("cqbridge-api-{}.db", nanos()))
            .to_string_lossy()
            .to_string(),
    );
    let engine = online_engine();
    let bridge = Bridge::new(&cfg, engine.clone()).unwrap();
    let app = build_http_app(bridge, BOT, None);

    let (_, sent) = call(
        app.clone(),
        post_json("/send_private_msg", json!({"user_id": 5, "message": "[CQ:at,qq=6] yo"})),
    )
    .await;
    let id = sent["data"]["message_id"].as_i64().unwrap();
    assert!(id > 0);

    let (_, fetched) = call(app.clone(), get(&format!("/get_msg?message_id={id}"))).await;
    assert_eq!(fetched["data"]["message"], json!("[CQ:at,qq=6] yo"));
    assert_eq!(fetched["data"]["message_type"], json!("private"));

    let (_, deleted) = call(app.clone(), post_json("/delete_msg", json!({"message_id": id}))).await;
    assert_eq!(deleted["status"], json!("ok"));
    assert_eq!(engine.calls()[1], "withdraw_msg 10001 ref-1");

    let (_, missing) = call(app, post_json("/get_msg", json!({"message_id": id + 1}))).await;
    assert_eq!(missing["status"], json!("failed"));
}

#[tokio::test]
async fn quick_reply_from_event_receiver_is_sent() {
    let receiver = Router::new().route(
        "/onebot",
        post(|Json(event): Json<Value>| async move {
            assert_eq!(event["message"], json!("[CQ:at,qq=1]ping"));
            Json(json!({"reply": "pong", "at_sender": true}))
        }),
    );
    let addr = serve_local(receiver).await;

    let mut cfg = test_config();
    if let Some(http) = cfg.bots[0].http.as_mut() {
        http.post_urls = vec![format!("http://{addr}/onebot")];
    }
    let engine = online_engine();
    let bridge = Bridge::new(&cfg, engine.clone()).unwrap();
    bridge
        .publish_event(
            BOT,
            json!({
                "post_type": "message",
                "message_type": "group",
                "group_id": 55,
                "user_id": 7,
                "message": "[@1]ping"
            }),
        )
        .await
        .unwrap();
    assert_eq!(engine.calls(), ["send_msg 10001 group 55 0 [@7]pong"]);
}

#[tokio::test]
async fn event_ingress_publishes_to_subscribers() {
    let bridge = Bridge::new(&test_config(), online_engine()).unwrap();
    let mut events = bridge.subscribe(BOT).unwrap();
    let app = build_event_app(bridge);

    let (status, _) = call(
        app.clone(),
        post_json("/events", json!({"bot_id": BOT, "event": {"message": "[Face5.gif]"}})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(
        events.recv().await.unwrap(),
        json!({"message": "[CQ:face,id=5]"})
    );

    let (status, _) = call(
        app,
        post_json("/events", json!({"bot_id": 1, "event": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ws_server_answers_frames_and_pushes_events() {
    let bridge = Bridge::new(&test_config(), online_engine()).unwrap();
    let addr = serve_local(build_ws_app(bridge.clone(), BOT, None)).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            json!({"action": "get_status", "echo": "e1"}).to_string().into(),
        ))
        .await
        .unwrap();
    let reply = read_json(&mut socket).await;
    assert_eq!(reply["data"], json!({"online": true, "good": true}));
    assert_eq!(reply["echo"], json!("e1"));

    socket
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    let reply = read_json(&mut socket).await;
    assert_eq!(reply["data"], json!({"data": "invalid request"}));

    bridge
        .publish_event(BOT, json!({"post_type": "notice", "notice_type": "poke"}))
        .await
        .unwrap();
    let event = read_json(&mut socket).await;
    assert_eq!(event["notice_type"], json!("poke"));
}

#[tokio::test]
async fn ws_server_rejects_bad_token() {
    let bridge = Bridge::new(&test_config(), online_engine()).unwrap();
    let addr = serve_local(build_ws_app(bridge, BOT, Some("tok".to_string()))).await;

    assert!(tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .is_err());
    assert!(
        tokio_tungstenite::connect_async(format!("ws://{addr}/?access_token=tok"))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn ws_client_dials_out_and_reconnects() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bridge = Bridge::new(&test_config(), online_engine()).unwrap();
    let client = tokio::spawn(run_ws_client(
        bridge,
        BOT,
        WsClient {
            url: format!("ws://{addr}/onebot"),
            access_token: Some("tok".to_string()),
            reconnect_interval_ms: 50,
        },
    ));

    for round in 0..2 {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client connects")
            .unwrap();
        let mut headers = HeaderMap::new();
        let mut socket = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &HandshakeRequest,
             response: HandshakeResponse|
             -> Result<HandshakeResponse, ErrorResponse> {
                headers = request.headers().clone();
                Ok(response)
            },
        )
        .await
        .unwrap();
        assert_eq!(headers["x-self-id"], "10001");
        assert_eq!(headers["x-client-role"], "Universal");
        assert_eq!(headers["authorization"], "Bearer tok");

        socket
            .send(Message::Text(
                json!({"action": "get_status", "echo": round}).to_string().into(),
            ))
            .await
            .unwrap();
        let reply = read_json(&mut socket).await;
        assert_eq!(reply["status"], json!("ok"));
        assert_eq!(reply["data"], json!({"online": true, "good": true}));
        assert_eq!(reply["echo"], json!(round));

        socket.close(None).await.unwrap();
    }
    client.abort();
}

async fn read_json<S>(socket: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("frame within timeout");
    serde_json::from_str(&next).unwrap()
}
