//! End-to-end feed tests against a stub realtime backend.
//!
//! The stub speaks the backend's REST and realtime protocol on an
//! ephemeral local port: snapshot listing, login, and a websocket that
//! acks subscriptions and pushes create events from a broadcast
//! channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::sync::broadcast;

use demandfeed::config::BackendConfig;
use demandfeed::{ConnectionState, RealtimeFeed};

struct Backend {
    /// When `false`, the snapshot endpoint answers 500.
    snapshot_ok: AtomicBool,
    /// Raw demand payloads returned by the snapshot, most-recent-first.
    snapshot: Mutex<Vec<serde_json::Value>>,
    /// Create events pushed to every subscribed realtime client.
    events: broadcast::Sender<serde_json::Value>,
    /// Currently subscribed realtime clients.
    active_subscriptions: AtomicUsize,
    /// `access_token` query parameter of each realtime connection.
    connection_tokens: Mutex<Vec<Option<String>>>,
}

type Shared = Arc<Backend>;

impl Backend {
    fn new() -> Shared {
        Arc::new(Self {
            snapshot_ok: AtomicBool::new(true),
            snapshot: Mutex::new(Vec::new()),
            events: broadcast::channel(64).0,
            active_subscriptions: AtomicUsize::new(0),
            connection_tokens: Mutex::new(Vec::new()),
        })
    }

    fn emit(&self, demand: serde_json::Value) {
        let _ = self.events.send(demand);
    }
}

fn demand_json(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "platform": "Temu",
        "product_name": format!("product {id}"),
        "quantity": 10,
        "target_price": 2.5,
        "status": "inbound",
        "date_created": "2025-11-02T08:00:00.000Z"
    })
}

async fn snapshot_handler(State(backend): State<Shared>) -> Response {
    if !backend.snapshot_ok.load(Ordering::Acquire) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response();
    }
    let data = backend.snapshot.lock().unwrap().clone();
    axum::Json(serde_json::json!({ "data": data })).into_response()
}

async fn login_handler(
    axum::Json(body): axum::Json<serde_json::Value>,
) -> Response {
    if body["email"] == "agent@example.com" && body["password"] == "hunter2" {
        axum::Json(serde_json::json!({
            "data": { "access_token": "session-token", "expires": 900000 }
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "errors": [{ "message": "Invalid user credentials." }]
            })),
        )
            .into_response()
    }
}

async fn ws_handler(
    State(backend): State<Shared>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.as_deref().and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("access_token=").map(String::from))
    });
    backend.connection_tokens.lock().unwrap().push(token);
    ws.on_upgrade(move |socket| serve_realtime(socket, backend))
}

async fn serve_realtime(mut socket: WebSocket, backend: Shared) {
    let mut events = backend.events.subscribe();
    let mut subscribed = false;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                match value["type"].as_str() {
                    Some("subscribe") => {
                        subscribed = true;
                        backend.active_subscriptions.fetch_add(1, Ordering::AcqRel);
                        let ack = serde_json::json!({
                            "type": "subscription",
                            "event": "init"
                        });
                        if socket.send(Message::Text(ack.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some("unsubscribe") => {
                        if subscribed {
                            subscribed = false;
                            backend.active_subscriptions.fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                    _ => {}
                }
            }
            event = events.recv() => {
                let Ok(item) = event else { continue };
                if !subscribed {
                    continue;
                }
                let frame = serde_json::json!({
                    "type": "subscription",
                    "event": "create",
                    "data": [item]
                });
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }

    if subscribed {
        backend.active_subscriptions.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn spawn_backend(backend: Shared) -> SocketAddr {
    let app = Router::new()
        .route("/items/demands", get(snapshot_handler))
        .route("/auth/login", post(login_handler))
        .route("/websocket", get(ws_handler))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn backend_config(addr: SocketAddr) -> BackendConfig {
    BackendConfig {
        base_url: format!("http://{addr}"),
        websocket_url: format!("ws://{addr}/websocket"),
        static_token: None,
    }
}

/// Waits (bounded) until `pred` holds, driven by feed update notifications.
async fn wait_for(feed: &RealtimeFeed, pred: impl Fn() -> bool) {
    let mut updates = feed.updates();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pred() {
                return;
            }
            if updates.changed().await.is_err() {
                panic!("feed went away before the condition held");
            }
        }
    })
    .await
    .expect("condition not reached within timeout");
}

/// Polls (bounded) until `pred` holds, for conditions outside the feed.
async fn poll_until(pred: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

#[tokio::test]
async fn snapshot_and_live_events_merge_oldest_first() {
    let backend = Backend::new();
    // Most-recent-first, the way the item listing sorts.
    *backend.snapshot.lock().unwrap() = vec![
        demand_json("s3"),
        demand_json("s2"),
        demand_json("s1"),
    ];
    let addr = spawn_backend(Arc::clone(&backend)).await;

    let feed = RealtimeFeed::new(backend_config(addr));
    feed.connect().await;
    wait_for(&feed, || feed.state() == ConnectionState::Subscribed).await;

    backend.emit(demand_json("l1"));
    backend.emit(demand_json("l2"));
    wait_for(&feed, || feed.demands().len() == 5).await;

    let ids: Vec<String> = feed.demands().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, ["s1", "s2", "s3", "l1", "l2"]);
    assert!(feed.is_connected());
    assert!(feed.last_error().is_none());

    feed.shutdown().await;
}

#[tokio::test]
async fn failed_snapshot_still_reaches_subscribed_and_receives_events() {
    let backend = Backend::new();
    backend.snapshot_ok.store(false, Ordering::Release);
    let addr = spawn_backend(Arc::clone(&backend)).await;

    let feed = RealtimeFeed::new(backend_config(addr));
    feed.connect().await;
    wait_for(&feed, || feed.state() == ConnectionState::Subscribed).await;
    assert!(feed.demands().is_empty());

    backend.emit(demand_json("after-failure"));
    wait_for(&feed, || feed.demands().len() == 1).await;
    assert_eq!(feed.demands()[0].id, "after-failure");

    feed.shutdown().await;
}

#[tokio::test]
async fn authenticate_rebinds_connector_with_single_subscription() {
    let backend = Backend::new();
    *backend.snapshot.lock().unwrap() = vec![demand_json("seed")];
    let addr = spawn_backend(Arc::clone(&backend)).await;

    let feed = RealtimeFeed::new(backend_config(addr));
    feed.connect().await;
    wait_for(&feed, || feed.state() == ConnectionState::Subscribed).await;

    feed.authenticate("agent@example.com", "hunter2")
        .await
        .expect("login accepted");
    wait_for(&feed, || feed.state() == ConnectionState::Subscribed).await;

    // The second realtime connection carries the session token and the
    // stale subscription is gone.
    {
        let tokens = backend.connection_tokens.lock().unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].as_deref(), Some("session-token"));
    }
    poll_until(|| backend.active_subscriptions.load(Ordering::Acquire) == 1).await;

    // Exactly one buffer entry per emitted backend event afterwards.
    backend.emit(demand_json("once-only"));
    wait_for(&feed, || {
        feed.demands().iter().any(|d| d.id == "once-only")
    })
    .await;
    let count = feed
        .demands()
        .iter()
        .filter(|d| d.id == "once-only")
        .count();
    assert_eq!(count, 1);

    feed.shutdown().await;
}

#[tokio::test]
async fn rejected_login_keeps_session_and_reports_error() {
    let backend = Backend::new();
    let addr = spawn_backend(Arc::clone(&backend)).await;

    let feed = RealtimeFeed::new(backend_config(addr));
    feed.connect().await;
    wait_for(&feed, || feed.state() == ConnectionState::Subscribed).await;

    let err = feed
        .authenticate("agent@example.com", "wrong")
        .await
        .expect_err("login must be rejected");
    assert!(err.to_string().contains("authentication failed"));

    // The established connection is untouched and the error is visible.
    assert_eq!(feed.state(), ConnectionState::Subscribed);
    assert!(feed.last_error().is_some());
    assert_eq!(backend.connection_tokens.lock().unwrap().len(), 1);

    feed.shutdown().await;
}

#[tokio::test]
async fn anonymous_probe_reports_received_event() {
    let backend = Backend::new();
    let addr = spawn_backend(Arc::clone(&backend)).await;

    // Emit periodically so the throwaway probe sees traffic.
    let emitter = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                backend.emit(demand_json("probe"));
            }
        })
    };

    let feed = RealtimeFeed::new(backend_config(addr));
    assert!(feed.test_anonymous().await);
    emitter.abort();

    // The probe tears its connection down again.
    poll_until(|| backend.active_subscriptions.load(Ordering::Acquire) == 0).await;
}

#[tokio::test]
async fn shutdown_stops_the_session() {
    let backend = Backend::new();
    let addr = spawn_backend(Arc::clone(&backend)).await;

    let feed = RealtimeFeed::new(backend_config(addr));
    feed.connect().await;
    wait_for(&feed, || feed.state() == ConnectionState::Subscribed).await;

    feed.shutdown().await;
    assert_eq!(feed.state(), ConnectionState::Disconnected);
    assert!(!feed.is_connected());
    poll_until(|| backend.active_subscriptions.load(Ordering::Acquire) == 0).await;
}
