use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use napoli_core::push::{EventKind, PushEvent};
use napoli_sync::config::parse_backend_url;
use napoli_sync::{ReconnectPolicy, SyncConfig, SyncService};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Backend {
    clients: Arc<Mutex<Vec<String>>>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(backend): State<Backend>,
) -> impl IntoResponse {
    backend.clients.lock().expect("clients").push(client_id);
    ws.on_upgrade(serve_burst)
}

// One burst per connection: good frame, garbage, good frame, then close.
async fn serve_burst(mut socket: WebSocket) {
    let frames = [
        r#"{"type":"STATS_UPDATE","data":{"active_users":12,"leads":3,"response_time":"1.1s"}}"#,
        "this is not json",
        r#"{"data":{"missing":"type"}}"#,
        r#"{"type":"LEAD_UPDATE","data":{"id":7,"userName":"Giulia","potential":"high"}}"#,
    ];
    for frame in frames {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn spawn_backend() -> (SocketAddr, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/ws/:client_id", get(ws_handler))
        .with_state(backend.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, backend)
}

fn config_for(addr: SocketAddr) -> SyncConfig {
    let mut config =
        SyncConfig::new(parse_backend_url(&format!("http://{addr}")).expect("backend url"));
    config.reconnect = ReconnectPolicy::Fixed(Duration::from_millis(100));
    config
}

async fn wait_for(events: &Arc<Mutex<Vec<PushEvent>>>, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while events.lock().expect("events").len() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} events"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_frames_are_dropped_and_channel_reconnects() {
    let (addr, backend) = spawn_backend().await;
    let service = SyncService::new(config_for(addr)).expect("service");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _subscription = service
        .bus()
        .subscribe(move |event| sink.lock().expect("sink").push(event.clone()));

    assert!(service.connect());
    assert!(!service.connect());
    wait_for(&events, 4).await;
    service.shutdown();

    let kinds: Vec<EventKind> = events
        .lock()
        .expect("events")
        .iter()
        .take(4)
        .map(|event| event.kind.clone())
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::StatsUpdate,
            EventKind::LeadUpdate,
            EventKind::StatsUpdate,
            EventKind::LeadUpdate,
        ]
    );

    let lead = events
        .lock()
        .expect("events")
        .iter()
        .find(|event| event.kind == EventKind::LeadUpdate)
        .cloned()
        .expect("lead");
    assert!(lead.is_correlated_to("7"));

    let clients = backend.clients.lock().expect("clients").clone();
    assert!(clients.len() >= 2, "expected a reconnect, saw {clients:?}");
    assert!(clients.iter().all(|client| client == "admin_dash"));

    let stats = service.connection().stats();
    assert!(stats.opened >= 2);
    assert!(stats.dropped_frames >= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_client_id_reaches_the_endpoint_path() {
    let (addr, backend) = spawn_backend().await;
    let service = SyncService::new(config_for(addr)).expect("service");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _subscription = service
        .bus()
        .subscribe(move |event| sink.lock().expect("sink").push(event.clone()));

    assert!(service.connect_as("kitchen_screen"));
    wait_for(&events, 2).await;
    service.shutdown();

    let clients = backend.clients.lock().expect("clients").clone();
    assert_eq!(clients.first().map(String::as_str), Some("kitchen_screen"));
}
