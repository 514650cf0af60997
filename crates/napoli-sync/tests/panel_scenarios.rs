use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use napoli_core::push::{EventKind, PushEvent};
use napoli_core::{McpServerStatus, SessionStatus, DEFAULT_SESSION_NAME};
use napoli_sync::config::parse_backend_url;
use napoli_sync::panels::{InsightsPanel, LeadsPanel, McpPanel, WhatsAppPanel};
use napoli_sync::{OpState, PanelError, SyncConfig, SyncService};
use serde_json::{json, Value};
use std::collections::HashMap;

async fn spawn_backend() -> SyncService {
    let app = Router::new()
        .route(
            "/api/whatsapp/instances/:name/create",
            post(|Path(name): Path<String>| async move {
                Json(json!({"instance": {"instanceName": name}}))
            }),
        )
        .route(
            "/api/whatsapp/instances/:name/connect",
            post(|| async { Json(json!({"status": "processing"})) }),
        )
        .route(
            "/api/whatsapp/instances/:name/logout",
            post(|| async { StatusCode::BAD_GATEWAY }),
        )
        .route(
            "/api/mcp/servers",
            get(|| async {
                Json(json!([
                    {"id": 1, "name": "Alpha", "url": "http://alpha", "status": "offline"},
                    {"id": 2, "name": "Beta", "url": "http://beta", "status": "offline"},
                ]))
            }),
        )
        .route(
            "/api/mcp/servers/:id/test",
            post(|| async { Json(json!({"status": "processing"})) }),
        )
        .route(
            "/api/mcp/connect",
            post(|| async {
                Json(json!({"status": "processing", "message": "Request queued for background processing"}))
            }),
        )
        .route(
            "/api/analytics/drilldown",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                match params.get("scope").map(String::as_str) {
                    Some("overview") => Json(json!([
                        {"id": "vendas", "label": "Vendas Mensais", "value": "R$ 51.2k", "drillable": true},
                    ])),
                    _ => Json(json!([{"name": "Pico", "value": 100, "drillable": false}])),
                }
            }),
        )
        .route(
            "/api/crm/leads",
            get(|| async { Json(json!([{"id": 3, "userName": "Marco", "potential": "low"}])) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let config = SyncConfig::new(parse_backend_url(&format!("http://{addr}")).expect("url"));
    SyncService::new(config).expect("service")
}

fn wpp(kind: EventKind, session: &str, data: Value) -> PushEvent {
    PushEvent::new(kind, data).with_session(session)
}

#[tokio::test]
async fn whatsapp_pairing_end_to_end() {
    let service = spawn_backend().await;
    let panel = WhatsAppPanel::mount(&service);
    panel.add_session("S1").expect("add");

    let op = panel.start_gateway("S1").await.expect("start");
    assert_eq!(op, OpState::Queued);
    assert_eq!(
        panel.session("S1").expect("session").value.status,
        SessionStatus::Starting
    );

    service.bus().publish(&wpp(
        EventKind::WppQrCode,
        "S1",
        json!({"qr": "data:image/png;base64,QR1", "message": "Scan QR Code"}),
    ));
    let session = panel.session("S1").expect("session").value;
    assert_eq!(session.status, SessionStatus::QrReady);
    assert_eq!(session.qr_code.as_deref(), Some("data:image/png;base64,QR1"));
    assert_eq!(panel.connect_state("S1"), OpState::Success);

    service.bus().publish(&wpp(
        EventKind::WppStatusChange,
        "S1",
        json!({"status": "connected", "message": "Connected!"}),
    ));
    let record = panel.session("S1").expect("session");
    assert_eq!(record.value.status, SessionStatus::Connected);
    assert_eq!(record.value.qr_code, None);
    assert_eq!(record.logs.latest().expect("log").message, "Connected!");

    let untouched = panel.session(DEFAULT_SESSION_NAME).expect("default");
    assert_eq!(untouched.value.status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn removing_sessions_ignores_logout_failure_but_keeps_the_last_one() {
    let service = spawn_backend().await;
    let panel = WhatsAppPanel::mount(&service);
    panel.add_session("S1").expect("add");

    let err = panel.remove_session("S1").await.expect_err("logout fails");
    assert!(matches!(err, PanelError::Api(_)));
    assert!(panel.session("S1").is_none());

    assert!(matches!(
        panel.remove_session(DEFAULT_SESSION_NAME).await,
        Err(PanelError::LastSession)
    ));
    assert_eq!(panel.sessions().len(), 1);
}

#[tokio::test]
async fn mcp_probe_completes_only_the_matching_server() {
    let service = spawn_backend().await;
    let panel = McpPanel::mount(&service);
    assert_eq!(panel.refresh().await.expect("refresh"), 2);

    assert_eq!(panel.test_connection("1").await.expect("probe 1"), OpState::Queued);
    assert_eq!(panel.test_connection("2").await.expect("probe 2"), OpState::Queued);

    service.bus().publish(&PushEvent::new(
        EventKind::McpServerStatus,
        json!({"id": 1, "status": "online", "latency": 9}),
    ));

    assert_eq!(panel.probe_state("1"), OpState::Success);
    assert_eq!(panel.probe_state("2"), OpState::Queued);
    let servers = panel.servers();
    let alpha = servers.iter().find(|s| s.id == "1").expect("alpha");
    let beta = servers.iter().find(|s| s.id == "2").expect("beta");
    assert_eq!(alpha.status, McpServerStatus::Online);
    assert_eq!(alpha.latency_ms, 9);
    assert_eq!(beta.status, McpServerStatus::Syncing);
}

#[tokio::test]
async fn mcp_registration_resolves_from_push_event() {
    let service = spawn_backend().await;
    let panel = McpPanel::mount(&service);

    let op = panel.register("Stock", "http://stock.local").await.expect("register");
    assert_eq!(op, OpState::Queued);
    assert!(matches!(
        panel.register("Stock", "http://stock.local").await,
        Err(PanelError::Busy(_))
    ));

    service.bus().publish(&PushEvent::new(
        EventKind::McpNewServer,
        json!({"id": 5, "name": "Stock", "url": "http://stock.local", "status": "connected"}),
    ));
    service.bus().publish(&PushEvent::new(
        EventKind::McpConnectionResult,
        json!({"status": "success", "name": "Stock", "server": {"id": 5}}),
    ));

    assert_eq!(panel.registration_state("Stock"), OpState::Success);
    assert_eq!(panel.servers()[0].name, "Stock");
}

#[tokio::test]
async fn insights_navigation_reloads_rows() {
    let service = spawn_backend().await;
    let panel = InsightsPanel::mount(&service);

    assert_eq!(panel.load().await.expect("overview"), 1);
    assert!(panel.drill_into(0).await.expect("drill"));
    let state = panel.snapshot();
    assert_eq!(panel.trail(), "Overview > Vendas Mensais");
    assert_eq!(state.items[0].name, "Pico");

    assert!(!panel.drill_into(0).await.expect("leaf"));
    assert!(panel.back().await.expect("back"));
    assert!(panel.snapshot().stack.at_root());
    assert_eq!(panel.snapshot().items[0].id.as_deref(), Some("vendas"));
}

#[tokio::test]
async fn dropped_panel_detaches_from_the_bus() {
    let service = spawn_backend().await;
    let leads = LeadsPanel::mount(&service);
    assert_eq!(leads.refresh().await.expect("refresh"), 1);
    assert_eq!(service.bus().listener_count(), 1);

    service.bus().publish(&PushEvent::new(
        EventKind::LeadUpdate,
        json!({"id": 4, "userName": "Anna", "potential": "high"}),
    ));
    assert_eq!(leads.leads()[0].id, "4");

    drop(leads);
    assert_eq!(service.bus().listener_count(), 0);
}
