use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use napoli_core::McpServerStatus;
use napoli_sync::{ApiClient, ApiError, AssistTask};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

async fn spawn_backend() -> ApiClient {
    let app = Router::new()
        .route(
            "/api/mcp/servers",
            get(|| async {
                Json(json!([
                    {"id": 1, "name": "Alpha", "url": "http://alpha", "status": "online", "latency": 12},
                    {"id": "2", "name": "Beta", "url": "http://beta", "status": "offline"},
                ]))
            }),
        )
        .route(
            "/api/mcp/connect",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"status": "processing", "echo": body}))
            }),
        )
        .route(
            "/api/analytics/drilldown",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                match params.get("scope").map(String::as_str) {
                    Some("overview") => Json(json!([
                        {"id": "vendas", "label": "Vendas Mensais", "value": "R$ 51.2k", "drillable": true},
                        {"id": "sentimento", "label": "Sentimento Geral", "value": "92%", "drillable": true},
                    ])),
                    _ => Json(json!([{"name": "Pico", "value": 100, "drillable": false}])),
                }
            }),
        )
        .route("/api/stats", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route(
            "/api/whatsapp/instances/:name/logout",
            post(|Path(name): Path<String>| async move {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({"detail": format!("Instance {name} not found")})),
                )
                    .into_response()
            }),
        )
        .route("/api/menu/:id", delete(|| async { StatusCode::NO_CONTENT }))
        .route(
            "/api/prompts/refine",
            post(|| async { Json(json!({"refined_prompt": "Sei un pizzaiolo cordiale."})) }),
        )
        .route(
            "/api/ai/ban-risk",
            post(|| async { "not json at all" }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let base = Url::parse(&format!("http://{addr}/api")).expect("base url");
    ApiClient::new(base, Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn lists_servers_with_mixed_id_types() {
    let api = spawn_backend().await;
    let servers = api.list_mcp_servers().await.expect("servers");
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].id, "1");
    assert_eq!(servers[0].status, McpServerStatus::Online);
    assert_eq!(servers[0].latency_ms, 12);
    assert_eq!(servers[1].id, "2");
}

#[tokio::test]
async fn posts_json_bodies() {
    let api = spawn_backend().await;
    let ack = api
        .connect_mcp("Stock", "http://stock.local")
        .await
        .expect("ack");
    assert_eq!(ack["status"], "processing");
    assert_eq!(ack["echo"], json!({"name": "Stock", "url": "http://stock.local"}));
}

#[tokio::test]
async fn drilldown_passes_scope_and_decodes_both_row_shapes() {
    let api = spawn_backend().await;
    let overview = api.drilldown("overview", "root").await.expect("overview");
    assert_eq!(overview.len(), 2);
    assert_eq!(overview[0].id.as_deref(), Some("vendas"));
    assert!(overview[0].drillable);

    let detail = api.drilldown("vendas", "vendas").await.expect("detail");
    assert_eq!(detail[0].id, None);
    assert_eq!(detail[0].name, "Pico");
    assert!(!detail[0].drillable);
}

#[tokio::test]
async fn error_status_with_empty_body_keeps_status() {
    let api = spawn_backend().await;
    let err = api.stats().await.expect_err("unavailable");
    match &err {
        ApiError::Status { status, body } => {
            assert_eq!(*status, 503);
            assert!(body.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.user_message(), "request failed with status 503");
}

#[tokio::test]
async fn error_detail_is_surfaced() {
    let api = spawn_backend().await;
    let err = api.logout_instance("S1").await.expect_err("not found");
    assert_eq!(err.user_message(), "Instance S1 not found");
}

#[tokio::test]
async fn empty_success_body_decodes_as_null() {
    let api = spawn_backend().await;
    assert_eq!(api.delete_menu_item("p1").await.expect("deleted"), Value::Null);
}

#[tokio::test]
async fn typed_helpers_unwrap_fields_and_reject_garbage() {
    let api = spawn_backend().await;
    assert_eq!(
        api.refine_prompt("sii gentile").await.expect("refined"),
        "Sei un pizzaiolo cordiale."
    );
    let err = api
        .assist(AssistTask::BanRisk, &json!({"phone": "+39"}))
        .await
        .expect_err("garbage");
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let base = Url::parse(&format!("http://{addr}/api")).expect("base url");
    let api = ApiClient::new(base, Duration::from_secs(2)).expect("client");
    let err = api.list_leads().await.expect_err("refused");
    assert!(matches!(err, ApiError::Transport(_)));
    assert_eq!(err.user_message(), "backend unreachable");
}
