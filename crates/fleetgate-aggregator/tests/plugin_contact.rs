#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Plugin contact over real HTTP.
//!
//! An axum fake plugin listens on an ephemeral port; requests go through the
//! reqwest transport exactly as in production, minus TLS.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use fleetgate_core::config::{PluginConfig, PluginStatusPolling, TlsConfig, UrlTranslation};

use fleetgate_aggregator::error::AggregatorError;
use fleetgate_aggregator::plugin::{
    ContactError, ContactProtocol, HttpTransport, PlainPasswords, PluginRequest,
};
use fleetgate_aggregator::proxy::PluginProxy;
use fleetgate_aggregator::storage::{AggregatorDatabase, AuthMode, NewPlugin, Plugin};
use fleetgate_aggregator::translate::IdentityTranslator;

/// "plugin-admin:plugin-secret"
const BASIC_AUTH: &str = "Basic cGx1Z2luLWFkbWluOnBsdWdpbi1zZWNyZXQ=";

#[derive(Default)]
struct FakePlugin {
    logins: AtomicUsize,
    gets: AtomicUsize,
    /// Token currently accepted; `None` until the first login.
    token: Mutex<Option<String>>,
}

impl FakePlugin {
    /// Forget the issued token, as a restarted plugin would.
    fn restart(&self) {
        *self.token.lock().unwrap() = None;
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let basic = headers
            .get(header::AUTHORIZATION)
            .is_some_and(|v| v == BASIC_AUTH);
        let token = headers.get("x-auth-token").and_then(|v| v.to_str().ok());
        let current = self.token.lock().unwrap().clone();
        basic || (token.is_some() && token == current.as_deref())
    }
}

async fn login(State(fake): State<Arc<FakePlugin>>, Json(body): Json<Value>) -> Response {
    if body["Username"] != "plugin-admin" || body["Password"] != "plugin-secret" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let n = fake.logins.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("token-{n}");
    *fake.token.lock().unwrap() = Some(token.clone());
    (StatusCode::CREATED, [("X-Auth-Token", token)], Json(json!({}))).into_response()
}

async fn systems(State(fake): State<Arc<FakePlugin>>, headers: HeaderMap) -> Response {
    fake.gets.fetch_add(1, Ordering::SeqCst);
    if !fake.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "@odata.id": "/ODIM/v1/Systems",
        "Members": [{"@odata.id": "/ODIM/v1/Systems/1"}],
    }))
    .into_response()
}

async fn create_zone(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if headers.get(header::CONTENT_TYPE).is_none_or(|v| v != "application/json") {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    let id = body["Id"].as_str().unwrap_or("z0").to_string();
    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/ODIM/v1/Fabrics/f-1/Zones/{id}"))],
        Json(json!({"@odata.id": format!("/ODIM/v1/Fabrics/f-1/Zones/{id}")})),
    )
        .into_response()
}

async fn status() -> Json<Value> {
    Json(json!({"Status": "ok"}))
}

/// Serve the fake plugin and return its `host:port`.
async fn spawn_plugin(fake: Arc<FakePlugin>) -> String {
    let app = Router::new()
        .route("/ODIM/v1/Sessions", post(login))
        .route("/ODIM/v1/Systems", get(systems))
        .route("/ODIM/v1/Fabrics/f-1/Zones", post(create_zone))
        .route("/ODIM/v1/Status", get(status))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

fn http_contact() -> Arc<ContactProtocol> {
    let plugin_config = PluginConfig {
        scheme: "http".to_string(),
        request_timeout_secs: 5,
    };
    let transport = HttpTransport::new(&plugin_config, &TlsConfig::default()).unwrap();
    Arc::new(ContactProtocol::new(
        Arc::new(transport),
        Arc::new(PlainPasswords),
        &plugin_config,
        &PluginStatusPolling {
            response_timeout_secs: 1,
            max_retry_attempt: 2,
            retry_interval_secs: 0,
        },
    ))
}

fn plugin(id: &str, address: &str, mode: AuthMode) -> Plugin {
    Plugin {
        id: id.to_string(),
        address: address.to_string(),
        preferred_auth: mode.as_str().to_string(),
        username: "plugin-admin".to_string(),
        password: b"plugin-secret".to_vec(),
        created_at: 0,
    }
}

// =========================================================================
// Contact protocol
// =========================================================================

#[tokio::test]
async fn token_plugin_logs_in_once_and_reuses_token() {
    let fake = Arc::new(FakePlugin::default());
    let address = spawn_plugin(Arc::clone(&fake)).await;
    let contact = http_contact();
    let grf = plugin("GRF", &address, AuthMode::TokenAuth);

    for _ in 0..3 {
        let resp = contact
            .dispatch(&grf, &PluginRequest::get("/ODIM/v1/Systems"))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["Members"][0]["@odata.id"], "/ODIM/v1/Systems/1");
    }
    assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
    assert_eq!(contact.tokens().get("GRF").as_deref(), Some("token-1"));
}

#[tokio::test]
async fn rejected_token_triggers_one_relogin() {
    let fake = Arc::new(FakePlugin::default());
    let address = spawn_plugin(Arc::clone(&fake)).await;
    let contact = http_contact();
    let grf = plugin("GRF", &address, AuthMode::TokenAuth);

    contact
        .dispatch(&grf, &PluginRequest::get("/ODIM/v1/Systems"))
        .await
        .unwrap();
    fake.restart();

    let resp = contact
        .send(&grf, &PluginRequest::get("/ODIM/v1/Systems"))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(fake.logins.load(Ordering::SeqCst), 2);
    assert_eq!(fake.gets.load(Ordering::SeqCst), 3);
    assert_eq!(contact.tokens().get("GRF").as_deref(), Some("token-2"));
}

#[tokio::test]
async fn basic_plugin_sends_credentials_with_priming_call() {
    let fake = Arc::new(FakePlugin::default());
    let address = spawn_plugin(Arc::clone(&fake)).await;
    let contact = http_contact();
    let ilo = plugin("ILO", &address, AuthMode::BasicAuth);

    let resp = contact
        .dispatch(&ilo, &PluginRequest::get("/ODIM/v1/Systems"))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(fake.gets.load(Ordering::SeqCst), 2);
    assert_eq!(fake.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn closed_port_is_reported_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let contact = http_contact();
    let dead = plugin("DEAD", &address, AuthMode::BasicAuth);
    let err = contact
        .send(&dead, &PluginRequest::get("/ODIM/v1/Systems"))
        .await
        .unwrap_err();
    assert!(matches!(err, ContactError::Unreachable { .. }), "{err}");
}

// =========================================================================
// Proxy over HTTP
// =========================================================================

async fn proxy_for(address: &str) -> PluginProxy {
    let db = AggregatorDatabase::open_in_memory().await.unwrap();
    db.create_plugin(&NewPlugin {
        id: "GRF",
        address,
        auth_mode: AuthMode::TokenAuth,
        username: "plugin-admin",
        password: b"plugin-secret",
    })
    .await
    .unwrap();
    db.create_fabric("f-1", "GRF").await.unwrap();
    PluginProxy::new(
        db,
        http_contact(),
        Arc::new(IdentityTranslator::new(&UrlTranslation::default())),
    )
}

#[tokio::test]
async fn fabric_post_round_trips_through_plugin() {
    let fake = Arc::new(FakePlugin::default());
    let address = spawn_plugin(Arc::clone(&fake)).await;
    let proxy = proxy_for(&address).await;

    let resp = proxy
        .forward_to_fabric(
            "f-1",
            Method::POST,
            "/redfish/v1/Fabrics/f-1/Zones",
            Some(br#"{"Id":"z7"}"#.as_slice()),
        )
        .await
        .unwrap();
    assert_eq!(resp.status, 201);
    assert_eq!(
        resp.location.as_deref(),
        Some("/redfish/v1/Fabrics/f-1/Zones/z7")
    );
    assert_eq!(
        resp.body.unwrap()["@odata.id"],
        "/redfish/v1/Fabrics/f-1/Zones/z7"
    );
}

#[tokio::test]
async fn proxy_to_unreachable_plugin_is_service_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    let proxy = proxy_for(&address).await;

    let err = proxy
        .forward_to_fabric("f-1", Method::GET, "/redfish/v1/Fabrics/f-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::PluginUnreachable(_)), "{err}");
    assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
}
