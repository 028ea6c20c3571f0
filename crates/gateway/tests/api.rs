//! End-to-end tests of the HTTP surface against a scripted channel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc};

use {
    serde_json::{Value, json},
    tokio::net::TcpListener,
};

use {
    wagate_config::{Environment, WagateConfig},
    wagate_gateway::{AppState, build_gateway_app},
    wagate_whatsapp::{
        ChannelClient, ConnectionState, LifecycleEvent, ReconnectPolicy, SessionHandle,
        testing::MockClient,
    },
};

struct TestServer {
    addr: SocketAddr,
    session: SessionHandle,
    http: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.http.get(self.url(path)).send().await.unwrap()
    }

    async fn send(&self, body: Value) -> reqwest::Response {
        self.http
            .post(self.url("/send-whatsapp"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

async fn start_server(config: WagateConfig, client: &Arc<MockClient>) -> TestServer {
    let session = wagate_whatsapp::spawn(
        Arc::clone(client) as Arc<dyn ChannelClient>,
        ReconnectPolicy::default(),
    );
    let state = AppState::new(&config, session.clone());
    let app = build_gateway_app(state, &config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        session,
        http: reqwest::Client::new(),
    }
}

/// A server whose channel has already reached `Ready`.
async fn start_ready_server(config: WagateConfig, client: &Arc<MockClient>) -> TestServer {
    let server = start_server(config, client).await;
    server.session.initialize().await.unwrap();
    server
        .session
        .wait_for_state(ConnectionState::Ready)
        .await
        .unwrap();
    server
}

#[tokio::test]
async fn send_to_ten_digit_number() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let resp = server
        .send(json!({"number": "9876543210", "message": "Hello"}))
        .await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["to"], "9876543210");
    assert_eq!(body["data"]["chatId"], "919876543210@c.us");
    assert!(body["data"]["messageId"].as_str().unwrap().contains("MOCK"));
    assert!(
        body["data"]["responseTime"]
            .as_str()
            .unwrap()
            .ends_with("ms")
    );
    assert_eq!(
        client.sent(),
        vec![("919876543210@c.us".to_string(), "Hello".to_string())]
    );
}

#[tokio::test]
async fn send_before_initialize_is_unavailable() {
    let client = MockClient::new().into_arc();
    let server = start_server(WagateConfig::default(), &client).await;

    let resp = server
        .send(json!({"number": "9876543210", "message": "Hello"}))
        .await;
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["whatsappConnected"], false);
    assert_eq!(body["clientInitializing"], false);
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn send_while_awaiting_scan_reports_initializing() {
    let client = MockClient::new()
        .with_script(vec![LifecycleEvent::Qr("2@payload".into())])
        .into_arc();
    let server = start_server(WagateConfig::default(), &client).await;
    server.session.initialize().await.unwrap();
    server
        .session
        .wait_for_state(ConnectionState::AwaitingAuth)
        .await
        .unwrap();

    let resp = server
        .send(json!({"number": "9876543210", "message": "Hello"}))
        .await;
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["clientInitializing"], true);
}

#[tokio::test]
async fn send_after_disconnect_fails_fast() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    client
        .emit(LifecycleEvent::Disconnected("NAVIGATION".into()))
        .await;
    server
        .session
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();

    let resp = server
        .send(json!({"number": "9876543210", "message": "Hello"}))
        .await;
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["whatsappConnected"], false);
}

#[tokio::test]
async fn missing_message_returns_example() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let resp = server.send(json!({"number": "9876543210"})).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["example"]["number"], "9876543210");
    assert!(body["example"]["message"].is_string());
}

#[tokio::test]
async fn overlong_message_is_rejected() {
    let client = MockClient::ready().into_arc();
    let mut config = WagateConfig::default();
    config.server.body_limit_bytes = 64 * 1024;
    let server = start_ready_server(config, &client).await;

    let resp = server
        .send(json!({"number": "9876543210", "message": "x".repeat(4097)}))
        .await;
    assert_eq!(resp.status(), 400);
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn malformed_json_is_invalid_input() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let resp = server
        .http
        .post(server.url("/send-whatsapp"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["example"].is_object());
}

#[tokio::test]
async fn oversized_body_is_413() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let resp = server
        .send(json!({"number": "9876543210", "message": "x".repeat(20_000)}))
        .await;
    assert_eq!(resp.status(), 413);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Payload too large");
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn oversized_chunked_body_is_413_json() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let payload = json!({"number": "9876543210", "message": "x".repeat(20_000)}).to_string();
    let chunks = futures::stream::iter([Ok::<_, std::io::Error>(payload)]);
    let resp = server
        .http
        .post(server.url("/send-whatsapp"))
        .header("content-type", "application/json")
        .body(reqwest::Body::wrap_stream(chunks))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Payload too large");
}

#[tokio::test]
async fn unregistered_number_is_404() {
    let client = MockClient::ready()
        .with_registered(["911111111111@c.us"])
        .into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let resp = server
        .send(json!({"number": "9876543210", "message": "Hello"}))
        .await;
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("9876543210"));
}

#[tokio::test]
async fn send_failure_detail_depends_on_environment() {
    for (environment, leaks) in [
        (Environment::Production, false),
        (Environment::Development, true),
    ] {
        let client = MockClient::ready().into_arc();
        client.set_fail_sends(true);
        let mut config = WagateConfig::default();
        config.server.environment = environment;
        let server = start_ready_server(config, &client).await;

        let resp = server
            .send(json!({"number": "9876543210", "message": "Hello"}))
            .await;
        assert_eq!(resp.status(), 500);
        let text = resp.text().await.unwrap();
        assert_eq!(text.contains("mock send failure"), leaks, "{environment}");
    }
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let client = MockClient::ready().into_arc();
    let mut config = WagateConfig::default();
    config.rate_limit.max_requests = 2;
    let server = start_ready_server(config, &client).await;

    assert_eq!(server.get("/health").await.status(), 200);
    assert_eq!(server.get("/status").await.status(), 200);

    let resp = server
        .send(json!({"number": "9876543210", "message": "Hello"}))
        .await;
    assert_eq!(resp.status(), 429);
    let retry_after: u64 = resp.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 900);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn health_is_ok_while_disconnected() {
    let client = MockClient::new().into_arc();
    let server = start_server(WagateConfig::default(), &client).await;

    let resp = server.get("/health").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["checks"]["server"], "ok");
    assert_eq!(body["checks"]["whatsapp"], "disconnected");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn status_reports_connection() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let body: Value = server.get("/status").await.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["whatsappConnected"], true);
    assert_eq!(body["clientInitializing"], false);
    assert_eq!(body["state"], "ready");
    assert_eq!(body["phoneNumber"], "911234567890");
    assert!(body["uptime"].is_u64());
    assert!(body["memory"]["process"].is_u64());
}

#[tokio::test]
async fn root_describes_service() {
    let client = MockClient::ready().into_arc();
    let server = start_ready_server(WagateConfig::default(), &client).await;

    let body: Value = server.get("/").await.json().await.unwrap();
    assert_eq!(body["service"], "wagate");
    assert_eq!(body["status"], "connected");
    assert!(body["uptime"].is_u64());
}

#[tokio::test]
async fn unknown_route_lists_endpoints() {
    let client = MockClient::new().into_arc();
    let server = start_server(WagateConfig::default(), &client).await;

    let resp = server.get("/nope").await;
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    let endpoints = body["availableEndpoints"].as_array().unwrap();
    assert!(endpoints.iter().any(|e| e == "POST /send-whatsapp"));
}

#[tokio::test]
async fn qr_page_and_json() {
    let client = MockClient::new()
        .with_script(vec![LifecycleEvent::Qr("2@abc,def,ghi".into())])
        .into_arc();
    let server = start_server(WagateConfig::default(), &client).await;

    assert_eq!(server.get("/qr").await.status(), 404);

    server.session.initialize().await.unwrap();
    server
        .session
        .wait_until(|s| s.qr.as_ref().is_some_and(|qr| qr.image.is_some()))
        .await
        .unwrap();

    let resp = server.get("/qr").await;
    assert_eq!(resp.status(), 200);
    let html = resp.text().await.unwrap();
    assert!(html.contains("data:image/png;base64,"));

    let body: Value = server.get("/qr?format=json").await.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["qr"], "2@abc,def,ghi");
}

#[tokio::test]
async fn security_headers_toggle() {
    let client = MockClient::new().into_arc();
    let server = start_server(WagateConfig::default(), &client).await;
    let resp = server.get("/health").await;
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");

    let mut config = WagateConfig::default();
    config.security.security_headers = false;
    let server = start_server(config, &client).await;
    let resp = server.get("/health").await;
    assert!(resp.headers().get("x-content-type-options").is_none());
}
