//! Observability endpoints: `/`, `/status`, `/health` and `/qr`.

use {
    axum::{
        extract::{Query, State},
        http::StatusCode,
        response::{Html, IntoResponse, Json, Response},
    },
    chrono::Utc,
    serde::{Deserialize, Serialize},
    serde_json::json,
    wagate_whatsapp::ConnectionState,
};

use crate::state::AppState;

/// Memory usage in bytes.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemSnapshot {
    pub process: u64,
    pub available: u64,
    pub total: u64,
}

pub fn collect_mem_snapshot() -> MemSnapshot {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let pid = sysinfo::get_current_pid().ok();
    if let Some(pid) = pid {
        sys.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[pid]),
            false,
            sysinfo::ProcessRefreshKind::nothing().with_memory(),
        );
    }
    let process = pid
        .and_then(|p| sys.process(p))
        .map(|p| p.memory())
        .unwrap_or(0);
    let total = sys.total_memory();
    // available_memory() returns 0 on macOS; fall back to total − used.
    let available = match sys.available_memory() {
        0 => total.saturating_sub(sys.used_memory()),
        v => v,
    };
    MemSnapshot {
        process,
        available,
        total,
    }
}

/// Short status word for the channel, as shown to operators.
pub fn whatsapp_status(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Ready => "connected",
        ConnectionState::Initializing | ConnectionState::Authenticated => "initializing",
        ConnectionState::AwaitingAuth => "awaiting_qr_scan",
        ConnectionState::Uninitialized | ConnectionState::Disconnected => "disconnected",
        ConnectionState::Error => "error",
    }
}

pub fn memory_status(mem: &MemSnapshot, warn_bytes: u64) -> &'static str {
    if warn_bytes > 0 && mem.process > warn_bytes {
        "warning"
    } else {
        "ok"
    }
}

pub const ENDPOINTS: &[&str] = &[
    "GET /",
    "GET /status",
    "GET /health",
    "GET /qr",
    "POST /send-whatsapp",
];

pub async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();
    Json(json!({
        "service": "wagate",
        "description": "WhatsApp Web message gateway",
        "version": state.version,
        "status": whatsapp_status(snapshot.state),
        "uptime": state.uptime().as_secs(),
        "endpoints": ENDPOINTS,
        "timestamp": Utc::now(),
    }))
}

pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();
    Json(json!({
        "success": true,
        "whatsappConnected": snapshot.is_ready(),
        "clientInitializing": snapshot.is_initializing(),
        "state": snapshot.state,
        "phoneNumber": snapshot.phone_number,
        "lastError": snapshot.last_error,
        "reconnectAttempts": snapshot.reconnect_attempts,
        "qrAvailable": snapshot.qr.is_some(),
        "uptime": state.uptime().as_secs(),
        "memory": collect_mem_snapshot(),
        "timestamp": Utc::now(),
    }))
}

/// Always 200 while the process can answer; the body carries the details.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();
    let memory = memory_status(&collect_mem_snapshot(), state.memory_warn_bytes);
    let overall = if snapshot.is_ready() && memory == "ok" {
        "healthy"
    } else {
        "degraded"
    };
    Json(json!({
        "status": overall,
        "checks": {
            "server": "ok",
            "whatsapp": whatsapp_status(snapshot.state),
            "memory": memory,
        },
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct QrQuery {
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn qr_handler(State(state): State<AppState>, Query(query): Query<QrQuery>) -> Response {
    let snapshot = state.session.snapshot();
    let image = snapshot
        .qr
        .as_ref()
        .and_then(|qr| qr.image.as_ref().map(|image| (qr.payload.as_str(), image.as_str())));

    let Some((payload, image)) = image else {
        let message = if snapshot.is_ready() {
            "WhatsApp is already connected"
        } else {
            "No QR code available yet. Check /status and try again shortly."
        };
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": "No QR code available",
                "message": message,
                "state": snapshot.state,
            })),
        )
            .into_response();
    };

    if query.format.as_deref() == Some("json") {
        return Json(json!({
            "success": true,
            "qr": payload,
            "image": image,
        }))
        .into_response();
    }

    Html(format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="20">
<title>wagate: link WhatsApp</title>
</head>
<body style="font-family:sans-serif;text-align:center;margin-top:3em">
<h1>Scan with WhatsApp</h1>
<p>Open WhatsApp on your phone, go to Linked devices, and scan this code.</p>
<img src="{image}" alt="WhatsApp QR code" width="320" height="320">
</body>
</html>
"#
    ))
    .into_response()
}
