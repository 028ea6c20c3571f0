use std::{future::Future, net::SocketAddr, time::Duration};

use {
    axum::{
        Router,
        extract::{State, rejection::JsonRejection},
        http::{HeaderName, HeaderValue, Method, StatusCode, Uri, header},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    serde_json::{Value, json},
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{AllowOrigin, Any, CorsLayer},
        limit::RequestBodyLimitLayer,
        set_header::SetResponseHeaderLayer,
        trace::TraceLayer,
    },
    tracing::{error, info, warn},
    wagate_config::WagateConfig,
    wagate_whatsapp::SessionHandle,
};

use crate::{
    error::ApiError,
    request_throttle::throttle_gate,
    state::AppState,
    status::{ENDPOINTS, health_handler, qr_handler, root_handler, status_handler},
    validate::validate_send_request,
};

/// How long the channel gets to tear down on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    ("x-dns-prefetch-control", "off"),
    ("cross-origin-opener-policy", "same-origin"),
    (
        "content-security-policy",
        "default-src 'self'; img-src 'self' data:; style-src 'self' 'unsafe-inline'",
    ),
];

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: AppState, config: &WagateConfig) -> Router {
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/qr", get(qr_handler))
        .route("/send-whatsapp", post(send_handler))
        .fallback(not_found_handler)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            throttle_gate,
        ))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(axum::middleware::map_response(payload_too_large_as_json))
        .layer(CatchPanicLayer::custom(panic_response));

    if config.security.security_headers {
        for (name, value) in SECURITY_HEADERS {
            router = router.layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static(*name),
                HeaderValue::from_static(*value),
            ));
        }
    }

    router
        .layer(cors_layer(&config.security.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origin
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = o, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// `RequestBodyLimitLayer` rejects a declared oversize `Content-Length` with
/// a plain-text 413 before any handler runs; give it the JSON error shape.
async fn payload_too_large_as_json(response: Response) -> Response {
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge.into_response()
    } else {
        response
    }
}

fn panic_response(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "request handler panicked");
    ApiError::Internal.into_response()
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn send_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::InvalidInput(rejection.body_text())
        }
    })?;

    let request = validate_send_request(&body)?;
    let result = state.sender.send(&request.number, &request.message).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Message sent successfully",
        "data": result,
    }))
    .into_response())
}

async fn not_found_handler(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Not found",
            "message": format!("Route {method} {} not found", uri.path()),
            "availableEndpoints": ENDPOINTS,
        })),
    )
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Serve until `shutdown` resolves, then tear the channel down.
pub async fn start_gateway(
    config: &WagateConfig,
    session: SessionHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let state = AppState::new(config, session.clone());
    let app = build_gateway_app(state, config);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        environment = %config.server.environment,
        "wagate listening"
    );

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    info!("HTTP server stopped, shutting down WhatsApp session");
    if let Err(e) = session.shutdown(SHUTDOWN_TIMEOUT).await {
        warn!(error = %e, "session shutdown failed");
    }

    served?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
