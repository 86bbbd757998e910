use crate::config::RelayConfig;
use crate::controller::RequestController;
use crate::error::{AppError, AppResult};
use crate::registry::RequestRegistry;
use crate::tools::{self, ToolRegistry};
use crate::upstream::UpstreamClient;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub metrics: PrometheusHandle,
    pub controller: RequestController,
    pub tools: Arc<ToolRegistry>,
}

const MAX_BODY_BYTES: usize = 1024 * 1024;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
    pub relay: RelayConfig,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let listen = std::env::var("LMRELAY_LISTEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "127.0.0.1:8787".to_string());
        let metrics_path = std::env::var("LMRELAY_METRICS_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "/metrics".to_string());
        Self {
            listen,
            metrics_path,
            relay: RelayConfig::from_env(),
        }
    }
}

pub fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env())
}

pub fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let http = reqwest::Client::builder()
        .user_agent("lmrelay/0.1")
        .build()
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;

    let metrics = init_metrics()?;

    let relay = Arc::new(runtime.relay.clone());
    let client = UpstreamClient::new(http, relay.base_url.clone());
    let controller = RequestController::new(client, RequestRegistry::new(), relay);
    let tools = Arc::new(tools::registry());

    tracing::info!(
        base_url = %runtime.relay.base_url,
        default_model = %runtime.relay.default_model,
        tools = tools.len(),
        "relay state loaded"
    );

    Ok(AppState {
        runtime: Arc::new(runtime),
        metrics,
        controller,
        tools,
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    Router::new()
        .route("/healthz", get(crate::handlers::healthz))
        .route("/v1/tools", get(crate::handlers::list_tools))
        .route("/v1/tools/call", post(crate::handlers::call_tool))
        .route("/v1/requests", get(crate::handlers::list_requests))
        .route("/v1/requests/{id}", get(crate::handlers::get_request))
        .route(
            "/v1/requests/{id}/cancel",
            post(crate::handlers::cancel_request),
        )
        .route(&metrics_path, get(crate::handlers::metrics))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
}
