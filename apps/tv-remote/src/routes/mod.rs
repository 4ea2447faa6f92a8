mod auth;
mod tv;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::metrics;
use crate::state::AppState;

pub use auth::CallbackParams;

const SERVICE_NAME: &str = "Android TV Control API";

pub const API_ENDPOINTS: [&str; 6] = [
    "/api/tv/power",
    "/api/tv/volume/up",
    "/api/tv/volume/down",
    "/api/tv/volume/mute",
    "/api/tv/app/launch",
    "/api/tv/navigate",
];

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready))
        .route("/metrics", get(metrics_handler))
        .route("/api", get(api_index))
        .route("/api/", get(api_index))
        .route("/api/tv/power", post(tv::power))
        .route("/api/tv/volume/up", post(tv::volume_up))
        .route("/api/tv/volume/down", post(tv::volume_down))
        .route("/api/tv/volume/mute", post(tv::volume_mute))
        .route("/api/tv/app/launch", post(tv::launch_app))
        .route("/api/tv/navigate", post(tv::navigate))
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", get(auth::logout))
        .route("/auth/user", get(auth::user))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime_secs(),
        "device_sessions": state.sessions().len(),
        "device": state.sessions().endpoint().to_string(),
    }))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "build": env!("TV_REMOTE_BUILD_ID"),
    }))
}

async fn api_index() -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "message": SERVICE_NAME,
        "endpoints": API_ENDPOINTS,
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], metrics::gather())
}

/// `{status, message}` envelope shared by every API response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    pub message: String,
}

impl StatusBody {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

pub type ApiResult = Result<Json<StatusBody>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Authentication(String),
    Authorization(String),
    Validation(String),
    Connection(String),
    Command(String),
    Provider(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Connection(_) | ApiError::Command(_) | ApiError::Provider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Authentication(msg)
            | ApiError::Authorization(msg)
            | ApiError::Validation(msg)
            | ApiError::Connection(msg)
            | ApiError::Command(msg)
            | ApiError::Provider(msg) => msg,
        };
        (status, Json(StatusBody::error(message))).into_response()
    }
}
