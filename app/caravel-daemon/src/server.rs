//! REST surface over the daemon's Unix socket.
//!
//! Thin glue: every route decodes a typed request, calls one
//! orchestrator operation, and encodes a typed response or the typed
//! wire error. No lifecycle logic lives here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use caravel_api::{
    ApiError, ConfigResponse, OperationResponse, StartRequest, StatusResponse,
    UpdateConfigResponse, VersionResponse,
};
use caravel_core::{ConfigPatch, Orchestrator};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    /// The one orchestrator for the one VM this daemon manages.
    pub orchestrator: Arc<Orchestrator>,
}

/// Builds the daemon router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/v1/status", get(get_status))
        .route("/v1/start", post(post_start))
        .route("/v1/stop", post(post_stop))
        .route("/v1/restart", post(post_restart))
        .route("/v1/config", get(get_config).patch(patch_config))
        .route("/v1/version", get(get_version))
        .with_state(AppState { orchestrator })
}

/// Adapter so `?` works on orchestrator calls inside handlers.
struct AppError(ApiError);

impl<E: Into<ApiError>> From<E> for AppError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_body())).into_response()
    }
}

type HandlerResult<T> = std::result::Result<Json<T>, AppError>;

async fn get_status(State(state): State<AppState>) -> HandlerResult<StatusResponse> {
    let status = state.orchestrator.status().await?;
    Ok(Json(StatusResponse::from(status)))
}

async fn post_start(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> HandlerResult<OperationResponse> {
    let patch = body.and_then(|Json(request)| request.config);
    let override_config = match patch {
        Some(patch) if !patch.is_empty() => {
            let mut config = state.orchestrator.get_config()?;
            patch.apply_to(&mut config);
            Some(config)
        }
        _ => None,
    };
    let vm_state = state.orchestrator.start(override_config).await?;
    Ok(Json(OperationResponse::from(vm_state)))
}

async fn post_stop(State(state): State<AppState>) -> HandlerResult<OperationResponse> {
    let vm_state = state.orchestrator.stop().await?;
    Ok(Json(OperationResponse::from(vm_state)))
}

async fn post_restart(State(state): State<AppState>) -> HandlerResult<OperationResponse> {
    let vm_state = state.orchestrator.restart().await?;
    Ok(Json(OperationResponse::from(vm_state)))
}

async fn get_config(State(state): State<AppState>) -> HandlerResult<ConfigResponse> {
    let config = state.orchestrator.get_config()?;
    Ok(Json(ConfigResponse { config }))
}

async fn patch_config(
    State(state): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> HandlerResult<UpdateConfigResponse> {
    let decision = state.orchestrator.update_config(&patch)?;
    Ok(Json(UpdateConfigResponse::from(decision)))
}

async fn get_version(State(state): State<AppState>) -> HandlerResult<VersionResponse> {
    let colima = state.orchestrator.version().await?;
    Ok(Json(VersionResponse {
        daemon: env!("CARGO_PKG_VERSION").to_string(),
        colima,
    }))
}
