//! HTTP request handlers

use super::types::{ErrorResponse, VersionResponse};
use super::AppState;
use crate::turn::{TurnError, TurnErrorKind, TurnRequest, TurnResponse};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/turn", post(process_turn))
        .route("/version", get(get_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn process_turn(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    let response = state.turns.process(&request).await?;
    Ok(Json(response))
}

async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
struct AppError(TurnError);

impl From<TurnError> for AppError {
    fn from(error: TurnError) -> Self {
        Self(error)
    }
}

fn status_for(kind: TurnErrorKind) -> StatusCode {
    match kind {
        TurnErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        TurnErrorKind::UpstreamError | TurnErrorKind::ExtractionError => StatusCode::BAD_GATEWAY,
        TurnErrorKind::FormatError => StatusCode::UNPROCESSABLE_ENTITY,
        TurnErrorKind::CacheDeserializationError => StatusCode::INTERNAL_SERVER_ERROR,
        TurnErrorKind::CacheError => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        tracing::warn!(kind = kind.as_str(), status = status.as_u16(), error = %self.0, "Turn failed");

        let body = Json(ErrorResponse::new(self.0.to_string(), Some(kind)));
        (status, body).into_response()
    }
}
