//! Axum Handlers for the REST API
//!
//! Turn-mode access to the coaching orchestrator: session creation, one
//! step per submitted message, and session inspection. `utoipa` doc
//! comments generate the OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use monica_core::OrchestratorError;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{
    models::{CreateSessionResponse, ErrorResponse, SessionDetail, SubmitMessagePayload, TurnResponse},
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(_) => Self::NotFound(err.to_string()),
            OrchestratorError::Validation(message) => Self::BadRequest(message),
            other => Self::InternalServerError(other.into()),
        }
    }
}

/// Create a new coaching session, opening in the setup stage.
#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 201, description = "Session created successfully", body = CreateSessionResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, opening) = state.orchestrator.create_session().await?;
    let response = CreateSessionResponse {
        session_id: session.id,
        stage: session.current_stage,
        persona: session.current_persona(),
        opening_message: opening.content,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Submit one trainee utterance and receive the reply for the current stage.
#[utoipa::path(
    post,
    path = "/sessions/{id}/messages",
    request_body = SubmitMessagePayload,
    responses(
        (status = 200, description = "Turn processed", body = TurnResponse),
        (status = 400, description = "Empty or oversized utterance", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn submit_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitMessagePayload>,
) -> Result<Json<TurnResponse>, ApiError> {
    let result = state.orchestrator.submit(id, &payload.text).await?;
    Ok(Json(result.into()))
}

/// Get a session's profile, stage, progress markers, and transcript.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionDetail),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetail>, ApiError> {
    let (session, transcript) = state.orchestrator.session_view(id).await?;
    Ok(Json(SessionDetail::new(session, transcript)))
}
