mod ws;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::db::blob::{self, BlobStore, DEFAULT_CONTENT_TYPE};
use crate::error::SurveyError;
use crate::models::Snapshot;
use crate::protocol::{AdminResponse, VoteRequest, VoteResponse};
use crate::survey::SurveyHandle;

#[derive(Clone)]
pub struct AppState {
    pub survey: SurveyHandle,
    pub blobs: Arc<dyn BlobStore>,
    pub admin_token: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/vote", post(submit_vote))
        .route("/api/results", get(fetch_results))
        .route("/api/reset", post(reset_survey))
        .route("/qr/{key}", get(fetch_blob).put(store_blob))
        .route("/ws", get(ws::upgrade))
        .with_state(state)
}

fn status_for(err: &SurveyError) -> StatusCode {
    match err {
        SurveyError::AlreadyVoted => StatusCode::CONFLICT,
        SurveyError::NoValidSelections | SurveyError::MissingSession => StatusCode::BAD_REQUEST,
        SurveyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SurveyError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// Caller must present `Authorization: Bearer <ADMIN_TOKEN>`.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.admin_token.as_deref() else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|given| given.trim() == expected)
}

async fn submit_vote(
    State(state): State<AppState>,
    request: Result<Json<VoteRequest>, JsonRejection>,
) -> (StatusCode, Json<VoteResponse>) {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            debug!("Rejected malformed vote request: {}", rejection.body_text());
            return (StatusCode::BAD_REQUEST, Json(VoteResponse::malformed()));
        }
    };

    match state
        .survey
        .submit_vote(request.session_id, request.selections)
        .await
    {
        Ok(_) => (StatusCode::OK, Json(VoteResponse::accepted())),
        Err(e) => (status_for(&e), Json(VoteResponse::rejected(&e))),
    }
}

async fn fetch_results(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.survey.snapshot())
}

async fn reset_survey(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<AdminResponse>) {
    if !authorized(&state, &headers) {
        warn!("Rejected unauthorized reset request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(AdminResponse::failed("Unauthorized")),
        );
    }

    match state.survey.reset().await {
        Ok(()) => {
            info!("Survey reset by admin request");
            (StatusCode::OK, Json(AdminResponse::ok()))
        }
        Err(e) => (
            status_for(&e),
            Json(AdminResponse::failed("Failed to reset survey")),
        ),
    }
}

async fn fetch_blob(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if !blob::is_valid_key(&key) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match state.blobs.get(&key).await {
        Ok(Some(blob)) => ([(header::CONTENT_TYPE, blob.content_type)], blob.bytes).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to read blob {}: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn store_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<AdminResponse>) {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(AdminResponse::failed("Unauthorized")),
        );
    }
    if !blob::is_valid_key(&key) {
        return (
            StatusCode::BAD_REQUEST,
            Json(AdminResponse::failed("Invalid key")),
        );
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    match state.blobs.put(&key, &body, content_type).await {
        Ok(()) => {
            info!("Stored blob {} ({} bytes, {})", key, body.len(), content_type);
            (StatusCode::OK, Json(AdminResponse::ok()))
        }
        Err(e) => {
            error!("Failed to store blob {}: {}", key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AdminResponse::failed("Failed to store blob")),
            )
        }
    }
}
