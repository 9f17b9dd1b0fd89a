// crates/server/src/routes/jobs.rs
//! Job Manager API.
//!
//! - GET  /jobs/config                    - Client polling settings
//! - POST /jobs                           - Submit a report job (202 + snapshot)
//! - GET  /jobs                           - Caller's jobs
//! - GET  /jobs/{id}/status               - Current snapshot
//! - GET  /jobs/{id}/requestPage/{page}   - Ask for a page; echoes the page number
//! - GET|POST /jobs/{id}/schedule         - Send output to a scheduled location
//! - GET|POST /jobs/{id}/cancel           - Interrupt the job
//! - GET  /jobs/{id}/content              - 202 until ready, then the output once
//! - GET|POST /jobs/{id}/schedule/location - Read or relocate scheduled output
//! - GET  /jobs/{id}/stream               - SSE stream of snapshots until terminal

use std::convert::Infallible;
use std::sync::Arc;

use async_report_jobs::{ContentPoll, JobId, JobState, RenderRequest, ScheduledLocation};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::config::ManagerConfig;
use crate::disposition::content_headers;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::session::CallerSession;
use crate::state::AppState;

/// Malformed ids answer exactly like unknown ones.
fn parse_id(raw: &str) -> ApiResult<JobId> {
    raw.parse().map_err(|e| {
        tracing::debug!(job_id = %raw, error = %e, "Rejected job id");
        ApiError::JobNotFound(raw.to_string())
    })
}

/// GET /api/jobs/config
async fn manager_config(State(state): State<Arc<AppState>>) -> Json<ManagerConfig> {
    Json(state.manager.clone())
}

/// POST /api/jobs
async fn submit_job(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Json(request): Json<RenderRequest>,
) -> ApiResult<(StatusCode, Json<JobState>)> {
    if request.path.trim().is_empty() {
        return Err(ApiError::BadRequest("path is required".to_string()));
    }

    let id = state.registry.submit(request, &session);
    metrics::record_job_submitted();

    let handle = state.registry.get_future(&id, &session)?;
    let snapshot = handle.snapshot();
    tokio::spawn(async move {
        let terminal = handle.wait().await;
        metrics::record_job_completed(terminal.status);
    });

    Ok((StatusCode::ACCEPTED, Json((*snapshot).clone())))
}

/// GET /api/jobs
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
) -> Json<Vec<JobState>> {
    let jobs = state
        .registry
        .list(&session)
        .into_iter()
        .map(|snapshot| (*snapshot).clone())
        .collect();
    Json(jobs)
}

/// GET /api/jobs/{id}/status
async fn job_status(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path(id): Path<String>,
) -> ApiResult<Json<JobState>> {
    let id = parse_id(&id)?;
    let snapshot = state.registry.get_state(&id, &session)?;
    Ok(Json((*snapshot).clone()))
}

/// GET /api/jobs/{id}/requestPage/{page}
async fn request_page(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path((id, page)): Path<(String, String)>,
) -> ApiResult<String> {
    let id = parse_id(&id)?;
    let page: u32 = page
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid page number '{page}'")))?;
    let page = state.registry.request_page(&id, &session, page)?;
    Ok(page.to_string())
}

/// GET|POST /api/jobs/{id}/schedule
async fn schedule_job(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path(id): Path<String>,
) -> ApiResult<Json<JobState>> {
    let id = parse_id(&id)?;
    state.registry.schedule(&id, &session)?;
    Ok(Json((*state.registry.get_state(&id, &session)?).clone()))
}

/// GET|POST /api/jobs/{id}/cancel
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path(id): Path<String>,
) -> ApiResult<Json<JobState>> {
    let id = parse_id(&id)?;
    if state.registry.cancel(&id, &session)? {
        metrics::record_job_canceled();
    }
    Ok(Json((*state.registry.get_state(&id, &session)?).clone()))
}

/// GET /api/jobs/{id}/content
///
/// 202 with the current snapshot while rendering, then the output exactly
/// once. Later calls answer 410. Headers are built before the output is
/// taken, so nothing after that point can fail.
async fn job_content(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let snapshot = state.registry.get_state(&id, &session)?;
    if !snapshot.status.is_terminal() {
        return Ok((StatusCode::ACCEPTED, Json((*snapshot).clone())).into_response());
    }

    let mime_type = snapshot.mime_type.as_deref();
    let headers = content_headers(&snapshot.path, mime_type);
    let content_type = content_type_value(&id, mime_type);
    let disposition = HeaderValue::from_str(&headers.disposition)
        .map_err(|e| ApiError::Internal(format!("invalid content disposition: {e}")))?;
    let description = HeaderValue::from_str(&headers.description)
        .map_err(|e| ApiError::Internal(format!("invalid content description: {e}")))?;

    let content = match state.registry.retrieve_content(&id, &session)? {
        ContentPoll::Pending => {
            return Ok((StatusCode::ACCEPTED, Json((*snapshot).clone())).into_response());
        }
        ContentPoll::Ready(content) => content,
    };

    let size = content.size();
    metrics::record_content_delivered(size);
    tracing::info!(job_id = %id, bytes = size, filename = %headers.disposition, "Streaming content");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, HeaderValue::from(size)),
            (header::CONTENT_DISPOSITION, disposition),
            (HeaderName::from_static("content-description"), description),
        ],
        Body::from_stream(content.into_stream()),
    )
        .into_response())
}

/// `Content-Type` for delivered output. A MIME type that is not a valid
/// header value is served as `application/octet-stream`.
fn content_type_value(id: &JobId, mime_type: Option<&str>) -> HeaderValue {
    let fallback = || HeaderValue::from_static("application/octet-stream");
    let Some(mime_type) = mime_type else {
        return fallback();
    };
    HeaderValue::from_str(mime_type).unwrap_or_else(|e| {
        tracing::warn!(job_id = %id, mime_type = ?mime_type, error = %e, "Unusable MIME type, serving as octet-stream");
        fallback()
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationParams {
    folder_id: Option<String>,
    new_name: Option<String>,
}

/// POST /api/jobs/{id}/schedule/location?folderId=..&newName=..
async fn update_location(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path(id): Path<String>,
    Query(params): Query<LocationParams>,
) -> ApiResult<Json<ScheduledLocation>> {
    let id = parse_id(&id)?;
    let Some(folder_id) = params.folder_id.filter(|folder| !folder.trim().is_empty()) else {
        // Unknown and non-SCHEDULED jobs answer 404 before the missing parameter.
        state.registry.scheduled_location(&id, &session)?;
        return Err(ApiError::BadRequest("folderId is required".to_string()));
    };
    let location =
        state
            .registry
            .update_scheduling_location(&id, &session, folder_id, params.new_name)?;
    Ok(Json(location))
}

/// GET /api/jobs/{id}/schedule/location
async fn scheduled_location(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduledLocation>> {
    let id = parse_id(&id)?;
    Ok(Json(state.registry.scheduled_location(&id, &session)?))
}

/// GET /api/jobs/{id}/stream
async fn stream_job(
    State(state): State<Arc<AppState>>,
    CallerSession(session): CallerSession,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>>> {
    let id = parse_id(&id)?;
    let mut rx = state.registry.get_future(&id, &session)?.watch();

    let stream = async_stream::stream! {
        loop {
            let snapshot = Arc::clone(&rx.borrow_and_update());
            let json = serde_json::to_string(&*snapshot).unwrap_or_default();
            yield Ok(Event::default().event("state").data(json));
            if snapshot.status.is_terminal() {
                break;
            }
            // The sender goes away when the job is evicted.
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/config", get(manager_config))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{id}/status", get(job_status))
        .route("/jobs/{id}/requestPage/{page}", get(request_page))
        .route("/jobs/{id}/schedule", get(schedule_job).post(schedule_job))
        .route(
            "/jobs/{id}/schedule/location",
            get(scheduled_location).post(update_location),
        )
        .route("/jobs/{id}/cancel", get(cancel_job).post(cancel_job))
        .route("/jobs/{id}/content", get(job_content))
        .route("/jobs/{id}/stream", get(stream_job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_creation() {
        let _router = router();
    }

    #[test]
    fn test_content_type_value_falls_back_for_unusable_mime() {
        let id = JobId::new();
        assert_eq!(content_type_value(&id, Some("text/csv")), "text/csv");
        assert_eq!(
            content_type_value(&id, Some("text/csv\r\nx-injected: 1")),
            "application/octet-stream"
        );
        assert_eq!(content_type_value(&id, None), "application/octet-stream");
    }

    #[test]
    fn test_parse_id_hides_reason() {
        let err = parse_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, ApiError::JobNotFound(ref raw) if raw == "not-a-uuid"));
        assert!(parse_id("4f1c2a0e-7a4b-4c7e-8d59-3e2f1a0b9c8d").is_ok());
    }
}
