//! services/api/src/web/sessions.rs
//!
//! Booking and session lifecycle endpoints, plus the two things a participant
//! files against a session: a review and an issue report.
//!
//! Each lifecycle route names one transition so the authorization for it is
//! decided by the operation it calls.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use tutoring_core::schedule::{parse_date, parse_time};
use tutoring_core::{
    BookingRequest, Reschedule, ReviewRequest, SessionStatus, UserIdentity,
};
use utoipa::{IntoParams, ToSchema};

use crate::web::rest::{applied, success_with, ApiResult, Failure};
use crate::web::state::AppState;

//=========================================================================================
// Request Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookSessionRequest {
    pub tutor_id: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    pub subject: String,
    pub hourly_rate: f64,
    pub tutor_name: String,
    pub student_name: String,
    pub tutor_phone_number: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct StatusRequest {
    /// `confirmed`, `cancelled` or `completed`
    #[schema(value_type = String)]
    pub status: SessionStatus,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Deserialize, ToSchema)]
pub struct IssueRequest {
    pub description: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewBody {
    pub session_id: String,
    pub tutor_id: String,
    /// 0 to 5 in half-star steps
    pub rating: f64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SessionFilter {
    /// Only sessions in this status
    #[param(value_type = Option<String>)]
    pub status: Option<SessionStatus>,
}

//=========================================================================================
// Booking and Queries
//=========================================================================================

/// POST /sessions - Book a session with a tutor
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = BookSessionRequest,
    responses(
        (status = 201, description = "The pending session"),
        (status = 400, description = "Invalid or past date/time"),
        (status = 409, description = "The requested hours are not available")
    )
)]
pub async fn book_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Json(req): Json<BookSessionRequest>,
) -> Result<impl IntoResponse, Failure> {
    let request = BookingRequest {
        tutor_id: req.tutor_id,
        date: parse_date(&req.date)?,
        start_time: parse_time(&req.start_time)?,
        end_time: parse_time(&req.end_time)?,
        subject: req.subject,
        hourly_rate: req.hourly_rate,
        tutor_name: req.tutor_name,
        student_name: req.student_name,
        tutor_phone_number: req.tutor_phone_number,
    };
    let session = state.market.book_session(&actor, request).await?;
    info!(session_id = %session.id, "session booked over http");
    Ok((StatusCode::CREATED, success_with("session", session)?))
}

/// GET /sessions - The caller's sessions, newest first
#[utoipa::path(
    get,
    path = "/sessions",
    params(SessionFilter),
    responses((status = 200, description = "Sessions"))
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Query(filter): Query<SessionFilter>,
) -> ApiResult {
    let sessions = state
        .market
        .list_sessions_for_user(&actor, filter.status)
        .await?;
    success_with("sessions", sessions)
}

/// GET /sessions/{session_id} - One session
#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    params(("session_id" = String, Path, description = "The session's id")),
    responses(
        (status = 200, description = "The session"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "No such session")
    )
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let session = state.market.get_session(&actor, &session_id).await?;
    success_with("session", session)
}

//=========================================================================================
// Lifecycle
//=========================================================================================

/// POST /sessions/{session_id}/status - Move a session to a new status
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/status",
    params(("session_id" = String, Path, description = "The session's id")),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "The updated session; partialError when a side effect failed"),
        (status = 403, description = "The caller may not make this change"),
        (status = 409, description = "The session cannot move to that status")
    )
)]
pub async fn update_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> ApiResult {
    let result = state
        .market
        .update_session_status(&actor, &session_id, req.status)
        .await?;
    applied("session", result)
}

/// POST /sessions/{session_id}/cancel - Student cancels before the cutoff
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/cancel",
    params(("session_id" = String, Path, description = "The session's id")),
    responses(
        (status = 200, description = "The cancelled session; partialError when slots or refund failed"),
        (status = 409, description = "Too close to the start, or already cancelled")
    )
)]
pub async fn cancel_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let result = state.market.cancel_session(&actor, &session_id).await?;
    applied("session", result)
}

/// POST /sessions/{session_id}/confirm - Tutor accepts a pending request
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/confirm",
    params(("session_id" = String, Path, description = "The session's id")),
    responses(
        (status = 200, description = "The confirmed session; partialError when the chat could not be opened"),
        (status = 409, description = "The session is not pending")
    )
)]
pub async fn confirm_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let result = state.market.confirm_session(&actor, &session_id).await?;
    applied("session", result)
}

/// POST /sessions/{session_id}/decline - Tutor turns down a request
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/decline",
    params(("session_id" = String, Path, description = "The session's id")),
    responses(
        (status = 200, description = "The cancelled session; partialError when slots or refund failed"),
        (status = 409, description = "The session can no longer be declined")
    )
)]
pub async fn decline_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let result = state.market.decline_session(&actor, &session_id).await?;
    applied("session", result)
}

/// POST /sessions/{session_id}/reschedule - Tutor proposes a new time
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/reschedule",
    params(("session_id" = String, Path, description = "The session's id")),
    request_body = RescheduleRequest,
    responses(
        (status = 200, description = "The rescheduled session"),
        (status = 400, description = "Invalid or past date/time"),
        (status = 409, description = "The session cannot be rescheduled")
    )
)]
pub async fn reschedule_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> ApiResult {
    let new_time = Reschedule {
        date: parse_date(&req.date)?,
        start_time: parse_time(&req.start_time)?,
        end_time: parse_time(&req.end_time)?,
    };
    let result = state
        .market
        .reschedule_session(&actor, &session_id, new_time)
        .await?;
    applied("session", result)
}

/// POST /sessions/{session_id}/reschedule/accept - Student accepts the new time
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/reschedule/accept",
    params(("session_id" = String, Path, description = "The session's id")),
    responses(
        (status = 200, description = "The confirmed session"),
        (status = 409, description = "No pending reschedule")
    )
)]
pub async fn accept_reschedule_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let result = state.market.accept_reschedule(&actor, &session_id).await?;
    applied("session", result)
}

/// POST /sessions/{session_id}/reschedule/decline - Student declines the new time
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/reschedule/decline",
    params(("session_id" = String, Path, description = "The session's id")),
    responses(
        (status = 200, description = "The cancelled session; partialError when slots or refund failed"),
        (status = 409, description = "No pending reschedule")
    )
)]
pub async fn decline_reschedule_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let result = state.market.decline_reschedule(&actor, &session_id).await?;
    applied("session", result)
}

/// POST /sessions/{session_id}/complete - Student marks the session done and pays out
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/complete",
    params(("session_id" = String, Path, description = "The session's id")),
    responses(
        (status = 200, description = "The completed session; partialError when the payout failed"),
        (status = 409, description = "Only confirmed sessions can be completed")
    )
)]
pub async fn complete_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let result = state
        .market
        .complete_session_and_release_payment(&actor, &session_id)
        .await?;
    applied("session", result)
}

//=========================================================================================
// Reviews and Issues
//=========================================================================================

/// POST /sessions/{session_id}/issues - Report a problem with a session
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/issues",
    params(("session_id" = String, Path, description = "The session's id")),
    request_body = IssueRequest,
    responses(
        (status = 201, description = "The report"),
        (status = 403, description = "Not a participant")
    )
)]
pub async fn report_issue_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(session_id): Path<String>,
    Json(req): Json<IssueRequest>,
) -> Result<impl IntoResponse, Failure> {
    let issue = state
        .market
        .report_issue(&actor, &session_id, &req.description)
        .await?;
    Ok((StatusCode::CREATED, success_with("issue", issue)?))
}

/// POST /reviews - Review the tutor of a completed session
#[utoipa::path(
    post,
    path = "/reviews",
    request_body = ReviewBody,
    responses(
        (status = 201, description = "The review; partialError when the rating was not updated"),
        (status = 400, description = "Rating out of range"),
        (status = 409, description = "Already reviewed, or the session is not completed")
    )
)]
pub async fn submit_review_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Json(req): Json<ReviewBody>,
) -> Result<impl IntoResponse, Failure> {
    let result = state
        .market
        .submit_review(
            &actor,
            ReviewRequest {
                session_id: req.session_id,
                tutor_id: req.tutor_id,
                rating: req.rating,
                comment: req.comment,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, applied("review", result)?))
}
