//! services/api/src/web/admin.rs
//!
//! Subjects, tutor applications and reported issues. Anyone may read the
//! subject list and a signed-in student may apply to tutor; everything under
//! `/admin` is for administrators.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tutoring_core::{ApplicationRequest, Decision, UserIdentity};
use utoipa::ToSchema;

use crate::web::rest::{applied, success_with, ApiResult, Failure};
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct SubjectRequest {
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ReviewApplicationRequest {
    /// `approve` or `reject`
    pub decision: String,
    pub note: Option<String>,
}

fn parse_decision(raw: &str) -> Result<Decision, Failure> {
    match raw.trim().to_lowercase().as_str() {
        "approve" => Ok(Decision::Approve),
        "reject" => Ok(Decision::Reject),
        other => Err(Failure::bad_request(format!(
            "Unknown decision '{}', expected approve or reject",
            other
        ))),
    }
}

//=========================================================================================
// Subjects
//=========================================================================================

/// GET /subjects - Every subject, alphabetically
#[utoipa::path(
    get,
    path = "/subjects",
    responses((status = 200, description = "Subjects"))
)]
pub async fn list_subjects_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let subjects = state.market.list_subjects().await?;
    success_with("subjects", subjects)
}

/// POST /admin/subjects - Add a subject
#[utoipa::path(
    post,
    path = "/admin/subjects",
    request_body = SubjectRequest,
    responses(
        (status = 201, description = "The new subject"),
        (status = 403, description = "Administrators only"),
        (status = 409, description = "The subject already exists")
    )
)]
pub async fn add_subject_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Json(req): Json<SubjectRequest>,
) -> Result<impl IntoResponse, Failure> {
    let subject = state.market.add_subject(&actor, &req.name).await?;
    Ok((StatusCode::CREATED, success_with("subject", subject)?))
}

//=========================================================================================
// Tutor Applications
//=========================================================================================

/// POST /applications - Apply to become a tutor
///
/// Multipart form with text parts `subjects` (comma separated), `hourlyRate`,
/// optional `bio`, and the exam results as a PDF file part named `examResult`.
#[utoipa::path(
    post,
    path = "/applications",
    request_body(content_type = "multipart/form-data", description = "Application fields and the exam-result PDF."),
    responses(
        (status = 201, description = "The pending application"),
        (status = 400, description = "Missing field or not a PDF"),
        (status = 409, description = "Not a student, or an application is already pending")
    )
)]
pub async fn submit_application_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Failure> {
    let mut subjects = Vec::new();
    let mut hourly_rate = None;
    let mut bio = None;
    let mut exam_result_pdf = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Failure::bad_request(format!("Failed to read multipart data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "examResult" => {
                let bytes = field.bytes().await.map_err(|e| {
                    Failure::bad_request(format!("Failed to read file bytes: {}", e))
                })?;
                exam_result_pdf = Some(bytes.to_vec());
            }
            "subjects" | "hourlyRate" | "bio" => {
                let text = field.text().await.map_err(|e| {
                    Failure::bad_request(format!("Failed to read field {}: {}", name, e))
                })?;
                match name.as_str() {
                    "subjects" => subjects = text.split(',').map(str::to_string).collect(),
                    "hourlyRate" => {
                        hourly_rate = Some(text.trim().parse::<f64>().map_err(|_| {
                            Failure::bad_request("hourlyRate must be a number")
                        })?)
                    }
                    _ => bio = Some(text),
                }
            }
            _ => {}
        }
    }

    let request = ApplicationRequest {
        subjects,
        hourly_rate: hourly_rate.ok_or_else(|| Failure::bad_request("hourlyRate is required"))?,
        bio,
        exam_result_pdf: exam_result_pdf
            .ok_or_else(|| Failure::bad_request("The exam result PDF is required"))?,
    };
    let application = state.market.submit_tutor_application(&actor, request).await?;
    Ok((StatusCode::CREATED, success_with("application", application)?))
}

/// GET /admin/applications - Pending applications, oldest first
#[utoipa::path(
    get,
    path = "/admin/applications",
    responses(
        (status = 200, description = "Pending applications"),
        (status = 403, description = "Administrators only")
    )
)]
pub async fn list_applications_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
) -> ApiResult {
    let applications = state.market.list_pending_applications(&actor).await?;
    success_with("applications", applications)
}

/// POST /admin/applications/{application_id}/review - Approve or reject an application
#[utoipa::path(
    post,
    path = "/admin/applications/{application_id}/review",
    params(("application_id" = String, Path, description = "The application's id")),
    request_body = ReviewApplicationRequest,
    responses(
        (status = 200, description = "The decided application; partialError when the promotion failed"),
        (status = 403, description = "Administrators only"),
        (status = 409, description = "Already reviewed")
    )
)]
pub async fn review_application_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(application_id): Path<String>,
    Json(req): Json<ReviewApplicationRequest>,
) -> ApiResult {
    let decision = parse_decision(&req.decision)?;
    let result = state
        .market
        .review_tutor_application(&actor, &application_id, decision, req.note)
        .await?;
    applied("application", result)
}

//=========================================================================================
// Reported Issues
//=========================================================================================

/// GET /admin/issues - Open issue reports, oldest first
#[utoipa::path(
    get,
    path = "/admin/issues",
    responses(
        (status = 200, description = "Open reports"),
        (status = 403, description = "Administrators only")
    )
)]
pub async fn list_issues_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
) -> ApiResult {
    let issues = state.market.list_open_issues(&actor).await?;
    success_with("issues", issues)
}

/// POST /admin/issues/{issue_id}/resolve - Close an issue report
#[utoipa::path(
    post,
    path = "/admin/issues/{issue_id}/resolve",
    params(("issue_id" = String, Path, description = "The report's id")),
    responses(
        (status = 200, description = "The resolved report"),
        (status = 403, description = "Administrators only"),
        (status = 404, description = "No such report")
    )
)]
pub async fn resolve_issue_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(issue_id): Path<String>,
) -> ApiResult {
    let issue = state.market.resolve_issue(&actor, &issue_id).await?;
    success_with("issue", issue)
}
