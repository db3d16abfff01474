//! services/api/src/web/rest.rs
//!
//! The response envelope shared by every REST handler and the master
//! definition for the OpenAPI specification.
//!
//! Every response body is `{ "success": true, ...data }` or
//! `{ "success": false, "error": "..." }`. An operation whose primary change
//! went through but left a side effect undone answers `success: true` with a
//! `partialError` message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::error;
use tutoring_core::{Applied, AuthError, ErrorKind, ServiceError};
use utoipa::OpenApi;

use crate::web::{admin, auth, availability, chats, profiles, sessions};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::password_reset_handler,
        profiles::get_me_handler,
        profiles::update_me_handler,
        profiles::upload_photo_handler,
        profiles::get_user_handler,
        profiles::browse_tutors_handler,
        profiles::list_tutor_reviews_handler,
        profiles::list_notifications_handler,
        profiles::mark_notification_read_handler,
        availability::list_availability_handler,
        availability::add_slots_handler,
        availability::remove_slot_handler,
        sessions::book_session_handler,
        sessions::list_sessions_handler,
        sessions::get_session_handler,
        sessions::update_status_handler,
        sessions::cancel_session_handler,
        sessions::confirm_session_handler,
        sessions::decline_session_handler,
        sessions::reschedule_session_handler,
        sessions::accept_reschedule_handler,
        sessions::decline_reschedule_handler,
        sessions::complete_session_handler,
        sessions::report_issue_handler,
        sessions::submit_review_handler,
        chats::list_chats_handler,
        chats::get_chat_handler,
        chats::list_messages_handler,
        chats::send_message_handler,
        chats::mark_read_handler,
        chats::typing_handler,
        chats::end_chat_handler,
        chats::delete_chat_handler,
        admin::list_subjects_handler,
        admin::add_subject_handler,
        admin::submit_application_handler,
        admin::list_applications_handler,
        admin::review_application_handler,
        admin::list_issues_handler,
        admin::resolve_issue_handler,
    ),
    components(
        schemas(
            auth::SignupRequest,
            auth::LoginRequest,
            auth::PasswordResetRequest,
            profiles::UpdateProfileRequest,
            availability::SlotRangeRequest,
            sessions::BookSessionRequest,
            sessions::StatusRequest,
            sessions::RescheduleRequest,
            sessions::IssueRequest,
            sessions::ReviewBody,
            chats::SendMessageRequest,
            chats::MarkReadRequest,
            chats::TypingRequest,
            admin::SubjectRequest,
            admin::ReviewApplicationRequest,
        )
    ),
    tags(
        (name = "Tutoring Marketplace API", description = "Booking, session and chat endpoints for the peer-tutoring marketplace.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Envelope
//=========================================================================================

/// A failed request, rendered as `{ "success": false, "error": ... }`.
#[derive(Debug)]
pub struct Failure {
    pub status: StatusCode,
    pub message: String,
}

impl Failure {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Sign in to continue")
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let body = json!({ "success": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ServiceError> for Failure {
    fn from(e: ServiceError) -> Self {
        let status = status_for(e.kind());
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Store details stay in the log; callers get a generic message.
            error!("Marketplace operation failed: {:?}", e);
            return Self::new(status, "Something went wrong, please try again");
        }
        Self::new(status, e.to_string())
    }
}

impl From<AuthError> for Failure {
    fn from(e: AuthError) -> Self {
        let status = match e {
            AuthError::InvalidEmail | AuthError::WeakPassword => StatusCode::BAD_REQUEST,
            AuthError::EmailAlreadyInUse => StatusCode::CONFLICT,
            AuthError::UserNotFound | AuthError::WrongPassword | AuthError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::Internal(ref detail) => {
                error!("Auth provider failed: {}", detail);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.code())
    }
}

pub type ApiResult = Result<Json<Value>, Failure>;

/// `{ "success": true }` merged with the object `fields`.
pub fn success(fields: Value) -> Json<Value> {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(fields) = fields {
        body.extend(fields);
    }
    Json(Value::Object(body))
}

/// `{ "success": true, key: value }`.
pub fn success_with(key: &str, value: impl Serialize) -> ApiResult {
    let value = serde_json::to_value(value).map_err(|e| {
        error!("Failed to serialize response: {:?}", e);
        Failure::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response")
    })?;
    let mut fields = Map::new();
    fields.insert(key.to_string(), value);
    Ok(success(Value::Object(fields)))
}

/// Like [`success_with`], adding `partialError` when a side effect failed.
pub fn applied(key: &str, result: Applied<impl Serialize>) -> ApiResult {
    let partial = result.partial_error();
    let Json(mut body) = success_with(key, result.value)?;
    if let (Some(message), Value::Object(map)) = (partial, &mut body) {
        map.insert("partialError".to_string(), Value::String(message));
    }
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tutoring_core::PortError;

    async fn render(failure: Failure) -> (StatusCode, Value) {
        let response = failure.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn success_flattens_fields_next_to_the_flag() {
        let Json(body) = success(json!({"sessionId": "s1", "hours": 2}));
        assert_eq!(body, json!({"success": true, "sessionId": "s1", "hours": 2}));
    }

    #[test]
    fn partial_failures_still_succeed() {
        let clean = applied("session", Applied::clean(json!({"id": "s1"}))).unwrap().0;
        assert_eq!(clean, json!({"success": true, "session": {"id": "s1"}}));

        let partial = Applied {
            value: json!({"id": "s1"}),
            follow_ups: vec!["the refund failed".to_string()],
        };
        let body = applied("session", partial).unwrap().0;
        assert_eq!(body["success"], true);
        assert_eq!(body["partialError"], "Partial error: the refund failed");
    }

    #[tokio::test]
    async fn service_errors_map_to_statuses_and_the_failure_shape() {
        let (status, body) =
            render(ServiceError::Conflict("This slot is not available".to_string()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({"success": false, "error": "This slot is not available"}));

        let (status, _) = render(ServiceError::Validation("bad".to_string()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = render(ServiceError::Unauthorized("no".to_string()).into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = render(ServiceError::NotFound("gone".to_string()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_errors_are_not_leaked() {
        let e = ServiceError::Store(PortError::Unexpected("password=hunter2".to_string()));
        let (status, body) = render(e.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["error"].as_str().unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn auth_errors_surface_their_code() {
        let (status, body) = render(AuthError::EmailAlreadyInUse.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "auth/email-already-in-use");

        let (status, body) = render(AuthError::WrongPassword.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "auth/wrong-password");
    }
}
