//! services/api/src/web/profiles.rs
//!
//! Profile, tutor directory and notification endpoints.

use axum::{
    extract::{Multipart, Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tutoring_core::{ProfileUpdate, TutorFilter, UserIdentity};
use utoipa::{IntoParams, ToSchema};

use crate::web::rest::{success_with, ApiResult, Failure};
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub subjects: Option<Vec<String>>,
    pub hourly_rate: Option<f64>,
}

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TutorSearch {
    pub subject: Option<String>,
    pub max_hourly_rate: Option<f64>,
    pub min_rating: Option<f64>,
}

/// GET /me - The caller's profile
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "The caller's profile"))
)]
pub async fn get_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
) -> ApiResult {
    let profile = state.market.get_profile(&actor.uid).await?;
    success_with("profile", profile)
}

/// PATCH /me - Update the caller's profile
#[utoipa::path(
    patch,
    path = "/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile"),
        (status = 400, description = "Invalid field"),
        (status = 403, description = "Tutor-only field changed by a non-tutor")
    )
)]
pub async fn update_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult {
    let update = ProfileUpdate {
        name: req.name,
        phone_number: req.phone_number,
        bio: req.bio,
        subjects: req.subjects,
        hourly_rate: req.hourly_rate,
    };
    let profile = state.market.update_profile(&actor, update).await?;
    success_with("profile", profile)
}

/// POST /me/photo - Upload a new profile picture
///
/// Accepts a multipart/form-data request with a single file part.
#[utoipa::path(
    post,
    path = "/me/photo",
    request_body(content_type = "multipart/form-data", description = "The image to upload."),
    responses(
        (status = 200, description = "Profile with the new photo URL"),
        (status = 400, description = "Missing or empty file")
    )
)]
pub async fn upload_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    mut multipart: Multipart,
) -> ApiResult {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| Failure::bad_request(format!("Failed to read multipart data: {}", e)))?
        .ok_or_else(|| Failure::bad_request("Multipart form must include a file"))?;
    let file_name = field.file_name().unwrap_or("photo").to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| Failure::bad_request(format!("Failed to read file bytes: {}", e)))?;

    let profile = state
        .market
        .set_profile_photo(&actor, &file_name, &bytes)
        .await?;
    success_with("profile", profile)
}

/// GET /users/{uid} - Someone's public profile
#[utoipa::path(
    get,
    path = "/users/{uid}",
    params(("uid" = String, Path, description = "The user's id")),
    responses(
        (status = 200, description = "The profile"),
        (status = 404, description = "No such user")
    )
)]
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> ApiResult {
    let profile = state.market.get_profile(&uid).await?;
    success_with("profile", profile)
}

/// GET /tutors - Browse tutors, best rated first
#[utoipa::path(
    get,
    path = "/tutors",
    params(TutorSearch),
    responses((status = 200, description = "Matching tutors"))
)]
pub async fn browse_tutors_handler(
    State(state): State<Arc<AppState>>,
    Query(search): Query<TutorSearch>,
) -> ApiResult {
    let tutors = state
        .market
        .browse_tutors(TutorFilter {
            subject: search.subject,
            max_hourly_rate: search.max_hourly_rate,
            min_rating: search.min_rating,
        })
        .await?;
    success_with("tutors", tutors)
}

/// GET /tutors/{tutor_id}/reviews - A tutor's reviews, newest first
#[utoipa::path(
    get,
    path = "/tutors/{tutor_id}/reviews",
    params(("tutor_id" = String, Path, description = "The tutor's id")),
    responses((status = 200, description = "Reviews"))
)]
pub async fn list_tutor_reviews_handler(
    State(state): State<Arc<AppState>>,
    Path(tutor_id): Path<String>,
) -> ApiResult {
    let reviews = state.market.list_reviews_for_tutor(&tutor_id).await?;
    success_with("reviews", reviews)
}

/// GET /notifications - The caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/notifications",
    responses((status = 200, description = "Notifications"))
)]
pub async fn list_notifications_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
) -> ApiResult {
    let notifications = state.market.list_notifications(&actor).await?;
    success_with("notifications", notifications)
}

/// POST /notifications/{notification_id}/read - Mark a notification read
#[utoipa::path(
    post,
    path = "/notifications/{notification_id}/read",
    params(("notification_id" = String, Path, description = "The notification's id")),
    responses(
        (status = 200, description = "Marked read"),
        (status = 403, description = "Not the caller's notification")
    )
)]
pub async fn mark_notification_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(notification_id): Path<String>,
) -> ApiResult {
    state
        .market
        .mark_notification_read(&actor, &notification_id)
        .await?;
    success_with("notificationId", notification_id)
}
