//! services/api/src/web/availability.rs
//!
//! Tutor availability endpoints. Tutors open and remove hourly slots on
//! their own calendar; anyone may read a tutor's calendar.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tutoring_core::schedule::{parse_date, parse_time};
use tutoring_core::UserIdentity;
use utoipa::{IntoParams, ToSchema};

use crate::web::rest::{success, success_with, ApiResult};
use crate::web::state::AppState;

/// A range of hourly slots on one day. Without `endTime` it is the single
/// hour starting at `startTime`.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlotRangeRequest {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DateRange {
    /// First day, `YYYY-MM-DD`
    pub start: String,
    /// Last day (inclusive), `YYYY-MM-DD`
    pub end: String,
}

/// GET /tutors/{tutor_id}/availability - A tutor's days within a date range
#[utoipa::path(
    get,
    path = "/tutors/{tutor_id}/availability",
    params(("tutor_id" = String, Path, description = "The tutor's id"), DateRange),
    responses(
        (status = 200, description = "Availability days in date order"),
        (status = 400, description = "Invalid date range")
    )
)]
pub async fn list_availability_handler(
    State(state): State<Arc<AppState>>,
    Path(tutor_id): Path<String>,
    Query(range): Query<DateRange>,
) -> ApiResult {
    let days = state
        .market
        .query_range(&tutor_id, parse_date(&range.start)?, parse_date(&range.end)?)
        .await?;
    success_with("days", days)
}

/// POST /availability - Open slots on the caller's calendar
#[utoipa::path(
    post,
    path = "/availability",
    request_body = SlotRangeRequest,
    responses(
        (status = 200, description = "The updated day"),
        (status = 400, description = "Invalid or past date/time"),
        (status = 409, description = "A slot in the range already exists")
    )
)]
pub async fn add_slots_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Json(req): Json<SlotRangeRequest>,
) -> ApiResult {
    let end_time = req.end_time.as_deref().map(parse_time).transpose()?;
    let day = state
        .market
        .add_slots(
            &actor,
            &actor.uid,
            parse_date(&req.date)?,
            parse_time(&req.start_time)?,
            end_time,
        )
        .await?;
    success_with("day", day)
}

/// DELETE /availability - Remove an open slot from the caller's calendar
#[utoipa::path(
    delete,
    path = "/availability",
    request_body = SlotRangeRequest,
    responses(
        (status = 200, description = "The remaining day, null when it became empty"),
        (status = 404, description = "No such slot"),
        (status = 409, description = "The slot is booked")
    )
)]
pub async fn remove_slot_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Json(req): Json<SlotRangeRequest>,
) -> ApiResult {
    let end_time = req.end_time.as_deref().map(parse_time).transpose()?;
    let day = state
        .market
        .remove_slot(
            &actor,
            &actor.uid,
            parse_date(&req.date)?,
            parse_time(&req.start_time)?,
            end_time,
        )
        .await?;
    Ok(success(json!({ "day": day })))
}
