//! services/api/src/web/chats.rs
//!
//! REST endpoints for session chats. Live updates go over the WebSocket in
//! `chat_ws`; these cover everything a client does outside of it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tutoring_core::UserIdentity;
use utoipa::ToSchema;

use crate::web::rest::{success, success_with, ApiResult, Failure};
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    /// The participant whose messages were read
    pub other_user_id: String,
}

#[derive(Deserialize, ToSchema)]
pub struct TypingRequest {
    pub typing: bool,
}

/// GET /chats - The caller's chats, most recent activity first
#[utoipa::path(
    get,
    path = "/chats",
    responses((status = 200, description = "Chats the caller has not deleted"))
)]
pub async fn list_chats_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
) -> ApiResult {
    let chats = state.market.list_chats(&actor).await?;
    success_with("chats", chats)
}

/// GET /chats/{chat_id} - One chat
#[utoipa::path(
    get,
    path = "/chats/{chat_id}",
    params(("chat_id" = String, Path, description = "The chat's id")),
    responses(
        (status = 200, description = "The chat"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "No such chat")
    )
)]
pub async fn get_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
) -> ApiResult {
    let chat = state.market.get_chat(&actor, &chat_id).await?;
    success_with("chat", chat)
}

/// GET /chats/{chat_id}/messages - Messages, oldest first
#[utoipa::path(
    get,
    path = "/chats/{chat_id}/messages",
    params(("chat_id" = String, Path, description = "The chat's id")),
    responses((status = 200, description = "Messages"))
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
) -> ApiResult {
    let messages = state.market.list_messages(&actor, &chat_id).await?;
    success_with("messages", messages)
}

/// POST /chats/{chat_id}/messages - Send a message
#[utoipa::path(
    post,
    path = "/chats/{chat_id}/messages",
    params(("chat_id" = String, Path, description = "The chat's id")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "The stored message"),
        (status = 400, description = "Empty message"),
        (status = 409, description = "The chat has been ended")
    )
)]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, Failure> {
    let message = state
        .market
        .send_message(&actor, &chat_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, success_with("message", message)?))
}

/// POST /chats/{chat_id}/read - Mark the other participant's messages read
#[utoipa::path(
    post,
    path = "/chats/{chat_id}/read",
    params(("chat_id" = String, Path, description = "The chat's id")),
    request_body = MarkReadRequest,
    responses((status = 200, description = "How many messages were marked"))
)]
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult {
    let marked = state
        .market
        .mark_messages_as_read(&actor, &chat_id, &req.other_user_id)
        .await?;
    Ok(success(json!({ "marked": marked })))
}

/// POST /chats/{chat_id}/typing - Show or clear the caller's typing indicator
#[utoipa::path(
    post,
    path = "/chats/{chat_id}/typing",
    params(("chat_id" = String, Path, description = "The chat's id")),
    request_body = TypingRequest,
    responses((status = 200, description = "Indicator updated"))
)]
pub async fn typing_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
    Json(req): Json<TypingRequest>,
) -> ApiResult {
    state.market.set_typing(&actor, &chat_id, req.typing).await?;
    Ok(success(json!({ "typing": req.typing })))
}

/// POST /chats/{chat_id}/end - Tutor closes the chat
#[utoipa::path(
    post,
    path = "/chats/{chat_id}/end",
    params(("chat_id" = String, Path, description = "The chat's id")),
    responses(
        (status = 200, description = "The ended chat"),
        (status = 403, description = "Only the tutor can end a chat")
    )
)]
pub async fn end_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
) -> ApiResult {
    let chat = state.market.end_chat_session(&actor, &chat_id).await?;
    success_with("chat", chat)
}

/// DELETE /chats/{chat_id} - Hide the chat from the caller's list
#[utoipa::path(
    delete,
    path = "/chats/{chat_id}",
    params(("chat_id" = String, Path, description = "The chat's id")),
    responses(
        (status = 200, description = "Hidden for the caller only"),
        (status = 409, description = "A student can only delete an ended chat")
    )
)]
pub async fn delete_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
) -> ApiResult {
    state.market.delete_chat(&actor, &chat_id).await?;
    success_with("chatId", chat_id)
}
