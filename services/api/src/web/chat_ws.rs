//! services/api/src/web/chat_ws.rs
//!
//! The live chat connection. On connect the server streams the chat's full
//! message list, then sends it again after every change. Client frames are
//! applied through the same marketplace operations the REST routes use.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tutoring_core::{Marketplace, ServiceResult, UserIdentity};

use crate::web::protocol::{ClientMessage, ServerMessage};
use crate::web::rest::Failure;
use crate::web::state::AppState;

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to chat WebSocket connections.
///
/// Participation is checked before the upgrade so a stranger gets a plain
/// HTTP error instead of an open socket.
pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(actor): Extension<UserIdentity>,
    Path(chat_id): Path<String>,
) -> Response {
    if let Err(e) = app_state.market.get_chat(&actor, &chat_id).await {
        return Failure::from(e).into_response();
    }
    let market = app_state.market.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, market, actor, chat_id))
}

async fn send_frame(sender: &Sender, frame: &ServerMessage) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {:?}", e);
            return false;
        }
    };
    sender.lock().await.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, market: Marketplace, actor: UserIdentity, chat_id: String) {
    info!(uid = %actor.uid, chat_id = %chat_id, "chat connection opened");

    // The sender is shared between the snapshot task and the receive loop.
    let (sender, mut receiver) = socket.split();
    let ws_sender: Sender = Arc::new(Mutex::new(sender));

    let mut snapshots = match market.subscribe_messages(&actor, &chat_id).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to subscribe to chat {}: {:?}", chat_id, e);
            let frame = ServerMessage::Error {
                message: "Failed to load the chat.".to_string(),
            };
            send_frame(&ws_sender, &frame).await;
            return;
        }
    };

    // --- 1. Forward message snapshots until the client leaves ---
    let token = CancellationToken::new();
    let push_token = token.clone();
    let push_sender = ws_sender.clone();
    let push_chat_id = chat_id.clone();
    let push_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = push_token.cancelled() => break,
                next = snapshots.next() => {
                    let frame = match next {
                        Some(Ok(messages)) => ServerMessage::Messages { messages },
                        Some(Err(e)) => {
                            error!("Chat {} subscription failed: {:?}", push_chat_id, e);
                            let frame = ServerMessage::Error {
                                message: "Live updates stopped, please reconnect.".to_string(),
                            };
                            send_frame(&push_sender, &frame).await;
                            break;
                        }
                        None => break,
                    };
                    if !send_frame(&push_sender, &frame).await {
                        break;
                    }
                }
            }
        }
    });

    // --- 2. Apply client frames ---
    while let Some(incoming) = receiver.next().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Chat connection error: {:?}", e);
                break;
            }
        };
        let outcome = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(command) => apply(&market, &actor, &chat_id, command).await,
            Err(e) => {
                warn!("Unreadable chat frame: {}", e);
                let frame = ServerMessage::Error {
                    message: "Unrecognized message.".to_string(),
                };
                send_frame(&ws_sender, &frame).await;
                continue;
            }
        };
        if let Err(e) = outcome {
            let frame = ServerMessage::Error {
                message: Failure::from(e).message,
            };
            if !send_frame(&ws_sender, &frame).await {
                break;
            }
        }
    }

    // --- 3. Tear down: dropping the stream ends the subscription ---
    token.cancel();
    if let Err(e) = push_task.await {
        error!("Chat snapshot task panicked: {:?}", e);
    }
    if let Err(e) = market.set_typing(&actor, &chat_id, false).await {
        warn!("Failed to clear typing indicator: {}", e);
    }
    info!(uid = %actor.uid, chat_id = %chat_id, "chat connection closed");
}

async fn apply(
    market: &Marketplace,
    actor: &UserIdentity,
    chat_id: &str,
    command: ClientMessage,
) -> ServiceResult<()> {
    match command {
        ClientMessage::Send { content } => {
            market.send_message(actor, chat_id, &content).await?;
        }
        ClientMessage::Typing { typing } => {
            market.set_typing(actor, chat_id, typing).await?;
        }
        ClientMessage::MarkRead { other_user_id } => {
            market
                .mark_messages_as_read(actor, chat_id, &other_user_id)
                .await?;
        }
    }
    Ok(())
}
