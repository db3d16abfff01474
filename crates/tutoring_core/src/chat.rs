//! crates/tutoring_core/src/chat.rs
//!
//! One chat per confirmed session, keyed by the session id. Messages live in
//! the chat's `messages` sub-collection and are append-only apart from their
//! `read` flag.

use futures::{Stream, StreamExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::pin::Pin;
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::{collections, decode_all, encode, patch};
use crate::domain::{
    Chat, ChatParticipants, Message, SenderType, Session, SessionSnapshot, UserIdentity,
};
use crate::error::{ServiceError, ServiceResult};
use crate::marketplace::Marketplace;
use crate::ports::{Direction, PortError, Query};

/// A live query. Each item is the full current result set; dropping the
/// stream tears the subscription down.
pub type LiveStream<T> = Pin<Box<dyn Stream<Item = ServiceResult<Vec<T>>> + Send>>;

fn messages_query(chat_id: &str) -> Query {
    Query::collection(collections::messages(chat_id)).order_by("timestamp", Direction::Ascending)
}

fn chats_query(uid: &str) -> Query {
    Query::collection(collections::CHATS)
        .where_array_contains("participantIds", uid)
        .order_by("lastMessageTime", Direction::Descending)
}

impl Marketplace {
    async fn require_chat(&self, actor: &UserIdentity, chat_id: &str) -> ServiceResult<Chat> {
        if chat_id.trim().is_empty() {
            return Err(ServiceError::validation("Chat id is required"));
        }
        let chat: Chat = self.require(collections::CHATS, chat_id, "Chat").await?.value;
        if !chat.is_participant(&actor.uid) {
            return Err(ServiceError::unauthorized(
                "You are not a participant in this chat",
            ));
        }
        Ok(chat)
    }

    /// Opens the chat for `session`, or returns the one that already exists.
    ///
    /// Names and photos are copied from the current profiles, falling back to
    /// the names recorded on the session; they are not kept in sync later.
    pub async fn create_chat(&self, session: &Session) -> ServiceResult<Chat> {
        if let Some(existing) = self.load::<Chat>(collections::CHATS, &session.id).await? {
            return Ok(existing.value);
        }

        let student = self.find_profile(&session.student_id).await?;
        let tutor = self.find_profile(&session.tutor_id).await?;
        let chat = Chat {
            session_id: session.id.clone(),
            participants: ChatParticipants {
                student_id: session.student_id.clone(),
                tutor_id: session.tutor_id.clone(),
                student_name: student
                    .as_ref()
                    .map_or_else(|| session.student_name.clone(), |p| p.name.clone()),
                tutor_name: tutor
                    .as_ref()
                    .map_or_else(|| session.tutor_name.clone(), |p| p.name.clone()),
                student_photo: student.and_then(|p| p.photo_url),
                tutor_photo: tutor.and_then(|p| p.photo_url),
            },
            participant_ids: vec![session.student_id.clone(), session.tutor_id.clone()],
            session_details: SessionSnapshot {
                subject: session.subject.clone(),
                date: session.date,
                start_time: session.start_time,
                end_time: session.end_time,
            },
            ended: false,
            last_message: None,
            last_message_time: None,
            typing: BTreeMap::new(),
            deleted_by: BTreeMap::new(),
            created_at: self.clock.now(),
        };

        match self
            .store
            .create(collections::CHATS, &session.id, encode(&chat)?)
            .await
        {
            Ok(_) => {
                info!(chat_id = %session.id, "chat created");
                Ok(chat)
            }
            Err(PortError::AlreadyExists(_)) => Ok(self
                .require::<Chat>(collections::CHATS, &session.id, "Chat")
                .await?
                .value),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn send_message(
        &self,
        actor: &UserIdentity,
        chat_id: &str,
        content: &str,
    ) -> ServiceResult<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ServiceError::validation("Message cannot be empty"));
        }
        let chat = self.require_chat(actor, chat_id).await?;
        if chat.ended {
            return Err(ServiceError::conflict("This chat has been ended"));
        }

        let (sender_type, sender_name) = if chat.is_tutor(&actor.uid) {
            (SenderType::Tutor, chat.participants.tutor_name.clone())
        } else {
            (SenderType::Student, chat.participants.student_name.clone())
        };
        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: actor.uid.clone(),
            sender_type,
            sender_name,
            content: content.to_string(),
            timestamp: self.clock.now(),
            read: false,
        };
        self.store
            .create(&collections::messages(chat_id), &message.id, encode(&message)?)
            .await?;

        let typing_key = format!("typing.{}", actor.uid);
        self.store
            .update(
                collections::CHATS,
                chat_id,
                patch([
                    ("lastMessage", json!(message.content)),
                    ("lastMessageTime", json!(message.timestamp.timestamp_millis())),
                    (typing_key.as_str(), json!(false)),
                ]),
            )
            .await?;
        debug!(chat_id, sender = %actor.uid, "message sent");

        let mut data = BTreeMap::new();
        data.insert("chatId".to_string(), chat_id.to_string());
        let notification = self.notification(
            chat.other_participant(&actor.uid),
            "New message",
            format!("{}: {}", message.sender_name, message.content),
            data,
        );
        self.notify_quietly(notification).await;
        Ok(message)
    }

    /// Tutor closes the chat for good. Ending an ended chat is a no-op.
    pub async fn end_chat_session(&self, actor: &UserIdentity, chat_id: &str) -> ServiceResult<Chat> {
        let mut chat = self.require_chat(actor, chat_id).await?;
        if !chat.is_tutor(&actor.uid) {
            return Err(ServiceError::unauthorized("Only the tutor can end this chat"));
        }
        if chat.ended {
            return Ok(chat);
        }
        self.store
            .update(collections::CHATS, chat_id, patch([("ended", json!(true))]))
            .await?;
        chat.ended = true;
        info!(chat_id, "chat ended");

        let mut data = BTreeMap::new();
        data.insert("chatId".to_string(), chat_id.to_string());
        let notification = self.notification(
            &chat.participants.student_id,
            "Chat ended",
            format!("{} ended the chat", chat.participants.tutor_name),
            data,
        );
        self.notify_quietly(notification).await;
        Ok(chat)
    }

    /// Hides the chat for the caller only. Students must wait until the tutor
    /// has ended it.
    pub async fn delete_chat(&self, actor: &UserIdentity, chat_id: &str) -> ServiceResult<()> {
        let chat = self.require_chat(actor, chat_id).await?;
        if !chat.is_tutor(&actor.uid) && !chat.ended {
            return Err(ServiceError::conflict(
                "You can only delete this chat after the tutor has ended it",
            ));
        }
        let key = format!("deletedBy.{}", actor.uid);
        self.store
            .update(collections::CHATS, chat_id, patch([(key.as_str(), json!(true))]))
            .await?;
        info!(chat_id, by = %actor.uid, "chat hidden");
        Ok(())
    }

    /// Marks every unread message from `other_user_id` as read. Returns how
    /// many changed.
    pub async fn mark_messages_as_read(
        &self,
        actor: &UserIdentity,
        chat_id: &str,
        other_user_id: &str,
    ) -> ServiceResult<usize> {
        self.require_chat(actor, chat_id).await?;
        let collection = collections::messages(chat_id);
        let unread = self
            .store
            .query(
                &Query::collection(collection.as_str())
                    .where_eq("senderId", other_user_id)
                    .where_eq("read", false),
            )
            .await?;
        let count = unread.len();
        for doc in unread {
            self.store
                .update(&collection, &doc.id, patch([("read", json!(true))]))
                .await?;
        }
        Ok(count)
    }

    pub async fn set_typing(
        &self,
        actor: &UserIdentity,
        chat_id: &str,
        typing: bool,
    ) -> ServiceResult<()> {
        let chat = self.require_chat(actor, chat_id).await?;
        if chat.ended {
            return Ok(());
        }
        let key = format!("typing.{}", actor.uid);
        self.store
            .update(collections::CHATS, chat_id, patch([(key.as_str(), json!(typing))]))
            .await?;
        Ok(())
    }

    pub async fn get_chat(&self, actor: &UserIdentity, chat_id: &str) -> ServiceResult<Chat> {
        self.require_chat(actor, chat_id).await
    }

    /// The caller's chats, most recent activity first, without the ones they hid.
    pub async fn list_chats(&self, actor: &UserIdentity) -> ServiceResult<Vec<Chat>> {
        let docs = self.store.query(&chats_query(&actor.uid)).await?;
        let chats: Vec<Chat> = decode_all(docs)?;
        Ok(chats
            .into_iter()
            .filter(|c| !c.is_deleted_for(&actor.uid))
            .collect())
    }

    pub async fn list_messages(
        &self,
        actor: &UserIdentity,
        chat_id: &str,
    ) -> ServiceResult<Vec<Message>> {
        self.require_chat(actor, chat_id).await?;
        let docs = self.store.query(&messages_query(chat_id)).await?;
        decode_all(docs)
    }

    pub async fn subscribe_messages(
        &self,
        actor: &UserIdentity,
        chat_id: &str,
    ) -> ServiceResult<LiveStream<Message>> {
        self.require_chat(actor, chat_id).await?;
        let snapshots = self.store.subscribe(messages_query(chat_id)).await?;
        Ok(Box::pin(snapshots.map(
            |snapshot| -> ServiceResult<Vec<Message>> { decode_all(snapshot?) },
        )))
    }

    pub async fn subscribe_chats(&self, actor: &UserIdentity) -> ServiceResult<LiveStream<Chat>> {
        let uid = actor.uid.clone();
        let snapshots = self.store.subscribe(chats_query(&uid)).await?;
        Ok(Box::pin(snapshots.map(move |snapshot| -> ServiceResult<Vec<Chat>> {
            let chats: Vec<Chat> = decode_all(snapshot?)?;
            Ok(chats.into_iter().filter(|c| !c.is_deleted_for(&uid)).collect())
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    async fn open_chat(fx: &Fixture) -> Chat {
        let session = fx.confirmed_session("2024-06-01", "14:00", "15:00").await;
        fx.market.get_chat(&fx.student(), &session.id).await.unwrap()
    }

    #[tokio::test]
    async fn creating_twice_returns_the_same_chat() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let session = fx.confirmed_session("2024-06-01", "14:00", "15:00").await;
        let again = fx.market.create_chat(&session).await.unwrap();
        assert_eq!(again.session_id, session.id);
        assert_eq!(fx.store.count(collections::CHATS), 1);
    }

    #[tokio::test]
    async fn messages_update_the_chat_and_notify_the_other_side() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let chat = open_chat(&fx).await;

        let sent = fx
            .market
            .send_message(&fx.student(), &chat.session_id, "  hello there ")
            .await
            .unwrap();
        assert_eq!(sent.content, "hello there");
        assert_eq!(sent.sender_type, SenderType::Student);
        assert!(!sent.read);

        let chat = fx.market.get_chat(&fx.tutor(), &chat.session_id).await.unwrap();
        assert_eq!(chat.last_message.as_deref(), Some("hello there"));
        assert!(chat.last_message_time.is_some());
        assert_eq!(chat.typing.get("student-1"), Some(&false));

        let last = fx.notifier.sent().pop().unwrap();
        assert_eq!(last.user_id, "tutor-1");
        assert_eq!(last.data.get("chatId"), Some(&chat.session_id));
    }

    #[tokio::test]
    async fn ended_chat_refuses_messages_and_lets_the_student_hide_it() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let chat = open_chat(&fx).await;
        let id = chat.session_id.as_str();

        let early = fx.market.delete_chat(&fx.student(), id).await.unwrap_err();
        assert!(matches!(early, ServiceError::Conflict(_)));
        let student_end = fx.market.end_chat_session(&fx.student(), id).await.unwrap_err();
        assert!(matches!(student_end, ServiceError::Unauthorized(_)));

        fx.market.end_chat_session(&fx.tutor(), id).await.unwrap();
        let err = fx
            .market
            .send_message(&fx.student(), id, "still there?")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(ref m) if m.contains("chat has been ended")));

        fx.market.delete_chat(&fx.student(), id).await.unwrap();
        assert!(fx.market.list_chats(&fx.student()).await.unwrap().is_empty());
        let tutor_view = fx.market.list_chats(&fx.tutor()).await.unwrap();
        assert_eq!(tutor_view.len(), 1);
        assert!(!tutor_view[0].is_deleted_for("tutor-1"));
    }

    #[tokio::test]
    async fn tutor_may_hide_an_open_chat() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let chat = open_chat(&fx).await;
        fx.market.delete_chat(&fx.tutor(), &chat.session_id).await.unwrap();
        assert!(fx.market.list_chats(&fx.tutor()).await.unwrap().is_empty());
        assert_eq!(fx.market.list_chats(&fx.student()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn marking_read_only_touches_the_other_users_messages() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let chat = open_chat(&fx).await;
        let id = chat.session_id.as_str();
        fx.market.send_message(&fx.tutor(), id, "one").await.unwrap();
        fx.market.send_message(&fx.tutor(), id, "two").await.unwrap();
        fx.market.send_message(&fx.student(), id, "mine").await.unwrap();

        let marked = fx
            .market
            .mark_messages_as_read(&fx.student(), id, "tutor-1")
            .await
            .unwrap();
        assert_eq!(marked, 2);

        let messages = fx.market.list_messages(&fx.student(), id).await.unwrap();
        let flags: Vec<_> = messages.iter().map(|m| (m.content.as_str(), m.read)).collect();
        assert_eq!(flags, vec![("one", true), ("two", true), ("mine", false)]);
        assert_eq!(
            fx.market
                .mark_messages_as_read(&fx.student(), id, "tutor-1")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn outsiders_cannot_read_or_write() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let chat = open_chat(&fx).await;
        fx.seed_student("student-2", "Eve").await;
        let eve = fx.identity("student-2");

        assert!(matches!(
            fx.market.list_messages(&eve, &chat.session_id).await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            fx.market.send_message(&eve, &chat.session_id, "hi").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            fx.market.get_chat(&eve, "no-such-chat").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn message_subscription_sees_new_messages() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let chat = open_chat(&fx).await;
        let mut live = fx
            .market
            .subscribe_messages(&fx.tutor(), &chat.session_id)
            .await
            .unwrap();
        assert!(live.next().await.unwrap().unwrap().is_empty());

        fx.market
            .send_message(&fx.student(), &chat.session_id, "ping")
            .await
            .unwrap();
        let snapshot = live.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "ping");
    }

    #[tokio::test]
    async fn typing_flag_is_per_participant() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let chat = open_chat(&fx).await;
        fx.market
            .set_typing(&fx.tutor(), &chat.session_id, true)
            .await
            .unwrap();
        let chat = fx.market.get_chat(&fx.student(), &chat.session_id).await.unwrap();
        assert_eq!(chat.typing.get("tutor-1"), Some(&true));
        assert_eq!(chat.typing.get("student-1"), None);
    }
}
