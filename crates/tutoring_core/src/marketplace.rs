//! crates/tutoring_core/src/marketplace.rs
//!
//! The `Marketplace` facade. It owns handles to every port and exposes the
//! core operations; each operation family lives in its own module as an
//! `impl Marketplace` block.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::documents::{collections, decode, Versioned};
use crate::domain::{Notification, Session, UserIdentity, UserProfile};
use crate::error::{ServiceError, ServiceResult};
use crate::policy::BookingPolicy;
use crate::ports::{BlobStore, Clock, DocumentStore, NotificationSink, PaymentRail};

#[derive(Clone)]
pub struct Marketplace {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) payments: Arc<dyn PaymentRail>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) policy: BookingPolicy,
}

impl Marketplace {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn NotificationSink>,
        payments: Arc<dyn PaymentRail>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            notifier,
            payments,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    //=====================================================================================
    // Document helpers
    //=====================================================================================

    pub(crate) async fn load<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> ServiceResult<Option<Versioned<T>>> {
        match self.store.get(collection, id).await? {
            Some(doc) => decode(doc).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) async fn require<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        what: &str,
    ) -> ServiceResult<Versioned<T>> {
        self.load(collection, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("{} not found", what)))
    }

    pub(crate) async fn require_session(&self, session_id: &str) -> ServiceResult<Versioned<Session>> {
        if session_id.trim().is_empty() {
            return Err(ServiceError::validation("Session id is required"));
        }
        self.require(collections::SESSIONS, session_id, "Session").await
    }

    pub(crate) async fn find_profile(&self, uid: &str) -> ServiceResult<Option<UserProfile>> {
        Ok(self
            .load::<UserProfile>(collections::USERS, uid)
            .await?
            .map(|v| v.value))
    }

    /// Error for an optimistic write loop that kept losing races.
    pub(crate) fn race_lost(&self, what: &str) -> ServiceError {
        ServiceError::conflict(format!(
            "The {} changed while saving, please try again",
            what
        ))
    }

    //=====================================================================================
    // Authorization helpers
    //=====================================================================================

    pub(crate) fn require_participant(actor: &UserIdentity, session: &Session) -> ServiceResult<()> {
        if session.involves(&actor.uid) {
            Ok(())
        } else {
            Err(ServiceError::unauthorized(
                "You are not a participant in this session",
            ))
        }
    }

    pub(crate) fn require_session_tutor(actor: &UserIdentity, session: &Session) -> ServiceResult<()> {
        if session.tutor_id == actor.uid {
            Ok(())
        } else {
            Err(ServiceError::unauthorized(
                "Only the tutor of this session can do that",
            ))
        }
    }

    pub(crate) fn require_session_student(actor: &UserIdentity, session: &Session) -> ServiceResult<()> {
        if session.student_id == actor.uid {
            Ok(())
        } else {
            Err(ServiceError::unauthorized(
                "Only the student who booked this session can do that",
            ))
        }
    }

    pub(crate) fn require_admin(actor: &UserIdentity) -> ServiceResult<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::unauthorized("Administrator access required"))
        }
    }

    //=====================================================================================
    // Notifications
    //=====================================================================================

    pub(crate) fn notification(
        &self,
        user_id: &str,
        title: &str,
        body: String,
        data: BTreeMap<String, String>,
    ) -> Notification {
        Notification {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            body,
            data,
            read: false,
            created_at: self.clock.now(),
        }
    }

    /// Fire-and-forget delivery: failures are logged, never surfaced.
    pub(crate) async fn notify_quietly(&self, notification: Notification) {
        match self.notifier.notify(&notification).await {
            Ok(()) => debug!(user_id = %notification.user_id, title = %notification.title, "notification sent"),
            Err(e) => warn!(
                user_id = %notification.user_id,
                title = %notification.title,
                "notification delivery failed: {}",
                e
            ),
        }
    }

    pub(crate) async fn notify_session(
        &self,
        recipient: &str,
        session: &Session,
        title: &str,
        body: String,
    ) {
        let mut data = BTreeMap::new();
        data.insert("sessionId".to_string(), session.id.clone());
        data.insert("status".to_string(), session.status.to_string());
        let notification = self.notification(recipient, title, body, data);
        self.notify_quietly(notification).await;
    }
}
