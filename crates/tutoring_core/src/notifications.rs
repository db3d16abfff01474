//! crates/tutoring_core/src/notifications.rs
//!
//! Reading back the notifications delivered to a user.

use serde_json::json;

use crate::documents::{collections, decode_all, patch};
use crate::domain::{Notification, UserIdentity};
use crate::error::{ServiceError, ServiceResult};
use crate::marketplace::Marketplace;
use crate::ports::{Direction, Query};

impl Marketplace {
    /// Newest first.
    pub async fn list_notifications(&self, actor: &UserIdentity) -> ServiceResult<Vec<Notification>> {
        let query = Query::collection(collections::NOTIFICATIONS)
            .where_eq("userId", actor.uid.as_str())
            .order_by("createdAt", Direction::Descending);
        decode_all(self.store.query(&query).await?)
    }

    pub async fn mark_notification_read(
        &self,
        actor: &UserIdentity,
        notification_id: &str,
    ) -> ServiceResult<()> {
        let notification: Notification = self
            .require(collections::NOTIFICATIONS, notification_id, "Notification")
            .await?
            .value;
        if notification.user_id != actor.uid {
            return Err(ServiceError::unauthorized("This notification is not yours"));
        }
        if !notification.read {
            self.store
                .update(
                    collections::NOTIFICATIONS,
                    notification_id,
                    patch([("read", json!(true))]),
                )
                .await?;
        }
        Ok(())
    }
}
