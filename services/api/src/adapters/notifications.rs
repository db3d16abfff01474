//! services/api/src/adapters/notifications.rs
//!
//! Delivers notifications by writing them to the `notifications` collection,
//! where clients list them and mark them read.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use tutoring_core::documents::{collections, encode};
use tutoring_core::ports::{DocumentStore, NotificationSink, PortError, PortResult};
use tutoring_core::Notification;

pub struct StoreNotificationSink {
    store: Arc<dyn DocumentStore>,
}

impl StoreNotificationSink {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for StoreNotificationSink {
    async fn notify(&self, notification: &Notification) -> PortResult<()> {
        let data = encode(notification).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.store
            .create(collections::NOTIFICATIONS, &notification.id, data)
            .await?;
        debug!(user_id = %notification.user_id, id = %notification.id, "notification stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tutoring_core::MemoryDocumentStore;

    #[tokio::test]
    async fn notifications_are_stored_under_their_id() {
        let store = Arc::new(MemoryDocumentStore::new());
        let sink = StoreNotificationSink::new(store.clone());
        let notification = Notification {
            id: "n1".to_string(),
            user_id: "student-1".to_string(),
            title: "Session confirmed".to_string(),
            body: "See you Monday".to_string(),
            data: BTreeMap::new(),
            read: false,
            created_at: Utc::now(),
        };
        sink.notify(&notification).await.unwrap();

        let doc = store.get(collections::NOTIFICATIONS, "n1").await.unwrap().unwrap();
        assert_eq!(doc.data["userId"], "student-1");
        assert_eq!(doc.data["read"], false);
    }
}
