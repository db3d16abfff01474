//! crates/tutoring_core/src/issues.rs
//!
//! Problems reported by session participants for an administrator to follow up.

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::documents::{collections, decode, decode_all, encode, patch};
use crate::domain::{ReportedIssue, UserIdentity};
use crate::error::{ServiceError, ServiceResult};
use crate::marketplace::Marketplace;
use crate::ports::{Direction, PortError, Query};

impl Marketplace {
    pub async fn report_issue(
        &self,
        actor: &UserIdentity,
        session_id: &str,
        description: &str,
    ) -> ServiceResult<ReportedIssue> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ServiceError::validation("Please describe the issue"));
        }
        let session = self.require_session(session_id).await?.value;
        Self::require_participant(actor, &session)?;

        let issue = ReportedIssue {
            id: Uuid::new_v4().to_string(),
            session_id: session.id,
            reporter_id: actor.uid.clone(),
            description: description.to_string(),
            resolved: false,
            created_at: self.clock.now(),
        };
        self.store
            .create(collections::REPORTED_ISSUES, &issue.id, encode(&issue)?)
            .await?;
        info!(issue_id = %issue.id, session_id, reporter = %actor.uid, "issue reported");
        Ok(issue)
    }

    /// Unresolved issues, oldest first.
    pub async fn list_open_issues(&self, actor: &UserIdentity) -> ServiceResult<Vec<ReportedIssue>> {
        Self::require_admin(actor)?;
        let query = Query::collection(collections::REPORTED_ISSUES)
            .where_eq("resolved", false)
            .order_by("createdAt", Direction::Ascending);
        decode_all(self.store.query(&query).await?)
    }

    pub async fn resolve_issue(
        &self,
        actor: &UserIdentity,
        issue_id: &str,
    ) -> ServiceResult<ReportedIssue> {
        Self::require_admin(actor)?;
        let doc = self
            .store
            .update(
                collections::REPORTED_ISSUES,
                issue_id,
                patch([("resolved", json!(true))]),
            )
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => ServiceError::not_found("Issue not found"),
                other => other.into(),
            })?;
        Ok(decode(doc)?.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn participants_report_and_admins_resolve() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let session = fx.booked_session("2024-06-01", "14:00", "15:00").await;
        let admin = fx.seed_admin("admin-1").await;

        let issue = fx
            .market
            .report_issue(&fx.tutor(), &session.id, "Student never showed up")
            .await
            .unwrap();
        assert_eq!(issue.reporter_id, "tutor-1");

        fx.seed_student("student-2", "Bystander").await;
        let outsider = fx
            .market
            .report_issue(&fx.identity("student-2"), &session.id, "??")
            .await
            .unwrap_err();
        assert!(matches!(outsider, ServiceError::Unauthorized(_)));

        assert_eq!(fx.market.list_open_issues(&admin).await.unwrap().len(), 1);
        let resolved = fx.market.resolve_issue(&admin, &issue.id).await.unwrap();
        assert!(resolved.resolved);
        assert!(fx.market.list_open_issues(&admin).await.unwrap().is_empty());
        assert!(matches!(
            fx.market.resolve_issue(&admin, "missing").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn blank_reports_are_rejected() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let session = fx.booked_session("2024-06-01", "14:00", "15:00").await;
        let err = fx
            .market
            .report_issue(&fx.student(), &session.id, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
