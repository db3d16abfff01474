//! crates/tutoring_core/src/applications.rs
//!
//! Students apply to tutor by uploading exam results; an administrator
//! approves or rejects. Approval promotes the user to a tutor.

use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::documents::{collections, decode_all, encode, patch};
use crate::domain::{ApplicationStatus, Role, TutorApplication, UserIdentity};
use crate::error::{Applied, ServiceError, ServiceResult};
use crate::marketplace::Marketplace;
use crate::ports::{Direction, PortError, Query};

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationRequest {
    pub subjects: Vec<String>,
    pub hourly_rate: f64,
    pub bio: Option<String>,
    pub exam_result_pdf: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Marketplace {
    pub async fn submit_tutor_application(
        &self,
        actor: &UserIdentity,
        request: ApplicationRequest,
    ) -> ServiceResult<TutorApplication> {
        if actor.role != Role::Student {
            return Err(ServiceError::conflict("Only students can apply to become tutors"));
        }
        let subjects: Vec<String> = request
            .subjects
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if subjects.is_empty() {
            return Err(ServiceError::validation("Choose at least one subject"));
        }
        if !request.hourly_rate.is_finite() || request.hourly_rate <= 0.0 {
            return Err(ServiceError::validation("Hourly rate must be a positive amount"));
        }
        if !request.exam_result_pdf.starts_with(PDF_MAGIC) {
            return Err(ServiceError::validation("Exam results must be a PDF file"));
        }

        let pending = self
            .store
            .query(
                &Query::collection(collections::TUTOR_APPLICATIONS)
                    .where_eq("userId", actor.uid.as_str())
                    .where_eq("status", "pending"),
            )
            .await?;
        if !pending.is_empty() {
            return Err(ServiceError::conflict(
                "You already have an application waiting for review",
            ));
        }

        let profile = self.get_profile(&actor.uid).await?;
        let id = Uuid::new_v4().to_string();
        let path = format!("exam_results/{}/{}.pdf", actor.uid, id);
        let exam_result_url = self.blobs.upload(&path, &request.exam_result_pdf).await?;

        let application = TutorApplication {
            id: id.clone(),
            user_id: actor.uid.clone(),
            applicant_name: profile.name,
            subjects,
            hourly_rate: request.hourly_rate,
            bio: request.bio.map(|b| b.trim().to_string()).filter(|b| !b.is_empty()),
            exam_result_url,
            status: ApplicationStatus::Pending,
            reviewer_note: None,
            submitted_at: self.clock.now(),
            reviewed_at: None,
        };
        self.store
            .create(collections::TUTOR_APPLICATIONS, &id, encode(&application)?)
            .await?;
        info!(application_id = %id, uid = %actor.uid, "tutor application submitted");
        Ok(application)
    }

    /// Oldest first.
    pub async fn list_pending_applications(
        &self,
        actor: &UserIdentity,
    ) -> ServiceResult<Vec<TutorApplication>> {
        Self::require_admin(actor)?;
        let query = Query::collection(collections::TUTOR_APPLICATIONS)
            .where_eq("status", "pending")
            .order_by("submittedAt", Direction::Ascending);
        decode_all(self.store.query(&query).await?)
    }

    /// Settles a pending application. On approval the applicant becomes a
    /// tutor with the subjects and rate they applied with; if that promotion
    /// fails the decision still stands and a follow-up is reported.
    pub async fn review_tutor_application(
        &self,
        actor: &UserIdentity,
        application_id: &str,
        decision: Decision,
        note: Option<String>,
    ) -> ServiceResult<Applied<TutorApplication>> {
        Self::require_admin(actor)?;
        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        let mut decided = None;
        for _ in 0..=self.policy.conflict_retries {
            let current = self
                .require::<TutorApplication>(
                    collections::TUTOR_APPLICATIONS,
                    application_id,
                    "Application",
                )
                .await?;
            let mut application = current.value;
            if application.status != ApplicationStatus::Pending {
                return Err(ServiceError::conflict("This application was already reviewed"));
            }
            application.status = match decision {
                Decision::Approve => ApplicationStatus::Approved,
                Decision::Reject => ApplicationStatus::Rejected,
            };
            application.reviewer_note = note.clone();
            application.reviewed_at = Some(self.clock.now());

            match self
                .store
                .replace_if_version(
                    collections::TUTOR_APPLICATIONS,
                    application_id,
                    current.version,
                    encode(&application)?,
                )
                .await
            {
                Ok(_) => {
                    decided = Some(application);
                    break;
                }
                Err(PortError::VersionConflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let Some(application) = decided else {
            return Err(self.race_lost("application"));
        };
        info!(application_id, status = ?application.status, "tutor application reviewed");

        let mut follow_ups = Vec::new();
        if decision == Decision::Approve {
            let mut fields = patch([
                ("role", json!("tutor")),
                ("subjects", json!(application.subjects)),
                ("hourlyRate", json!(application.hourly_rate)),
            ]);
            if let Some(bio) = &application.bio {
                fields.insert("bio".to_string(), json!(bio));
            }
            if let Err(e) = self
                .store
                .update(collections::USERS, &application.user_id, fields)
                .await
            {
                warn!(application_id, "approved but promotion failed: {}", e);
                follow_ups.push(format!("the applicant could not be made a tutor ({})", e));
            }
        }

        let (title, body) = match decision {
            Decision::Approve => ("Application approved", "You can now offer tutoring sessions".to_string()),
            Decision::Reject => (
                "Application not approved",
                note.clone()
                    .unwrap_or_else(|| "Your tutor application was not approved".to_string()),
            ),
        };
        let mut data = BTreeMap::new();
        data.insert("applicationId".to_string(), application.id.clone());
        let notification = self.notification(&application.user_id, title, body, data);
        self.notify_quietly(notification).await;

        Ok(Applied {
            value: application,
            follow_ups,
        })
    }
}
