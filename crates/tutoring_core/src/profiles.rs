//! crates/tutoring_core/src/profiles.rs
//!
//! User profiles and the tutor directory.

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::documents::{collections, decode, decode_all, encode};
use crate::domain::{RatingAggregate, Role, UserIdentity, UserProfile};
use crate::error::{ServiceError, ServiceResult};
use crate::marketplace::Marketplace;
use crate::ports::{Direction, Patch, PortError, Query};

/// Details captured at sign-up. Every new account starts as a student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub email: String,
    pub name: String,
    pub phone_number: Option<String>,
}

/// Fields a user may change on their own profile. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    /// Tutors only.
    pub subjects: Option<Vec<String>>,
    /// Tutors only.
    pub hourly_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TutorFilter {
    pub subject: Option<String>,
    pub max_hourly_rate: Option<f64>,
    pub min_rating: Option<f64>,
}

/// Keeps a client-supplied file name safe to embed in a blob path.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

impl Marketplace {
    pub async fn create_profile(&self, uid: &str, details: NewProfile) -> ServiceResult<UserProfile> {
        let name = details.name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("Name is required"));
        }
        if !details.email.contains('@') {
            return Err(ServiceError::validation("A valid email is required"));
        }
        let profile = UserProfile {
            id: uid.to_string(),
            email: details.email.trim().to_lowercase(),
            name: name.to_string(),
            role: Role::Student,
            phone_number: details.phone_number.filter(|p| !p.trim().is_empty()),
            photo_url: None,
            subjects: Vec::new(),
            hourly_rate: None,
            bio: None,
            ratings: RatingAggregate::default(),
            created_at: self.clock.now(),
        };
        match self
            .store
            .create(collections::USERS, uid, encode(&profile)?)
            .await
        {
            Ok(_) => {
                info!(uid, "profile created");
                Ok(profile)
            }
            Err(PortError::AlreadyExists(_)) => {
                Err(ServiceError::conflict("A profile already exists for this account"))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_profile(&self, uid: &str) -> ServiceResult<UserProfile> {
        Ok(self.require(collections::USERS, uid, "User").await?.value)
    }

    /// Resolves an authenticated uid to the identity core operations expect.
    pub async fn identity_for(&self, uid: &str) -> ServiceResult<UserIdentity> {
        Ok(self.get_profile(uid).await?.identity())
    }

    pub async fn update_profile(
        &self,
        actor: &UserIdentity,
        update: ProfileUpdate,
    ) -> ServiceResult<UserProfile> {
        let mut fields = Patch::new();
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ServiceError::validation("Name cannot be empty"));
            }
            fields.insert("name".to_string(), json!(name));
        }
        if let Some(phone) = update.phone_number {
            fields.insert("phoneNumber".to_string(), json!(phone.trim()));
        }
        if let Some(bio) = update.bio {
            fields.insert("bio".to_string(), json!(bio.trim()));
        }
        if update.subjects.is_some() || update.hourly_rate.is_some() {
            if actor.role != Role::Tutor {
                return Err(ServiceError::unauthorized(
                    "Only tutors have subjects and an hourly rate",
                ));
            }
            if let Some(subjects) = update.subjects {
                let subjects: Vec<String> = subjects
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                fields.insert("subjects".to_string(), json!(subjects));
            }
            if let Some(rate) = update.hourly_rate {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(ServiceError::validation("Hourly rate must be a positive amount"));
                }
                fields.insert("hourlyRate".to_string(), json!(rate));
            }
        }
        if fields.is_empty() {
            return self.get_profile(&actor.uid).await;
        }

        let doc = self
            .store
            .update(collections::USERS, &actor.uid, fields)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => ServiceError::not_found("User not found"),
                other => other.into(),
            })?;
        info!(uid = %actor.uid, "profile updated");
        Ok(decode(doc)?.value)
    }

    /// Uploads a new profile picture and points the profile at it.
    pub async fn set_profile_photo(
        &self,
        actor: &UserIdentity,
        file_name: &str,
        bytes: &[u8],
    ) -> ServiceResult<UserProfile> {
        if bytes.is_empty() {
            return Err(ServiceError::validation("The image is empty"));
        }
        let path = format!(
            "profile_pictures/{}/{}_{}",
            actor.uid,
            Uuid::new_v4(),
            sanitize_file_name(file_name)
        );
        let url = self.blobs.upload(&path, bytes).await?;
        let mut fields = Patch::new();
        fields.insert("photoUrl".to_string(), json!(url));
        let doc = self.store.update(collections::USERS, &actor.uid, fields).await?;
        info!(uid = %actor.uid, %path, "profile photo updated");
        Ok(decode(doc)?.value)
    }

    /// Tutors matching every given filter, best rated first.
    pub async fn browse_tutors(&self, filter: TutorFilter) -> ServiceResult<Vec<UserProfile>> {
        let mut query = Query::collection(collections::USERS)
            .where_eq("role", "tutor")
            .order_by("rating", Direction::Descending);
        if let Some(subject) = filter.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.where_array_contains("subjects", subject);
        }
        let tutors: Vec<UserProfile> = decode_all(self.store.query(&query).await?)?;
        Ok(tutors
            .into_iter()
            .filter(|t| {
                filter
                    .max_hourly_rate
                    .map_or(true, |max| t.hourly_rate.is_some_and(|rate| rate <= max))
            })
            .filter(|t| filter.min_rating.map_or(true, |min| t.ratings.rating >= min))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn new_accounts_are_students_and_unique() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let profile = fx
            .market
            .create_profile(
                "new-user",
                NewProfile {
                    email: " New@Example.com ".to_string(),
                    name: "New User".to_string(),
                    phone_number: Some(String::new()),
                },
            )
            .await
            .unwrap();
        assert_eq!(profile.role, Role::Student);
        assert_eq!(profile.email, "new@example.com");
        assert_eq!(profile.phone_number, None);
        assert_eq!(fx.market.identity_for("new-user").await.unwrap().role, Role::Student);

        let again = fx
            .market
            .create_profile(
                "new-user",
                NewProfile {
                    email: "x@example.com".to_string(),
                    name: "X".to_string(),
                    phone_number: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(again, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn students_cannot_set_tutor_fields() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let err = fx
            .market
            .update_profile(
                &fx.student(),
                ProfileUpdate {
                    hourly_rate: Some(10.0),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let updated = fx
            .market
            .update_profile(
                &fx.tutor(),
                ProfileUpdate {
                    bio: Some("Calculus nerd".to_string()),
                    subjects: Some(vec!["math".to_string(), " ".to_string(), "physics".to_string()]),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("Calculus nerd"));
        assert_eq!(updated.subjects, vec!["math", "physics"]);
        assert_eq!(updated.hourly_rate, Some(40.0));
    }

    #[tokio::test]
    async fn photo_upload_stores_under_the_users_folder() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let profile = fx
            .market
            .set_profile_photo(&fx.student(), "../me.png", b"png-bytes")
            .await
            .unwrap();
        let url = profile.photo_url.unwrap();
        assert!(url.contains("profile_pictures/student-1/"));
        assert!(url.ends_with("_me.png"));
        assert_eq!(fx.blobs.paths().len(), 1);
    }

    #[tokio::test]
    async fn directory_filters_and_orders_by_rating() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        fx.seed_tutor("tutor-2", "Cheap Tutor", 20.0).await;
        fx.seed_tutor("tutor-3", "Pricey Tutor", 90.0).await;
        fx.market
            .update_profile(
                &fx.identity("tutor-3"),
                ProfileUpdate {
                    subjects: Some(vec!["chemistry".to_string()]),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        fx.set_rating("tutor-2", 4.5, 2).await;
        fx.set_rating("tutor-1", 3.0, 1).await;

        let all = fx.market.browse_tutors(TutorFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["tutor-2", "tutor-1", "tutor-3"]);

        let math_under_50 = fx
            .market
            .browse_tutors(TutorFilter {
                subject: Some("math".to_string()),
                max_hourly_rate: Some(50.0),
                min_rating: Some(4.0),
            })
            .await
            .unwrap();
        let ids: Vec<_> = math_under_50.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["tutor-2"]);
    }

    #[test]
    fn file_names_are_flattened() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name("photo 1.jpg"), "photo_1.jpg");
    }
}
