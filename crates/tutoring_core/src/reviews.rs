//! crates/tutoring_core/src/reviews.rs
//!
//! Student reviews of completed sessions and the tutor rating aggregate.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::documents::{collections, decode_all, encode};
use crate::domain::{RatingAggregate, Review, SessionStatus, UserIdentity, UserProfile};
use crate::error::{Applied, ServiceError, ServiceResult};
use crate::invariants::assert_rating_invariants;
use crate::marketplace::Marketplace;
use crate::ports::{Direction, PortError, Query};

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    pub session_id: String,
    pub tutor_id: String,
    pub rating: f64,
    pub comment: String,
}

/// Ratings are whole or half stars from 0 to 5.
fn validate_rating(rating: f64) -> ServiceResult<()> {
    let halves = rating * 2.0;
    if rating.is_finite() && (0.0..=5.0).contains(&rating) && halves.fract() == 0.0 {
        Ok(())
    } else {
        Err(ServiceError::validation(
            "Rating must be between 0 and 5 in steps of 0.5",
        ))
    }
}

impl Marketplace {
    /// Records the student's review and folds it into the tutor's rating.
    ///
    /// The review itself is the primary write. If the aggregate update then
    /// fails the review stands and the failure is reported as a follow-up.
    pub async fn submit_review(
        &self,
        actor: &UserIdentity,
        request: ReviewRequest,
    ) -> ServiceResult<Applied<Review>> {
        validate_rating(request.rating)?;
        let session = self.require_session(&request.session_id).await?.value;
        Self::require_session_student(actor, &session)?;
        if session.tutor_id != request.tutor_id {
            return Err(ServiceError::validation(
                "The tutor does not match this session",
            ));
        }
        if session.status != SessionStatus::Completed {
            return Err(ServiceError::conflict(
                "Only completed sessions can be reviewed",
            ));
        }

        let review = Review {
            id: Review::document_id(&session.id, &actor.uid),
            session_id: session.id.clone(),
            tutor_id: session.tutor_id.clone(),
            student_id: actor.uid.clone(),
            rating: request.rating,
            comment: request.comment.trim().to_string(),
            created_at: self.clock.now(),
        };
        match self
            .store
            .create(collections::REVIEWS, &review.id, encode(&review)?)
            .await
        {
            Ok(_) => {}
            Err(PortError::AlreadyExists(_)) => {
                return Err(ServiceError::conflict("You have already reviewed this session"))
            }
            Err(e) => return Err(e.into()),
        }
        info!(review_id = %review.id, tutor_id = %review.tutor_id, rating = review.rating, "review submitted");

        let mut follow_ups = Vec::new();
        if let Err(e) = self.fold_rating(&review.tutor_id, review.rating).await {
            warn!(review_id = %review.id, "review saved but rating update failed: {}", e);
            follow_ups.push(format!("the tutor rating could not be updated ({})", e));
        }

        let mut data = BTreeMap::new();
        data.insert("reviewId".to_string(), review.id.clone());
        data.insert("sessionId".to_string(), review.session_id.clone());
        let notification = self.notification(
            &review.tutor_id,
            "New review",
            format!("{} rated your {} session {}", session.student_name, session.subject, review.rating),
            data,
        );
        self.notify_quietly(notification).await;

        Ok(Applied {
            value: review,
            follow_ups,
        })
    }

    async fn fold_rating(&self, tutor_id: &str, score: f64) -> ServiceResult<RatingAggregate> {
        for _ in 0..=self.policy.conflict_retries {
            let current = self
                .require::<UserProfile>(collections::USERS, tutor_id, "Tutor")
                .await?;
            let mut profile = current.value;
            profile.ratings = profile.ratings.fold(score);
            assert_rating_invariants(&profile.ratings);

            match self
                .store
                .replace_if_version(
                    collections::USERS,
                    tutor_id,
                    current.version,
                    encode(&profile)?,
                )
                .await
            {
                Ok(_) => return Ok(profile.ratings),
                Err(PortError::VersionConflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.race_lost("tutor rating"))
    }

    /// Newest first.
    pub async fn list_reviews_for_tutor(&self, tutor_id: &str) -> ServiceResult<Vec<Review>> {
        let query = Query::collection(collections::REVIEWS)
            .where_eq("tutorId", tutor_id)
            .order_by("createdAt", Direction::Descending);
        decode_all(self.store.query(&query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use std::sync::Arc;

    fn request(session_id: &str, rating: f64) -> ReviewRequest {
        ReviewRequest {
            session_id: session_id.to_string(),
            tutor_id: "tutor-1".to_string(),
            rating,
            comment: "Great".to_string(),
        }
    }

    async fn tutor_ratings(fx: &Fixture) -> RatingAggregate {
        fx.market.get_profile("tutor-1").await.unwrap().ratings
    }

    #[tokio::test]
    async fn sequential_reviews_produce_the_mean() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        for (start, end, score) in [("10:00", "11:00", 5.0), ("11:00", "12:00", 4.0), ("12:00", "13:00", 3.5)] {
            let session = fx.completed_session("2024-06-01", start, end).await;
            let applied = fx
                .market
                .submit_review(&fx.student(), request(&session.id, score))
                .await
                .unwrap();
            assert!(!applied.is_partial());
        }
        let ratings = tutor_ratings(&fx).await;
        assert_eq!(ratings.total_reviews, 3);
        assert!((ratings.rating - 12.5 / 3.0).abs() < 1e-9);
        assert_eq!(fx.market.list_reviews_for_tutor("tutor-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn second_review_is_rejected_and_leaves_the_aggregate_alone() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let session = fx.completed_session("2024-06-01", "10:00", "11:00").await;
        fx.market
            .submit_review(&fx.student(), request(&session.id, 4.0))
            .await
            .unwrap();

        let err = fx
            .market
            .submit_review(&fx.student(), request(&session.id, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(ref m) if m.contains("already reviewed")));
        let ratings = tutor_ratings(&fx).await;
        assert_eq!(ratings.total_reviews, 1);
        assert_eq!(ratings.rating, 4.0);
    }

    #[tokio::test]
    async fn only_the_student_of_a_completed_session_may_review() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let confirmed = fx.confirmed_session("2024-06-01", "10:00", "11:00").await;
        let not_done = fx
            .market
            .submit_review(&fx.student(), request(&confirmed.id, 4.0))
            .await
            .unwrap_err();
        assert!(matches!(not_done, ServiceError::Conflict(_)));

        let done = fx.completed_session("2024-06-01", "11:00", "12:00").await;
        fx.seed_student("student-2", "Stranger").await;
        let stranger = fx
            .market
            .submit_review(&fx.identity("student-2"), request(&done.id, 4.0))
            .await
            .unwrap_err();
        assert!(matches!(stranger, ServiceError::Unauthorized(_)));

        let bad_score = fx
            .market
            .submit_review(&fx.student(), request(&done.id, 4.3))
            .await
            .unwrap_err();
        assert!(matches!(bad_score, ServiceError::Validation(_)));
    }

    #[test]
    fn ratings_run_from_zero_to_five_in_half_steps() {
        for ok in [0.0, 0.5, 3.5, 5.0] {
            assert!(validate_rating(ok).is_ok(), "{} should be accepted", ok);
        }
        for bad in [-0.5, 5.5, 2.25, f64::NAN] {
            assert!(validate_rating(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[tokio::test]
    async fn a_zero_star_review_counts_toward_the_mean() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let first = fx.completed_session("2024-06-01", "10:00", "11:00").await;
        let second = fx.completed_session("2024-06-01", "11:00", "12:00").await;

        fx.market
            .submit_review(&fx.student(), request(&first.id, 0.0))
            .await
            .unwrap();
        fx.market
            .submit_review(&fx.student(), request(&second.id, 0.5))
            .await
            .unwrap();

        let ratings = tutor_ratings(&fx).await;
        assert_eq!(ratings.total_reviews, 2);
        assert_eq!(ratings.rating, 0.25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reviews_keep_an_exact_mean() {
        let mut fx = Fixture::new("2024-05-30 09:00").await;
        // Eight writers on one profile document can lose several rounds each.
        fx.set_policy(|p| p.conflict_retries = 64);
        let mut sessions = Vec::new();
        for hour in 8..16 {
            let start = format!("{:02}:00", hour);
            let end = format!("{:02}:00", hour + 1);
            sessions.push(fx.completed_session("2024-06-01", &start, &end).await);
        }

        let market = Arc::new(fx.market.clone());
        let student = fx.student();
        let tasks: Vec<_> = sessions
            .iter()
            .enumerate()
            .map(|(i, session)| {
                let market = market.clone();
                let student = student.clone();
                let score = if i % 2 == 0 { 5.0 } else { 3.0 };
                let req = request(&session.id, score);
                tokio::spawn(async move { market.submit_review(&student, req).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let ratings = tutor_ratings(&fx).await;
        assert_eq!(ratings.total_reviews, 8);
        assert!((ratings.rating - 4.0).abs() < 1e-9);
    }
}
