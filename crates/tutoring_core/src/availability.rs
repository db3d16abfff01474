//! crates/tutoring_core/src/availability.rs
//!
//! Tutor-owned availability: one document per (tutor, date) listing one-hour
//! slots. Tutors add and remove open slots here; only the booking engine
//! flips `isBooked`/`sessionId`.

use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use crate::documents::{collections, decode_all, encode};
use crate::domain::{AvailabilityDay, Role, Slot, UserIdentity};
use crate::error::{ServiceError, ServiceResult};
use crate::invariants::assert_day_invariants;
use crate::marketplace::Marketplace;
use crate::ports::{Direction, PortError, Query};
use crate::schedule::hourly_slots;

impl Marketplace {
    fn require_own_availability(actor: &UserIdentity, tutor_id: &str) -> ServiceResult<()> {
        if actor.role == Role::Tutor && actor.uid == tutor_id {
            Ok(())
        } else {
            Err(ServiceError::unauthorized(
                "Only the tutor can manage their own availability",
            ))
        }
    }

    fn reject_past_date(&self, date: NaiveDate) -> ServiceResult<()> {
        if date < self.clock.local_now().date() {
            Err(ServiceError::validation(format!(
                "{} is in the past",
                date.format("%Y-%m-%d")
            )))
        } else {
            Ok(())
        }
    }

    /// Opens one-hour slots covering `[start_time, end_time)` on `date`.
    ///
    /// Fails if any of the new slots already exists; an existing slot is never
    /// merged or grown.
    pub async fn add_slots(
        &self,
        actor: &UserIdentity,
        tutor_id: &str,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: Option<NaiveTime>,
    ) -> ServiceResult<AvailabilityDay> {
        Self::require_own_availability(actor, tutor_id)?;
        self.reject_past_date(date)?;
        let new_slots = hourly_slots(start_time, end_time)?;
        let doc_id = AvailabilityDay::document_id(tutor_id, date);

        for _ in 0..=self.policy.conflict_retries {
            let existing = self
                .load::<AvailabilityDay>(collections::AVAILABILITY, &doc_id)
                .await?;

            let write = match existing {
                None => {
                    let day = AvailabilityDay {
                        tutor_id: tutor_id.to_string(),
                        date,
                        slots: new_slots.iter().map(|&(s, e)| Slot::open(s, e)).collect(),
                    };
                    assert_day_invariants(&day);
                    self.store
                        .create(collections::AVAILABILITY, &doc_id, encode(&day)?)
                        .await
                        .map(|_| day)
                }
                Some(current) => {
                    let mut day = current.value;
                    if let Some(&(taken, _)) =
                        new_slots.iter().find(|(s, _)| day.slot_at(*s).is_some())
                    {
                        return Err(ServiceError::conflict(format!(
                            "The {} slot on {} is already available",
                            taken.format("%H:%M"),
                            date.format("%Y-%m-%d")
                        )));
                    }
                    day.slots
                        .extend(new_slots.iter().map(|&(s, e)| Slot::open(s, e)));
                    day.sort_slots();
                    assert_day_invariants(&day);
                    self.store
                        .replace_if_version(
                            collections::AVAILABILITY,
                            &doc_id,
                            current.version,
                            encode(&day)?,
                        )
                        .await
                        .map(|_| day)
                }
            };

            match write {
                Ok(day) => {
                    info!(tutor_id, %date, added = new_slots.len(), "availability added");
                    return Ok(day);
                }
                Err(PortError::VersionConflict(_))
                | Err(PortError::AlreadyExists(_))
                | Err(PortError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.race_lost("availability"))
    }

    /// Removes one open slot. Returns the remaining day, or `None` when the
    /// last slot went and the day document was deleted.
    pub async fn remove_slot(
        &self,
        actor: &UserIdentity,
        tutor_id: &str,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: Option<NaiveTime>,
    ) -> ServiceResult<Option<AvailabilityDay>> {
        Self::require_own_availability(actor, tutor_id)?;
        self.reject_past_date(date)?;
        let doc_id = AvailabilityDay::document_id(tutor_id, date);
        let not_found = || {
            ServiceError::not_found(format!(
                "No slot starting at {} on {}",
                start_time.format("%H:%M"),
                date.format("%Y-%m-%d")
            ))
        };

        for _ in 0..=self.policy.conflict_retries {
            let current = self
                .load::<AvailabilityDay>(collections::AVAILABILITY, &doc_id)
                .await?
                .ok_or_else(not_found)?;
            let mut day = current.value;

            let slot = day.slot_at(start_time).ok_or_else(not_found)?;
            if end_time.is_some_and(|end| end != slot.end_time) {
                return Err(not_found());
            }
            if !slot.is_available() {
                return Err(ServiceError::conflict(format!(
                    "The {} slot is already booked by a student and cannot be removed",
                    start_time.format("%H:%M")
                )));
            }
            day.slots.retain(|s| s.start_time != start_time);

            let write = if day.slots.is_empty() {
                self.store
                    .delete_if_version(collections::AVAILABILITY, &doc_id, current.version)
                    .await
                    .map(|_| None)
            } else {
                assert_day_invariants(&day);
                self.store
                    .replace_if_version(
                        collections::AVAILABILITY,
                        &doc_id,
                        current.version,
                        encode(&day)?,
                    )
                    .await
                    .map(|_| Some(day))
            };

            match write {
                Ok(remaining) => {
                    info!(tutor_id, %date, start = %start_time, "availability slot removed");
                    return Ok(remaining);
                }
                Err(PortError::VersionConflict(_)) | Err(PortError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.race_lost("availability"))
    }

    /// Every availability day of `tutor_id` between the two dates, inclusive,
    /// in date order.
    pub async fn query_range(
        &self,
        tutor_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> ServiceResult<Vec<AvailabilityDay>> {
        if end_date < start_date {
            return Err(ServiceError::validation("End date must not be before start date"));
        }
        let query = Query::collection(collections::AVAILABILITY)
            .where_eq("tutorId", tutor_id)
            .where_between(
                "date",
                start_date.format("%Y-%m-%d").to_string(),
                end_date.format("%Y-%m-%d").to_string(),
            )
            .order_by("date", Direction::Ascending);
        let docs = self.store.query(&query).await?;
        decode_all(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{d, t, Fixture};

    #[tokio::test]
    async fn adding_a_range_creates_hourly_open_slots() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let day = fx
            .market
            .add_slots(&fx.tutor(), "tutor-1", d("2024-06-01"), t("10:00"), Some(t("12:00")))
            .await
            .unwrap();

        assert_eq!(day.slots.len(), 2);
        assert_eq!(day.slots[0], Slot::open(t("10:00"), t("11:00")));
        assert_eq!(day.slots[1], Slot::open(t("11:00"), t("12:00")));
        assert_eq!(fx.day("tutor-1", "2024-06-01").await.unwrap(), day);
    }

    #[tokio::test]
    async fn adding_keeps_slots_sorted_and_rejects_duplicates() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let tutor = fx.tutor();
        fx.market
            .add_slots(&tutor, "tutor-1", d("2024-06-01"), t("14:00"), None)
            .await
            .unwrap();
        let day = fx
            .market
            .add_slots(&tutor, "tutor-1", d("2024-06-01"), t("09:00"), Some(t("10:00")))
            .await
            .unwrap();
        assert_eq!(day.slots[0].start_time, t("09:00"));
        assert_eq!(day.slots[1].start_time, t("14:00"));

        let err = fx
            .market
            .add_slots(&tutor, "tutor-1", d("2024-06-01"), t("13:00"), Some(t("15:00")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(ref m) if m.contains("already available")));
        assert_eq!(fx.day("tutor-1", "2024-06-01").await.unwrap().slots.len(), 2);
    }

    #[tokio::test]
    async fn past_dates_and_foreign_tutors_are_rejected() {
        let fx = Fixture::new("2024-06-02 09:00").await;
        let past = fx
            .market
            .add_slots(&fx.tutor(), "tutor-1", d("2024-06-01"), t("10:00"), None)
            .await
            .unwrap_err();
        assert!(matches!(past, ServiceError::Validation(_)));

        let foreign = fx
            .market
            .add_slots(&fx.student(), "tutor-1", d("2024-06-03"), t("10:00"), None)
            .await
            .unwrap_err();
        assert!(matches!(foreign, ServiceError::Unauthorized(_)));

        // Today itself is allowed.
        fx.market
            .add_slots(&fx.tutor(), "tutor-1", d("2024-06-02"), t("18:00"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn removing_the_last_slot_deletes_the_day() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        let tutor = fx.tutor();
        fx.market
            .add_slots(&tutor, "tutor-1", d("2024-06-01"), t("10:00"), Some(t("12:00")))
            .await
            .unwrap();

        let remaining = fx
            .market
            .remove_slot(&tutor, "tutor-1", d("2024-06-01"), t("10:00"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remaining.slots.len(), 1);

        let gone = fx
            .market
            .remove_slot(&tutor, "tutor-1", d("2024-06-01"), t("11:00"), Some(t("12:00")))
            .await
            .unwrap();
        assert!(gone.is_none());
        assert!(fx.day("tutor-1", "2024-06-01").await.is_none());
    }

    #[tokio::test]
    async fn removal_distinguishes_missing_from_booked() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        fx.open_slots("tutor-1", "2024-06-01", "10:00", "12:00").await;
        fx.market
            .book_session(&fx.student(), fx.booking("2024-06-01", "10:00", "11:00"))
            .await
            .unwrap();

        let booked = fx
            .market
            .remove_slot(&fx.tutor(), "tutor-1", d("2024-06-01"), t("10:00"), None)
            .await
            .unwrap_err();
        assert!(matches!(booked, ServiceError::Conflict(ref m) if m.contains("already booked")));

        let missing = fx
            .market
            .remove_slot(&fx.tutor(), "tutor-1", d("2024-06-01"), t("15:00"), None)
            .await
            .unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn range_query_is_inclusive_and_per_tutor() {
        let fx = Fixture::new("2024-05-30 09:00").await;
        for date in ["2024-06-01", "2024-06-02", "2024-06-03", "2024-06-05"] {
            fx.open_slots("tutor-1", date, "10:00", "11:00").await;
        }
        fx.seed_tutor("tutor-2", "Other Tutor", 30.0).await;
        fx.market
            .add_slots(&fx.identity("tutor-2"), "tutor-2", d("2024-06-02"), t("10:00"), None)
            .await
            .unwrap();

        let days = fx
            .market
            .query_range("tutor-1", d("2024-06-02"), d("2024-06-05"))
            .await
            .unwrap();
        let dates: Vec<_> = days.iter().map(|day| day.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-06-02", "2024-06-03", "2024-06-05"]);

        assert!(fx
            .market
            .query_range("tutor-1", d("2024-06-05"), d("2024-06-01"))
            .await
            .is_err());
    }
}
