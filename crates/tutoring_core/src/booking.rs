//! crates/tutoring_core/src/booking.rs
//!
//! The booking engine: the write path that reserves availability slots and
//! creates the session that owns them, plus the student-side cancellation
//! that gives them back.
//!
//! Slots are reserved first, with a compare-and-swap on the availability
//! document under a pre-generated session id, and only then is the session
//! document written. A concurrent booking for the same slot loses the swap,
//! re-reads, and finds the slot taken, so a slot can never be held by two
//! sessions.
//!
//! Neither write is retried blindly. When one fails without a definite
//! answer, such as a timeout, the document is read back and the booking
//! continues or unwinds from what actually landed.

use chrono::{NaiveDate, NaiveTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::documents::{collections, encode};
use crate::domain::{AvailabilityDay, PaymentStatus, Role, Session, SessionStatus, UserIdentity};
use crate::error::{Applied, ServiceError, ServiceResult};
use crate::invariants::{assert_day_invariants, assert_session_invariants};
use crate::marketplace::Marketplace;
use crate::ports::PortError;
use crate::schedule::hourly_slots;

/// Everything needed to book a tutor. Display fields are copied onto the
/// session as they are now and will not follow later profile edits.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub tutor_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub subject: String,
    pub hourly_rate: f64,
    pub tutor_name: String,
    pub student_name: String,
    pub tutor_phone_number: Option<String>,
}

impl Marketplace {
    /// Books `[start_time, end_time)` with a tutor. Either every requested
    /// hour is reserved for the new session or none is.
    pub async fn book_session(
        &self,
        student: &UserIdentity,
        request: BookingRequest,
    ) -> ServiceResult<Session> {
        if student.role != Role::Student {
            return Err(ServiceError::unauthorized("Only students can book sessions"));
        }
        if student.uid == request.tutor_id {
            return Err(ServiceError::validation("You cannot book a session with yourself"));
        }
        if request.subject.trim().is_empty() {
            return Err(ServiceError::validation("Subject is required"));
        }
        if !request.hourly_rate.is_finite() || request.hourly_rate <= 0.0 {
            return Err(ServiceError::validation("Hourly rate must be a positive amount"));
        }
        let hours = hourly_slots(request.start_time, Some(request.end_time))?;
        if request.date.and_time(request.start_time) <= self.clock.local_now() {
            return Err(ServiceError::validation("Cannot book a session in the past"));
        }

        let session_id = Uuid::new_v4().to_string();
        let starts: Vec<NaiveTime> = hours.iter().map(|(s, _)| *s).collect();
        self.reserve_slots(&request.tutor_id, request.date, &starts, &session_id)
            .await?;

        let now = self.clock.now();
        let hour_count = hours.len() as u32;
        let session = Session {
            id: session_id.clone(),
            tutor_id: request.tutor_id,
            student_id: student.uid.clone(),
            subject: request.subject.trim().to_string(),
            date: request.date,
            start_time: request.start_time,
            end_time: request.end_time,
            hours: hour_count,
            hourly_rate: request.hourly_rate,
            total_amount: f64::from(hour_count) * request.hourly_rate,
            status: SessionStatus::Pending,
            payment_status: PaymentStatus::Paid,
            reserved_date: Some(request.date),
            tutor_name: request.tutor_name,
            student_name: request.student_name,
            tutor_phone_number: request.tutor_phone_number,
            created_at: now,
            updated_at: now,
        };
        assert_session_invariants(&session);

        self.create_session(&session).await?;

        info!(
            session_id = %session.id,
            tutor_id = %session.tutor_id,
            student_id = %session.student_id,
            date = %session.date,
            hours = session.hours,
            "session booked"
        );
        self.notify_session(
            &session.tutor_id,
            &session,
            "New session request",
            format!(
                "{} requested a {} session on {} at {}",
                session.student_name,
                session.subject,
                session.date.format("%Y-%m-%d"),
                session.start_time.format("%H:%M")
            ),
        )
        .await;
        Ok(session)
    }

    async fn reserve_slots(
        &self,
        tutor_id: &str,
        date: NaiveDate,
        starts: &[NaiveTime],
        session_id: &str,
    ) -> ServiceResult<()> {
        let doc_id = AvailabilityDay::document_id(tutor_id, date);

        for _ in 0..=self.policy.conflict_retries {
            let current = self
                .load::<AvailabilityDay>(collections::AVAILABILITY, &doc_id)
                .await?
                .ok_or_else(|| ServiceError::conflict("No availability found for this date"))?;
            let mut day = current.value;

            let all_open = starts
                .iter()
                .all(|s| day.slot_at(*s).is_some_and(|slot| slot.is_available()));
            if !all_open {
                return Err(ServiceError::conflict(
                    "Some requested time slots are not available",
                ));
            }
            for start in starts {
                if let Some(slot) = day.slot_at_mut(*start) {
                    slot.book(session_id);
                }
            }
            assert_day_invariants(&day);

            match self
                .store
                .replace_if_version(
                    collections::AVAILABILITY,
                    &doc_id,
                    current.version,
                    encode(&day)?,
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(PortError::VersionConflict(_)) => continue,
                Err(PortError::NotFound(_)) => {
                    return Err(ServiceError::conflict("No availability found for this date"))
                }
                Err(e) => {
                    return self
                        .confirm_reservation(tutor_id, date, starts, session_id, e)
                        .await
                }
            }
        }
        Err(self.race_lost("availability"))
    }

    /// Settles a reservation write that failed without a definite answer.
    /// The swap covers the whole day document, so either every requested
    /// hour carries `session_id` or none does.
    async fn confirm_reservation(
        &self,
        tutor_id: &str,
        date: NaiveDate,
        starts: &[NaiveTime],
        session_id: &str,
        cause: PortError,
    ) -> ServiceResult<()> {
        let doc_id = AvailabilityDay::document_id(tutor_id, date);
        match self
            .load::<AvailabilityDay>(collections::AVAILABILITY, &doc_id)
            .await
        {
            Ok(Some(current))
                if starts.iter().all(|s| {
                    current
                        .value
                        .slot_at(*s)
                        .is_some_and(|slot| slot.is_held_by(session_id))
                }) =>
            {
                warn!(session_id, "reservation reported '{}' but was applied", cause);
                Ok(())
            }
            Ok(_) => Err(cause.into()),
            Err(read_err) => {
                // Unknown outcome; the hours must not stay held by a session
                // that will never be written.
                warn!(session_id, "reservation outcome unknown ({}): {}", cause, read_err);
                if let Err(e) = self.release_held(tutor_id, date, session_id).await {
                    error!(session_id, "slots may be held by an unwritten session: {}", e);
                }
                Err(cause.into())
            }
        }
    }

    /// Writes the new session document. A failed create may still have been
    /// applied, so the document is read back before its slots are given up.
    async fn create_session(&self, session: &Session) -> ServiceResult<()> {
        let data = match encode(session) {
            Ok(data) => data,
            Err(e) => {
                self.abandon_reservation(session).await;
                return Err(e);
            }
        };
        let cause = match self
            .store
            .create(collections::SESSIONS, &session.id, data)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        match self.store.get(collections::SESSIONS, &session.id).await {
            Ok(Some(_)) => {
                warn!(session_id = %session.id, "session write reported '{}' but was applied", cause);
                Ok(())
            }
            Ok(None) => {
                self.abandon_reservation(session).await;
                Err(cause.into())
            }
            Err(read_err) => {
                // A live session without its slots would let the hour be
                // booked twice, so the reservation is kept.
                error!(
                    session_id = %session.id,
                    "session write outcome unknown ({}), keeping its slots reserved: {}",
                    cause,
                    read_err
                );
                Err(cause.into())
            }
        }
    }

    async fn abandon_reservation(&self, session: &Session) {
        if let Err(e) = self.release_slots(session).await {
            error!(
                session_id = %session.id,
                "failed to release slots after session write failed: {}",
                e
            );
        }
    }

    /// Frees every slot held by `session`. Returns how many were released.
    pub(crate) async fn release_slots(&self, session: &Session) -> ServiceResult<usize> {
        match session.reserved_date {
            Some(date) => self.release_held(&session.tutor_id, date, &session.id).await,
            None => Ok(0),
        }
    }

    async fn release_held(
        &self,
        tutor_id: &str,
        date: NaiveDate,
        session_id: &str,
    ) -> ServiceResult<usize> {
        let doc_id = AvailabilityDay::document_id(tutor_id, date);

        for _ in 0..=self.policy.conflict_retries {
            let Some(current) = self
                .load::<AvailabilityDay>(collections::AVAILABILITY, &doc_id)
                .await?
            else {
                return Ok(0);
            };
            let mut day = current.value;
            let mut released = 0;
            for slot in day.slots.iter_mut().filter(|s| s.is_held_by(session_id)) {
                slot.release();
                released += 1;
            }
            if released == 0 {
                return Ok(0);
            }
            assert_day_invariants(&day);

            match self
                .store
                .replace_if_version(
                    collections::AVAILABILITY,
                    &doc_id,
                    current.version,
                    encode(&day)?,
                )
                .await
            {
                Ok(_) => {
                    info!(session_id, released, "slots released");
                    return Ok(released);
                }
                Err(PortError::VersionConflict(_)) => continue,
                Err(PortError::NotFound(_)) => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.race_lost("availability"))
    }

    /// Student-initiated cancellation, allowed up to the cancellation cutoff
    /// before the session starts.
    pub async fn cancel_session(
        &self,
        actor: &UserIdentity,
        session_id: &str,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        Self::require_session_student(actor, &session)?;

        let cutoff = self.policy.cancellation_cutoff;
        let now = self.clock.local_now();
        let (before, after) = self
            .transition(session_id, SessionStatus::Cancelled, |s| {
                match s.status {
                    SessionStatus::Cancelled => {
                        return Err(ServiceError::conflict("Session is already cancelled"))
                    }
                    SessionStatus::Completed => {
                        return Err(ServiceError::conflict(
                            "Completed sessions cannot be cancelled",
                        ))
                    }
                    _ => {}
                }
                let starts_at = s.starts_at();
                if starts_at - now < cutoff {
                    return Err(ServiceError::validation(format!(
                        "Sessions can only be cancelled at least {} hours before they start (cutoff was {})",
                        cutoff.num_hours(),
                        (starts_at - cutoff).format("%Y-%m-%d %H:%M")
                    )));
                }
                Ok(())
            })
            .await?;

        Ok(self.finish_cancellation(actor, before, after).await)
    }

    /// Compensating effects of any cancellation: release slots, refund, notify.
    /// Failures here are reported, the cancellation itself stands.
    pub(crate) async fn finish_cancellation(
        &self,
        actor: &UserIdentity,
        before: Session,
        mut after: Session,
    ) -> Applied<Session> {
        let mut follow_ups = Vec::new();

        if let Err(e) = self.release_slots(&before).await {
            warn!(session_id = %after.id, "cancelled but slots were not released: {}", e);
            follow_ups.push(format!("the reserved time slots could not be released ({})", e));
        }

        if after.payment_status == PaymentStatus::Paid {
            match self.refund(&after).await {
                Ok(refunded) => after = refunded,
                Err(e) => {
                    warn!(session_id = %after.id, "cancelled but refund failed: {}", e);
                    follow_ups.push(format!("the refund could not be issued ({})", e));
                }
            }
        }

        info!(session_id = %after.id, by = %actor.uid, "session cancelled");
        let recipient = after.counterpart_of(&actor.uid).to_string();
        self.notify_session(
            &recipient,
            &after,
            "Session cancelled",
            format!(
                "The {} session on {} at {} was cancelled",
                after.subject,
                after.date.format("%Y-%m-%d"),
                after.start_time.format("%H:%M")
            ),
        )
        .await;

        Applied {
            value: after,
            follow_ups,
        }
    }
}
