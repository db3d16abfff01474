//! crates/tutoring_core/src/lifecycle.rs
//!
//! Session status transitions and the effects each one triggers.
//!
//! Every public entry point authorizes its caller explicitly and then hands
//! off to `apply_status`, which performs the transition and its effects
//! without looking at who asked.

use chrono::{NaiveDate, NaiveTime};
use tracing::{info, warn};

use crate::documents::{collections, decode_all, encode, patch};
use crate::domain::{PaymentStatus, Role, Session, SessionStatus, UserIdentity};
use crate::error::{Applied, ServiceError, ServiceResult};
use crate::invariants::assert_session_invariants;
use crate::marketplace::Marketplace;
use crate::ports::{Direction, PortError, Query};
use crate::schedule::wrapped_hours;

/// A new time proposed by the tutor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reschedule {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Checks whether `actor` may move `session` to `target` through
/// [`Marketplace::update_session_status`].
///
/// - confirm: the tutor accepts a pending request, or the student accepts a
///   rescheduled time;
/// - cancel: the tutor may decline or cancel at any point, the student only
///   by declining a rescheduled time (other student cancellations go through
///   `cancel_session` and its cutoff);
/// - complete: the student only.
pub fn authorize_status_change(
    actor: &UserIdentity,
    session: &Session,
    target: SessionStatus,
) -> ServiceResult<()> {
    Marketplace::require_participant(actor, session)?;
    let is_tutor = session.tutor_id == actor.uid;
    let allowed = match target {
        SessionStatus::Confirmed => match session.status {
            SessionStatus::Rescheduled => !is_tutor,
            _ => is_tutor,
        },
        SessionStatus::Cancelled => is_tutor || session.status == SessionStatus::Rescheduled,
        SessionStatus::Completed => !is_tutor,
        SessionStatus::Rescheduled => {
            return Err(ServiceError::validation(
                "Rescheduling needs a new time; use the reschedule operation",
            ))
        }
        SessionStatus::Pending => {
            return Err(ServiceError::validation("Sessions cannot return to pending"))
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(ServiceError::unauthorized(format!(
            "You cannot mark this {} session as {}",
            session.status, target
        )))
    }
}

impl Marketplace {
    //=====================================================================================
    // Shared transition machinery
    //=====================================================================================

    /// Moves a session to `target` with a compare-and-swap on its document.
    ///
    /// `step` runs against the freshest copy on every attempt: it may reject
    /// the change or adjust fields beyond the status. The transition table is
    /// checked after `step`, so `step` can give more specific errors.
    /// Returns the session before and after.
    pub(crate) async fn transition(
        &self,
        session_id: &str,
        target: SessionStatus,
        step: impl Fn(&mut Session) -> ServiceResult<()>,
    ) -> ServiceResult<(Session, Session)> {
        for _ in 0..=self.policy.conflict_retries {
            let current = self.require_session(session_id).await?;
            let before = current.value;
            let mut after = before.clone();
            step(&mut after)?;
            if !before.status.can_transition_to(target) {
                return Err(ServiceError::conflict(format!(
                    "A {} session cannot become {}",
                    before.status, target
                )));
            }
            after.status = target;
            after.updated_at = self.clock.now();
            assert_session_invariants(&after);

            match self
                .store
                .replace_if_version(
                    collections::SESSIONS,
                    session_id,
                    current.version,
                    encode(&after)?,
                )
                .await
            {
                Ok(_) => {
                    info!(session_id, from = %before.status, to = %target, "session status changed");
                    return Ok((before, after));
                }
                Err(PortError::VersionConflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.race_lost("session"))
    }

    async fn set_payment_status(
        &self,
        session: &Session,
        status: PaymentStatus,
    ) -> ServiceResult<Session> {
        let value = encode(&status)?;
        self.store
            .update(
                collections::SESSIONS,
                &session.id,
                patch([("paymentStatus", value)]),
            )
            .await?;
        Ok(Session {
            payment_status: status,
            ..session.clone()
        })
    }

    pub(crate) async fn refund(&self, session: &Session) -> ServiceResult<Session> {
        self.payments.refund(session).await?;
        info!(session_id = %session.id, amount = session.total_amount, "payment refunded");
        self.set_payment_status(session, PaymentStatus::Refunded).await
    }

    async fn release_payment(&self, session: &Session) -> ServiceResult<Session> {
        self.payments.release(session).await?;
        info!(session_id = %session.id, amount = session.total_amount, "payment released");
        self.set_payment_status(session, PaymentStatus::Released).await
    }

    /// Performs the transition and its effects. Callers authorize first.
    async fn apply_status(
        &self,
        actor: &UserIdentity,
        session_id: &str,
        target: SessionStatus,
    ) -> ServiceResult<Applied<Session>> {
        match target {
            SessionStatus::Confirmed => {
                let (_, after) = self.transition(session_id, target, |_| Ok(())).await?;
                let mut follow_ups = Vec::new();
                if let Err(e) = self.create_chat(&after).await {
                    warn!(session_id, "confirmed but chat creation failed: {}", e);
                    follow_ups.push(format!("the session chat could not be created ({})", e));
                }
                let recipient = after.counterpart_of(&actor.uid).to_string();
                self.notify_session(
                    &recipient,
                    &after,
                    "Session confirmed",
                    format!(
                        "Your {} session on {} at {} is confirmed",
                        after.subject,
                        after.date.format("%Y-%m-%d"),
                        after.start_time.format("%H:%M")
                    ),
                )
                .await;
                Ok(Applied {
                    value: after,
                    follow_ups,
                })
            }
            SessionStatus::Cancelled => {
                let (before, after) = self.transition(session_id, target, |_| Ok(())).await?;
                Ok(self.finish_cancellation(actor, before, after).await)
            }
            SessionStatus::Completed => {
                let (_, after) = self
                    .transition(session_id, target, |s| match s.status {
                        SessionStatus::Cancelled => {
                            Err(ServiceError::conflict("Cannot complete a cancelled session"))
                        }
                        SessionStatus::Completed => {
                            Err(ServiceError::conflict("Session is already completed"))
                        }
                        _ => Ok(()),
                    })
                    .await?;
                let mut follow_ups = Vec::new();
                let after = match self.release_payment(&after).await {
                    Ok(released) => released,
                    Err(e) => {
                        warn!(session_id, "completed but payment release failed: {}", e);
                        follow_ups.push(format!("the payment could not be released ({})", e));
                        after
                    }
                };
                self.notify_session(
                    &after.tutor_id,
                    &after,
                    "Session completed",
                    format!(
                        "{} marked the {} session as completed and released the payment",
                        after.student_name, after.subject
                    ),
                )
                .await;
                Ok(Applied {
                    value: after,
                    follow_ups,
                })
            }
            SessionStatus::Rescheduled | SessionStatus::Pending => Err(ServiceError::validation(
                format!("Cannot set status {} directly", target),
            )),
        }
    }

    //=====================================================================================
    // Public entry points
    //=====================================================================================

    pub async fn update_session_status(
        &self,
        actor: &UserIdentity,
        session_id: &str,
        target: SessionStatus,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        authorize_status_change(actor, &session, target)?;
        self.apply_status(actor, session_id, target).await
    }

    /// Tutor accepts a pending request; opens the session chat.
    pub async fn confirm_session(
        &self,
        actor: &UserIdentity,
        session_id: &str,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        Self::require_session_tutor(actor, &session)?;
        if session.status != SessionStatus::Pending {
            return Err(ServiceError::conflict(format!(
                "Only pending requests can be confirmed, this one is {}",
                session.status
            )));
        }
        self.apply_status(actor, session_id, SessionStatus::Confirmed).await
    }

    /// Tutor turns down a request or cancels a confirmed session; refunds the student.
    pub async fn decline_session(
        &self,
        actor: &UserIdentity,
        session_id: &str,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        Self::require_session_tutor(actor, &session)?;
        self.apply_status(actor, session_id, SessionStatus::Cancelled).await
    }

    /// Student agrees to the tutor's new time.
    pub async fn accept_reschedule(
        &self,
        actor: &UserIdentity,
        session_id: &str,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        Self::require_session_student(actor, &session)?;
        if session.status != SessionStatus::Rescheduled {
            return Err(ServiceError::conflict("This session has no pending reschedule"));
        }
        self.apply_status(actor, session_id, SessionStatus::Confirmed).await
    }

    /// Student rejects the tutor's new time; the session is cancelled and refunded.
    pub async fn decline_reschedule(
        &self,
        actor: &UserIdentity,
        session_id: &str,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        Self::require_session_student(actor, &session)?;
        if session.status != SessionStatus::Rescheduled {
            return Err(ServiceError::conflict("This session has no pending reschedule"));
        }
        self.apply_status(actor, session_id, SessionStatus::Cancelled).await
    }

    /// Tutor proposes a new time for a confirmed session.
    ///
    /// Hours and total are recomputed. The slots reserved at the old time stay
    /// booked unless the policy says to release them.
    pub async fn reschedule_session(
        &self,
        actor: &UserIdentity,
        session_id: &str,
        new_time: Reschedule,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        Self::require_session_tutor(actor, &session)?;
        if new_time.date < self.clock.local_now().date() {
            return Err(ServiceError::validation("Cannot reschedule to a past date"));
        }

        let release_old = self.policy.release_old_slot_on_reschedule;
        let hours = wrapped_hours(new_time.start_time, new_time.end_time);
        let (before, after) = self
            .transition(session_id, SessionStatus::Rescheduled, |s| {
                s.date = new_time.date;
                s.start_time = new_time.start_time;
                s.end_time = new_time.end_time;
                s.hours = hours;
                s.total_amount = f64::from(hours) * s.hourly_rate;
                if release_old {
                    s.reserved_date = None;
                }
                Ok(())
            })
            .await?;

        let mut follow_ups = Vec::new();
        if release_old {
            if let Err(e) = self.release_slots(&before).await {
                warn!(session_id, "rescheduled but old slots were not released: {}", e);
                follow_ups.push(format!("the previous time slots could not be released ({})", e));
            }
        }

        self.notify_session(
            &after.student_id,
            &after,
            "Session rescheduled",
            format!(
                "{} proposed moving your {} session to {} at {}",
                after.tutor_name,
                after.subject,
                after.date.format("%Y-%m-%d"),
                after.start_time.format("%H:%M")
            ),
        )
        .await;
        Ok(Applied {
            value: after,
            follow_ups,
        })
    }

    /// Student confirms the session took place, releasing payment to the tutor.
    pub async fn complete_session_and_release_payment(
        &self,
        actor: &UserIdentity,
        session_id: &str,
    ) -> ServiceResult<Applied<Session>> {
        let session = self.require_session(session_id).await?.value;
        Self::require_session_student(actor, &session)?;
        self.apply_status(actor, session_id, SessionStatus::Completed).await
    }

    //=====================================================================================
    // Reads
    //=====================================================================================

    pub async fn get_session(&self, actor: &UserIdentity, session_id: &str) -> ServiceResult<Session> {
        let session = self.require_session(session_id).await?.value;
        if !actor.is_admin() {
            Self::require_participant(actor, &session)?;
        }
        Ok(session)
    }

    /// The caller's sessions, newest date first, optionally filtered by status.
    pub async fn list_sessions_for_user(
        &self,
        actor: &UserIdentity,
        status: Option<SessionStatus>,
    ) -> ServiceResult<Vec<Session>> {
        let field = match actor.role {
            Role::Tutor => "tutorId",
            _ => "studentId",
        };
        let mut query = Query::collection(collections::SESSIONS)
            .where_eq(field, actor.uid.as_str())
            .order_by("date", Direction::Descending);
        if let Some(status) = status {
            query = query.where_eq("status", status.as_str());
        }
        let docs = self.store.query(&query).await?;
        decode_all(docs)
    }
}
