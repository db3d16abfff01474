//! crates/tutoring_core/src/domain.rs
//!
//! Defines the core data structures of the marketplace.
//! Field names follow the camelCase layout of the documents held by the
//! document store, so these structs double as the stored document shape.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

//=========================================================================================
// Identity and Profiles
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Tutor,
    Admin,
}

/// The authenticated caller of a core operation.
///
/// Every mutating operation takes one of these explicitly instead of reading
/// a process-wide "current user".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: String,
    pub role: Role,
}

impl UserIdentity {
    pub fn new(uid: impl Into<String>, role: Role) -> Self {
        Self {
            uid: uid.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Running mean of every accepted review for a tutor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingAggregate {
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub total_reviews: u32,
}

impl RatingAggregate {
    /// Folds one more score into the mean.
    pub fn fold(self, score: f64) -> Self {
        let total = f64::from(self.total_reviews);
        Self {
            rating: (self.rating * total + score) / (total + 1.0),
            total_reviews: self.total_reviews + 1,
        }
    }
}

/// A record in the `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(flatten)]
    pub ratings: RatingAggregate,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity::new(self.id.clone(), self.role)
    }
}

//=========================================================================================
// Availability
//=========================================================================================

/// One bookable hour inside an [`AvailabilityDay`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_booked: bool,
    pub session_id: Option<String>,
}

impl Slot {
    pub fn open(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            start_time,
            end_time,
            is_booked: false,
            session_id: None,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.is_booked && self.session_id.is_none()
    }

    pub fn is_held_by(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    /// `is_booked` and `session_id` only ever change together.
    pub fn book(&mut self, session_id: &str) {
        self.is_booked = true;
        self.session_id = Some(session_id.to_string());
    }

    pub fn release(&mut self) {
        self.is_booked = false;
        self.session_id = None;
    }

    pub fn is_consistent(&self) -> bool {
        self.is_booked == self.session_id.is_some()
    }
}

/// A tutor's open hours on one calendar date. Stored under `"{tutorId}_{date}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityDay {
    pub tutor_id: String,
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
}

impl AvailabilityDay {
    pub fn document_id(tutor_id: &str, date: NaiveDate) -> String {
        format!("{}_{}", tutor_id, date.format("%Y-%m-%d"))
    }

    pub fn slot_at(&self, start_time: NaiveTime) -> Option<&Slot> {
        self.slots.iter().find(|s| s.start_time == start_time)
    }

    pub fn slot_at_mut(&mut self, start_time: NaiveTime) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.start_time == start_time)
    }

    pub fn sort_slots(&mut self) {
        self.slots.sort_by_key(|s| s.start_time);
    }
}

//=========================================================================================
// Sessions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Rescheduled,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// The lifecycle never loops back to `Pending`, and the terminal states
    /// accept nothing.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, Rescheduled)
                | (Rescheduled, Confirmed)
                | (Rescheduled, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Confirmed => "confirmed",
            SessionStatus::Rescheduled => "rescheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Released,
    Refunded,
}

/// A booked tutoring session. Never physically deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub tutor_id: String,
    pub student_id: String,
    pub subject: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub hours: u32,
    pub hourly_rate: f64,
    pub total_amount: f64,
    pub status: SessionStatus,
    pub payment_status: PaymentStatus,
    /// Date of the availability document whose slots this session holds.
    #[serde(default)]
    pub reserved_date: Option<NaiveDate>,
    pub tutor_name: String,
    pub student_name: String,
    #[serde(default)]
    pub tutor_phone_number: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn involves(&self, uid: &str) -> bool {
        self.student_id == uid || self.tutor_id == uid
    }

    /// The other participant, from `uid`'s point of view.
    pub fn counterpart_of(&self, uid: &str) -> &str {
        if self.student_id == uid {
            &self.tutor_id
        } else {
            &self.student_id
        }
    }
}

//=========================================================================================
// Reviews
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub session_id: String,
    pub tutor_id: String,
    pub student_id: String,
    pub rating: f64,
    #[serde(default)]
    pub comment: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// At most one review per (session, student).
    pub fn document_id(session_id: &str, student_id: &str) -> String {
        format!("{}_{}", session_id, student_id)
    }
}

//=========================================================================================
// Chats
//=========================================================================================

/// Display data for both chat participants, copied when the chat is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParticipants {
    pub student_id: String,
    pub tutor_id: String,
    pub student_name: String,
    pub tutor_name: String,
    #[serde(default)]
    pub student_photo: Option<String>,
    #[serde(default)]
    pub tutor_photo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub subject: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

/// A chat thread, keyed by the id of the session it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub session_id: String,
    pub participants: ChatParticipants,
    /// Both participant ids, for `array-contains` lookups.
    pub participant_ids: Vec<String>,
    pub session_details: SessionSnapshot,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub typing: BTreeMap<String, bool>,
    #[serde(default)]
    pub deleted_by: BTreeMap<String, bool>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_participant(&self, uid: &str) -> bool {
        self.participants.student_id == uid || self.participants.tutor_id == uid
    }

    pub fn is_tutor(&self, uid: &str) -> bool {
        self.participants.tutor_id == uid
    }

    pub fn is_deleted_for(&self, uid: &str) -> bool {
        self.deleted_by.get(uid).copied().unwrap_or(false)
    }

    pub fn other_participant(&self, uid: &str) -> &str {
        if self.participants.student_id == uid {
            &self.participants.tutor_id
        } else {
            &self.participants.student_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Student,
    Tutor,
}

/// An append-only chat message in `chats/{chatId}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub sender_name: String,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

//=========================================================================================
// Notifications, Applications, Subjects, Issues
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

/// A student's request to become a tutor, with the uploaded exam results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorApplication {
    pub id: String,
    pub user_id: String,
    pub applicant_name: String,
    pub subjects: Vec<String>,
    pub hourly_rate: f64,
    #[serde(default)]
    pub bio: Option<String>,
    pub exam_result_url: String,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub reviewer_note: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedIssue {
    pub id: String,
    pub session_id: String,
    pub reporter_id: String,
    pub description: String,
    #[serde(default)]
    pub resolved: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Serde helpers
//=========================================================================================

/// Serializes a `NaiveTime` as `"HH:MM"`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> NaiveTime {
        NaiveTime::parse_from_str(raw, "%H:%M").unwrap()
    }

    #[test]
    fn status_table_never_returns_to_pending() {
        use SessionStatus::*;
        for from in [Pending, Confirmed, Rescheduled, Completed, Cancelled] {
            assert!(!from.can_transition_to(Pending));
        }
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Rescheduled));
        assert!(Rescheduled.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn slot_booking_keeps_flag_and_owner_in_step() {
        let mut slot = Slot::open(t("10:00"), t("11:00"));
        assert!(slot.is_available() && slot.is_consistent());

        slot.book("s-1");
        assert!(slot.is_booked);
        assert!(slot.is_held_by("s-1"));
        assert!(slot.is_consistent());

        slot.release();
        assert!(slot.is_available() && slot.is_consistent());
    }

    #[test]
    fn slot_serializes_with_hour_minute_times() {
        let slot = Slot::open(t("09:00"), t("10:00"));
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["startTime"], "09:00");
        assert_eq!(json["endTime"], "10:00");
        assert_eq!(json["isBooked"], false);
        assert!(json["sessionId"].is_null());
    }

    #[test]
    fn rating_fold_tracks_the_mean() {
        let agg = RatingAggregate::default().fold(4.0).fold(5.0).fold(3.5);
        assert_eq!(agg.total_reviews, 3);
        assert!((agg.rating - 12.5 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn availability_document_id_joins_tutor_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(AvailabilityDay::document_id("tutor-1", date), "tutor-1_2024-06-01");
    }
}
