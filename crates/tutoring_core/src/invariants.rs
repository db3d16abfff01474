//! crates/tutoring_core/src/invariants.rs
//!
//! Consistency checks run on every document the marketplace is about to
//! write: slot ownership, slot uniqueness within a day, session arithmetic
//! and the rating aggregate. They are `debug_assert!`s and vanish from
//! release builds.

use std::collections::HashSet;

use crate::domain::{AvailabilityDay, RatingAggregate, Session};

/// Validate that an availability day is internally consistent
pub fn assert_day_invariants(day: &AvailabilityDay) {
    let mut starts = HashSet::new();
    for slot in &day.slots {
        // One slot per start time
        debug_assert!(
            starts.insert(slot.start_time),
            "Availability {} on {} has two slots at {}",
            day.tutor_id,
            day.date,
            slot.start_time
        );

        // Booked iff owned by a session
        debug_assert!(
            slot.is_consistent(),
            "Slot {} on {} has is_booked={} but session_id={:?}",
            slot.start_time,
            day.date,
            slot.is_booked,
            slot.session_id
        );
    }
}

/// Validate that a session's billing matches its duration
pub fn assert_session_invariants(session: &Session) {
    debug_assert!(
        (session.total_amount - f64::from(session.hours) * session.hourly_rate).abs() < 1e-6,
        "Session {} bills {} for {} hours at {}",
        session.id,
        session.total_amount,
        session.hours,
        session.hourly_rate
    );
}

/// Validate that a rating aggregate is a plausible mean
pub fn assert_rating_invariants(aggregate: &RatingAggregate) {
    debug_assert!(
        aggregate.total_reviews > 0 || aggregate.rating == 0.0,
        "Rating {} recorded without any reviews",
        aggregate.rating
    );
    debug_assert!(
        (0.0..=5.0).contains(&aggregate.rating),
        "Rating {} is outside 0..=5",
        aggregate.rating
    );
}
