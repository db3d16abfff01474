//! crates/tutoring_core/src/policy.rs
//!
//! Tunable booking rules.

use chrono::Duration;

#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// How long before the start a student may still cancel.
    pub cancellation_cutoff: Duration,
    /// Whether rescheduling frees the slots reserved at the old time.
    pub release_old_slot_on_reschedule: bool,
    /// How many times a compare-and-swap write is retried after losing a race.
    pub conflict_retries: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancellation_cutoff: Duration::hours(5),
            release_old_slot_on_reschedule: false,
            conflict_retries: 5,
        }
    }
}
