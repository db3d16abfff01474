//! crates/tutoring_core/src/lib.rs
//!
//! Booking and session core of the tutoring marketplace: domain types, the
//! ports it talks to, and every marketplace operation on [`Marketplace`].

pub mod documents;
pub mod domain;
pub mod error;
pub mod invariants;
pub mod memory;
pub mod policy;
pub mod ports;
pub mod schedule;

mod applications;
mod availability;
mod booking;
mod catalog;
mod chat;
mod issues;
mod lifecycle;
mod marketplace;
mod notifications;
mod profiles;
mod reviews;

#[cfg(test)]
mod testing;

pub use applications::{ApplicationRequest, Decision};
pub use booking::BookingRequest;
pub use chat::LiveStream;
pub use domain::{
    ApplicationStatus, AvailabilityDay, Chat, ChatParticipants, Message, Notification,
    PaymentStatus, RatingAggregate, ReportedIssue, Review, Role, SenderType, Session,
    SessionSnapshot, SessionStatus, Slot, Subject, TutorApplication, UserIdentity, UserProfile,
};
pub use error::{Applied, ErrorKind, ServiceError, ServiceResult};
pub use lifecycle::{authorize_status_change, Reschedule};
pub use marketplace::Marketplace;
pub use memory::MemoryDocumentStore;
pub use policy::BookingPolicy;
pub use ports::{
    AuthError, AuthProvider, AuthSession, BlobStore, Clock, Document, DocumentStore,
    NotificationSink, PaymentRail, PortError, PortResult, SystemClock,
};
pub use profiles::{NewProfile, ProfileUpdate, TutorFilter};
pub use reviews::ReviewRequest;
