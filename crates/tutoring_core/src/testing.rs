//! crates/tutoring_core/src/testing.rs
//!
//! Test doubles and fixtures shared by the core unit tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::booking::BookingRequest;
use crate::documents::{collections, decode, encode, patch};
use crate::domain::{
    AvailabilityDay, Notification, RatingAggregate, Role, Session, UserIdentity, UserProfile,
};
use crate::marketplace::Marketplace;
use crate::memory::MemoryDocumentStore;
use crate::policy::BookingPolicy;
use crate::ports::{
    BlobStore, Clock, Document, DocumentStore, NotificationSink, Patch, PaymentRail, PortError,
    PortResult, Query, SnapshotStream,
};

pub fn d(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

pub fn t(raw: &str) -> NaiveTime {
    NaiveTime::parse_from_str(raw, "%H:%M").unwrap()
}

fn at(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").unwrap()
}

//=========================================================================================
// Doubles
//=========================================================================================

/// A clock that only moves when told to. Local time is treated as UTC.
pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn set(&self, raw: &str) {
        *self.0.lock().unwrap() = at(raw);
    }
}

impl Clock for FixedClock {
    fn local_now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.local_now())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: AtomicBool,
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> PortResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("push service down".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPayments {
    pub fail: AtomicBool,
    refunded: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl RecordingPayments {
    pub fn refunded(&self) -> Vec<String> {
        self.refunded.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    fn record(&self, log: &Mutex<Vec<String>>, session: &Session) -> PortResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("payment provider unavailable".to_string()));
        }
        log.lock().unwrap().push(session.id.clone());
        Ok(())
    }
}

#[async_trait]
impl PaymentRail for RecordingPayments {
    async fn release(&self, session: &Session) -> PortResult<()> {
        self.record(&self.released, session)
    }

    async fn refund(&self, session: &Session) -> PortResult<()> {
        self.record(&self.refunded, session)
    }
}

#[derive(Default)]
pub struct MemoryBlobs(Mutex<BTreeMap<String, Vec<u8>>>);

impl MemoryBlobs {
    pub fn paths(&self) -> Vec<String> {
        self.0.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn upload(&self, path: &str, bytes: &[u8]) -> PortResult<String> {
        self.0.lock().unwrap().insert(path.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", path))
    }
}

/// How the next write to an armed collection misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// The write is applied, then reported as timed out.
    LateAck,
    /// The write is dropped and reported as timed out.
    Lost,
    /// Like `LateAck`, and every later read of the collection times out.
    LateAckThenUnreadable,
}

/// Wraps the memory store so a chosen collection's next write can fail
/// after (or instead of) being applied.
pub struct FaultyStore {
    inner: Arc<MemoryDocumentStore>,
    armed: Mutex<HashMap<String, WriteFault>>,
    unreadable: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryDocumentStore>) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashMap::new()),
            unreadable: Mutex::new(HashSet::new()),
        }
    }

    /// Arms a one-shot fault for the next write to `collection`.
    pub fn arm(&self, collection: &str, fault: WriteFault) {
        self.armed.lock().unwrap().insert(collection.to_string(), fault);
    }

    fn timeout(collection: &str) -> PortError {
        PortError::Timeout(format!("write to {}", collection))
    }

    fn check_read(&self, collection: &str) -> PortResult<()> {
        if self.unreadable.lock().unwrap().contains(collection) {
            return Err(PortError::Timeout(format!("read from {}", collection)));
        }
        Ok(())
    }

    async fn write<T>(
        &self,
        collection: &str,
        op: impl Future<Output = PortResult<T>>,
    ) -> PortResult<T> {
        let fault = self.armed.lock().unwrap().remove(collection);
        match fault {
            None => op.await,
            Some(WriteFault::Lost) => Err(Self::timeout(collection)),
            Some(fault) => {
                op.await?;
                if fault == WriteFault::LateAckThenUnreadable {
                    self.unreadable.lock().unwrap().insert(collection.to_string());
                }
                Err(Self::timeout(collection))
            }
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        self.check_read(collection)?;
        self.inner.get(collection, id).await
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        self.write(collection, self.inner.create(collection, id, data)).await
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        self.write(collection, self.inner.set(collection, id, data)).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document> {
        self.write(collection, self.inner.update(collection, id, patch)).await
    }

    async fn replace_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        data: Value,
    ) -> PortResult<Document> {
        self.write(
            collection,
            self.inner.replace_if_version(collection, id, expected_version, data),
        )
        .await
    }

    async fn delete_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
    ) -> PortResult<()> {
        self.write(
            collection,
            self.inner.delete_if_version(collection, id, expected_version),
        )
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()> {
        self.write(collection, self.inner.delete(collection, id)).await
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>> {
        self.check_read(&query.collection)?;
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream> {
        self.inner.subscribe(query).await
    }
}

//=========================================================================================
// Fixture
//=========================================================================================

/// A marketplace over fresh in-memory doubles, with `tutor-1` (Tina Tutor,
/// 40/h, math) and `student-1` (Sam Student) already registered.
///
/// The marketplace writes through `faults`; `store` is the memory store
/// underneath, so assertions read the true state even after a fault.
pub struct Fixture {
    pub market: Marketplace,
    pub store: Arc<MemoryDocumentStore>,
    pub faults: Arc<FaultyStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub payments: Arc<RecordingPayments>,
    pub blobs: Arc<MemoryBlobs>,
}

impl Fixture {
    pub async fn new(now: &str) -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let clock = Arc::new(FixedClock(Mutex::new(at(now))));
        let notifier = Arc::new(RecordingNotifier::default());
        let payments = Arc::new(RecordingPayments::default());
        let blobs = Arc::new(MemoryBlobs::default());
        let market = Marketplace::new(
            faults.clone(),
            blobs.clone(),
            notifier.clone(),
            payments.clone(),
            clock.clone(),
            BookingPolicy::default(),
        );
        let fx = Self {
            market,
            store,
            faults,
            clock,
            notifier,
            payments,
            blobs,
        };
        fx.seed_tutor("tutor-1", "Tina Tutor", 40.0).await;
        fx.seed_student("student-1", "Sam Student").await;
        fx
    }

    pub fn set_policy(&mut self, change: impl FnOnce(&mut BookingPolicy)) {
        change(&mut self.market.policy);
    }

    /// Role follows the uid prefix: `tutor-`, `admin-`, anything else is a student.
    pub fn identity(&self, uid: &str) -> UserIdentity {
        let role = if uid.starts_with("tutor-") {
            Role::Tutor
        } else if uid.starts_with("admin-") {
            Role::Admin
        } else {
            Role::Student
        };
        UserIdentity::new(uid, role)
    }

    pub fn tutor(&self) -> UserIdentity {
        self.identity("tutor-1")
    }

    pub fn student(&self) -> UserIdentity {
        self.identity("student-1")
    }

    async fn seed(&self, uid: &str, name: &str, role: Role, rate: Option<f64>) {
        let profile = UserProfile {
            id: uid.to_string(),
            email: format!("{}@example.com", uid),
            name: name.to_string(),
            role,
            phone_number: None,
            photo_url: None,
            subjects: if role == Role::Tutor {
                vec!["math".to_string()]
            } else {
                Vec::new()
            },
            hourly_rate: rate,
            bio: None,
            ratings: RatingAggregate::default(),
            created_at: self.clock.now(),
        };
        self.store
            .set(collections::USERS, uid, encode(&profile).unwrap())
            .await
            .unwrap();
    }

    pub async fn seed_tutor(&self, uid: &str, name: &str, rate: f64) {
        self.seed(uid, name, Role::Tutor, Some(rate)).await;
    }

    pub async fn seed_student(&self, uid: &str, name: &str) {
        self.seed(uid, name, Role::Student, None).await;
    }

    pub async fn seed_admin(&self, uid: &str) -> UserIdentity {
        self.seed(uid, "Admin", Role::Admin, None).await;
        self.identity(uid)
    }

    pub async fn set_rating(&self, uid: &str, rating: f64, total_reviews: u32) {
        self.store
            .update(
                collections::USERS,
                uid,
                patch([("rating", json!(rating)), ("totalReviews", json!(total_reviews))]),
            )
            .await
            .unwrap();
    }

    pub async fn day(&self, tutor_id: &str, date: &str) -> Option<AvailabilityDay> {
        self.store
            .get(collections::AVAILABILITY, &AvailabilityDay::document_id(tutor_id, d(date)))
            .await
            .unwrap()
            .map(|doc| decode(doc).unwrap().value)
    }

    pub async fn open_slots(&self, tutor_id: &str, date: &str, start: &str, end: &str) {
        self.market
            .add_slots(&self.identity(tutor_id), tutor_id, d(date), t(start), Some(t(end)))
            .await
            .unwrap();
    }

    /// A request from `student-1` for `tutor-1` at 40/h.
    pub fn booking(&self, date: &str, start: &str, end: &str) -> BookingRequest {
        BookingRequest {
            tutor_id: "tutor-1".to_string(),
            date: d(date),
            start_time: t(start),
            end_time: t(end),
            subject: "math".to_string(),
            hourly_rate: 40.0,
            tutor_name: "Tina Tutor".to_string(),
            student_name: "Sam Student".to_string(),
            tutor_phone_number: None,
        }
    }

    pub async fn session(&self, id: &str) -> Session {
        let doc = self.store.get(collections::SESSIONS, id).await.unwrap().unwrap();
        decode(doc).unwrap().value
    }

    /// Opens the hours and books them as `student-1`.
    pub async fn booked_session(&self, date: &str, start: &str, end: &str) -> Session {
        self.open_slots("tutor-1", date, start, end).await;
        self.market
            .book_session(&self.student(), self.booking(date, start, end))
            .await
            .unwrap()
    }

    pub async fn confirmed_session(&self, date: &str, start: &str, end: &str) -> Session {
        let session = self.booked_session(date, start, end).await;
        self.market
            .confirm_session(&self.tutor(), &session.id)
            .await
            .unwrap()
            .value
    }

    pub async fn completed_session(&self, date: &str, start: &str, end: &str) -> Session {
        let session = self.confirmed_session(date, start, end).await;
        self.market
            .complete_session_and_release_payment(&self.student(), &session.id)
            .await
            .unwrap()
            .value
    }
}
