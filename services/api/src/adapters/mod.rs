pub mod auth;
pub mod blob;
pub mod notifications;
pub mod payments;
pub mod postgres;
pub mod resilient;

pub use auth::StoreAuthProvider;
pub use blob::LocalBlobStore;
pub use notifications::StoreNotificationSink;
pub use payments::SimulatedPaymentRail;
pub use postgres::PgDocumentStore;
pub use resilient::{ResilientStore, RetryConfig};
