//! crates/tutoring_core/src/catalog.rs
//!
//! The subject catalog tutors pick from.

use tracing::info;

use crate::documents::{collections, decode_all, encode};
use crate::domain::{Subject, UserIdentity};
use crate::error::{ServiceError, ServiceResult};
use crate::marketplace::Marketplace;
use crate::ports::{Direction, PortError, Query};

/// Subject ids are the lowercased name with runs of other characters
/// collapsed to `-`, so "Linear Algebra" and "linear  algebra" collide.
fn subject_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            id.extend(c.to_lowercase());
        } else if !id.is_empty() && !id.ends_with('-') {
            id.push('-');
        }
    }
    id.trim_end_matches('-').to_string()
}

impl Marketplace {
    /// Alphabetical.
    pub async fn list_subjects(&self) -> ServiceResult<Vec<Subject>> {
        let query = Query::collection(collections::SUBJECTS).order_by("name", Direction::Ascending);
        decode_all(self.store.query(&query).await?)
    }

    pub async fn add_subject(&self, actor: &UserIdentity, name: &str) -> ServiceResult<Subject> {
        Self::require_admin(actor)?;
        let name = name.trim();
        let id = subject_id(name);
        if id.is_empty() {
            return Err(ServiceError::validation("Subject name is required"));
        }
        let subject = Subject {
            id: id.clone(),
            name: name.to_string(),
        };
        match self
            .store
            .create(collections::SUBJECTS, &id, encode(&subject)?)
            .await
        {
            Ok(_) => {
                info!(subject = %id, "subject added");
                Ok(subject)
            }
            Err(PortError::AlreadyExists(_)) => Err(ServiceError::conflict(format!(
                "{} is already in the catalog",
                name
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
