//! services/api/src/adapters/auth.rs
//!
//! Email/password authentication kept in the document store. Passwords are
//! hashed with Argon2; sign-in issues an opaque session token that expires
//! after `token_ttl`.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use tutoring_core::ports::{AuthError, AuthProvider, AuthSession, DocumentStore, PortError};

const CREDENTIALS: &str = "credentials";
const AUTH_TOKENS: &str = "authTokens";
const PASSWORD_RESETS: &str = "passwordResets";

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Credential {
    uid: String,
    email: String,
    password_hash: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRecord {
    uid: String,
    /// Milliseconds since the epoch.
    expires_at: i64,
}

pub struct StoreAuthProvider {
    store: Arc<dyn DocumentStore>,
    email_pattern: Regex,
    token_ttl: Duration,
}

impl StoreAuthProvider {
    pub fn new(store: Arc<dyn DocumentStore>, token_ttl: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            store,
            email_pattern: Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")?,
            token_ttl,
        })
    }

    /// Lowercases and checks the address; the result keys the credential.
    fn normalize_email(&self, email: &str) -> Result<String, AuthError> {
        let email = email.trim().to_lowercase();
        if !self.email_pattern.is_match(&email) {
            return Err(AuthError::InvalidEmail);
        }
        Ok(email)
    }

    async fn issue_token(&self, uid: &str) -> Result<AuthSession, AuthError> {
        let token = Uuid::new_v4().to_string();
        let record = TokenRecord {
            uid: uid.to_string(),
            expires_at: (Utc::now() + self.token_ttl).timestamp_millis(),
        };
        self.store
            .create(AUTH_TOKENS, &token, to_value(&record)?)
            .await
            .map_err(internal)?;
        Ok(AuthSession {
            uid: uid.to_string(),
            token,
        })
    }

    async fn credential(&self, email: &str) -> Result<Credential, AuthError> {
        let doc = self
            .store
            .get(CREDENTIALS, email)
            .await
            .map_err(internal)?
            .ok_or(AuthError::UserNotFound)?;
        serde_json::from_value(doc.data).map_err(|e| AuthError::Internal(e.to_string()))
    }
}

fn internal(e: PortError) -> AuthError {
    error!("Auth store call failed: {:?}", e);
    AuthError::Internal(e.to_string())
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, AuthError> {
    serde_json::to_value(value).map_err(|e| AuthError::Internal(e.to_string()))
}

#[async_trait]
impl AuthProvider for StoreAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = self.normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                AuthError::Internal("Failed to hash password".to_string())
            })?
            .to_string();

        let credential = Credential {
            uid: Uuid::new_v4().to_string(),
            email: email.clone(),
            password_hash,
        };
        match self
            .store
            .create(CREDENTIALS, &email, to_value(&credential)?)
            .await
        {
            Ok(_) => {}
            Err(PortError::AlreadyExists(_)) => return Err(AuthError::EmailAlreadyInUse),
            Err(e) => return Err(internal(e)),
        }
        info!(uid = %credential.uid, "account created");
        self.issue_token(&credential.uid).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = self.normalize_email(email)?;
        let credential = self.credential(&email).await?;

        let parsed_hash = PasswordHash::new(&credential.password_hash).map_err(|e| {
            error!("Failed to parse password hash: {:?}", e);
            AuthError::Internal("Authentication error".to_string())
        })?;
        let valid = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();
        if !valid {
            return Err(AuthError::WrongPassword);
        }
        self.issue_token(&credential.uid).await
    }

    async fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        let doc = self
            .store
            .get(AUTH_TOKENS, token)
            .await
            .map_err(internal)?
            .ok_or(AuthError::InvalidToken)?;
        let record: TokenRecord =
            serde_json::from_value(doc.data).map_err(|_| AuthError::InvalidToken)?;
        if record.expires_at <= Utc::now().timestamp_millis() {
            // Expired tokens are dropped lazily on first use.
            if let Err(e) = self.store.delete(AUTH_TOKENS, token).await {
                error!("Failed to drop expired token: {:?}", e);
            }
            return Err(AuthError::InvalidToken);
        }
        Ok(record.uid)
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.store.delete(AUTH_TOKENS, token).await.map_err(internal)
    }

    /// Records the request; delivering the email is left to whatever
    /// watches the `passwordResets` collection.
    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = self.normalize_email(email)?;
        let credential = self.credential(&email).await?;
        let id = Uuid::new_v4().to_string();
        let request = serde_json::json!({
            "uid": credential.uid,
            "email": email,
            "requestedAt": Utc::now().timestamp_millis(),
        });
        self.store
            .create(PASSWORD_RESETS, &id, request)
            .await
            .map_err(internal)?;
        info!(uid = %credential.uid, reset_id = %id, "password reset requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutoring_core::ports::Query;
    use tutoring_core::MemoryDocumentStore;

    fn provider() -> (Arc<MemoryDocumentStore>, StoreAuthProvider) {
        let store = Arc::new(MemoryDocumentStore::new());
        let provider = StoreAuthProvider::new(store.clone(), Duration::days(30)).unwrap();
        (store, provider)
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_resolves_the_same_uid() {
        let (_, auth) = provider();
        let created = auth.sign_up("Sam@Example.com", "secret1").await.unwrap();
        assert_eq!(auth.verify_token(&created.token).await.unwrap(), created.uid);

        let again = auth.sign_in(" sam@example.com ", "secret1").await.unwrap();
        assert_eq!(again.uid, created.uid);
        assert_ne!(again.token, created.token);
    }

    #[tokio::test]
    async fn sign_up_rejects_bad_input_and_duplicates() {
        let (_, auth) = provider();
        assert_eq!(
            auth.sign_up("not-an-email", "secret1").await.unwrap_err(),
            AuthError::InvalidEmail
        );
        assert_eq!(
            auth.sign_up("a@b.co", "12345").await.unwrap_err(),
            AuthError::WeakPassword
        );
        auth.sign_up("a@b.co", "123456").await.unwrap();
        assert_eq!(
            auth.sign_up("A@B.co", "abcdef").await.unwrap_err(),
            AuthError::EmailAlreadyInUse
        );
    }

    #[tokio::test]
    async fn sign_in_distinguishes_unknown_users_from_wrong_passwords() {
        let (_, auth) = provider();
        auth.sign_up("a@b.co", "123456").await.unwrap();
        assert_eq!(
            auth.sign_in("c@d.co", "123456").await.unwrap_err(),
            AuthError::UserNotFound
        );
        assert_eq!(
            auth.sign_in("a@b.co", "654321").await.unwrap_err(),
            AuthError::WrongPassword
        );
    }

    #[tokio::test]
    async fn sign_out_and_expiry_invalidate_tokens() {
        let (store, auth) = provider();
        let session = auth.sign_up("a@b.co", "123456").await.unwrap();
        auth.sign_out(&session.token).await.unwrap();
        assert_eq!(
            auth.verify_token(&session.token).await.unwrap_err(),
            AuthError::InvalidToken
        );

        let short = StoreAuthProvider::new(store.clone(), Duration::zero()).unwrap();
        let stale = short.sign_in("a@b.co", "123456").await.unwrap();
        assert_eq!(
            short.verify_token(&stale.token).await.unwrap_err(),
            AuthError::InvalidToken
        );
        assert!(store.get(AUTH_TOKENS, &stale.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn password_resets_are_recorded_for_known_accounts() {
        let (store, auth) = provider();
        let session = auth.sign_up("a@b.co", "123456").await.unwrap();
        auth.send_password_reset("A@b.co").await.unwrap();
        assert_eq!(
            auth.send_password_reset("x@y.co").await.unwrap_err(),
            AuthError::UserNotFound
        );

        let resets = store.query(&Query::collection(PASSWORD_RESETS)).await.unwrap();
        assert_eq!(resets.len(), 1);
        assert_eq!(resets[0].data["uid"], session.uid.as_str());
    }
}
