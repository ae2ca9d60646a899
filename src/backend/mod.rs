//! Boundary to the backend collaborator: authentication, relational records
//! and object storage. Flows only ever see `Arc<dyn Backend>`.

pub mod hosted;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::db::models::{
    Category, FeedItem, Listing, ListingDetail, ListingStatus, NewListing, NewListingImage,
    NewPost, NewProfile, Post, Profile, ProfilePatch,
};
use crate::error::BackendResult;

pub const LISTING_IMAGES_BUCKET: &str = "listing-images";
pub const POST_IMAGES_BUCKET: &str = "post-images";
pub const AVATARS_BUCKET: &str = "avatars";

// --- Auth types ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Identity,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Profile fields known at sign-up time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSeed {
    pub username: String,
    pub is_seller: bool,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub identity: Identity,
    /// Present when the backend signs the new identity in straight away.
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

/// Receiving end of auth-state notifications. Dropping it unsubscribes.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// Next notification, or `None` once the backend has gone away.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Auth subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Client-side auth state shared by both backend implementations: the
/// session the client currently holds, plus the notification channel.
pub(crate) struct AuthState {
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthState {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            current: RwLock::new(None),
            events,
        }
    }

    pub(crate) async fn get(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// Store the new session and notify subscribers.
    pub(crate) async fn set(&self, kind: AuthEventKind, session: Option<Session>) {
        *self.current.write().await = session.clone();
        tracing::debug!("Auth event: {:?}", kind);
        // No subscribers is fine
        let _ = self.events.send(AuthEvent { kind, session });
    }

    /// Drop the held session without notifying (e.g. it silently expired).
    pub(crate) async fn clear(&self) {
        *self.current.write().await = None;
    }

    pub(crate) fn subscribe(&self) -> AuthSubscription {
        AuthSubscription {
            rx: self.events.subscribe(),
        }
    }
}

// --- Storage types ---

/// An image picked by the user, held in memory until upload.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub cache_control: String,
    pub upsert: bool,
    pub content_type: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            cache_control: "3600".to_string(),
            upsert: false,
            content_type: None,
        }
    }
}

// --- Backend traits ---

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Create an identity. With a seed the profile row is created alongside it.
    async fn sign_up(
        &self,
        credentials: &Credentials,
        seed: Option<&ProfileSeed>,
    ) -> BackendResult<SignUpOutcome>;

    async fn sign_in(&self, credentials: &Credentials) -> BackendResult<Session>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// The held session, or `None` if there is none or it has expired.
    async fn current_session(&self) -> BackendResult<Option<Session>>;

    async fn refresh_session(&self) -> BackendResult<Session>;

    /// Re-adopt a session persisted by an earlier process.
    async fn restore_session(&self, saved: Session) -> BackendResult<Option<Session>>;

    fn subscribe(&self) -> AuthSubscription;
}

#[async_trait]
pub trait RecordsApi: Send + Sync {
    /// Exactly one profile; zero rows is `BackendError::NotFound`.
    async fn profile(&self, id: Uuid) -> BackendResult<Profile>;

    /// Zero or one profile.
    async fn find_profile(&self, id: Uuid) -> BackendResult<Option<Profile>>;

    async fn profile_by_username(&self, username: &str) -> BackendResult<Option<Profile>>;

    async fn insert_profile(&self, profile: &NewProfile) -> BackendResult<Profile>;

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> BackendResult<Profile>;

    async fn categories(&self) -> BackendResult<Vec<Category>>;

    async fn insert_listing(&self, listing: &NewListing) -> BackendResult<Listing>;

    async fn set_listing_status(&self, id: Uuid, status: ListingStatus) -> BackendResult<()>;

    async fn listing_detail(&self, id: Uuid) -> BackendResult<Option<ListingDetail>>;

    async fn count_listings(&self, seller_id: Uuid) -> BackendResult<i64>;

    /// One batch insert; either every row lands or none does.
    async fn insert_listing_images(&self, images: &[NewListingImage]) -> BackendResult<()>;

    async fn insert_post(&self, post: &NewPost) -> BackendResult<Post>;

    /// Posts by `author` with exactly `content`, created at or after `since`.
    async fn recent_duplicate_posts(
        &self,
        author: Uuid,
        content: &str,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Post>>;

    /// All posts, newest first.
    async fn feed(&self) -> BackendResult<Vec<FeedItem>>;

    async fn count_posts(&self, author: Uuid) -> BackendResult<i64>;
}

#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Store an object; returns the stored path.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        file: &ImageFile,
        options: &UploadOptions,
    ) -> BackendResult<String>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()>;
}

pub trait Backend: AuthApi + RecordsApi + StorageApi {}

impl<T: AuthApi + RecordsApi + StorageApi> Backend for T {}

pub type SharedBackend = Arc<dyn Backend>;

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            user: Identity {
                id: Uuid::new_v4(),
                email: "a@example.com".into(),
            },
        }
    }

    #[tokio::test]
    async fn auth_state_notifies_subscribers() {
        let state = AuthState::new();
        let mut sub = state.subscribe();
        state.set(AuthEventKind::SignedIn, Some(session())).await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, AuthEventKind::SignedIn);
        assert!(state.get().await.is_some());
    }

    #[tokio::test]
    async fn set_without_subscribers_still_stores() {
        let state = AuthState::new();
        state.set(AuthEventKind::SignedIn, Some(session())).await;
        state.set(AuthEventKind::SignedOut, None).await;
        assert!(state.get().await.is_none());
    }

    #[test]
    fn expiry_is_inclusive() {
        let s = session();
        assert!(!s.is_expired(Utc::now()));
        assert!(s.is_expired(s.expires_at));
    }
}
