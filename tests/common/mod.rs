//! Shared fixtures: a local backend wrapped with call counters and
//! injectable failures, plus an `AppState` driven by a manual clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use souk::backend::local::LocalBackend;
use souk::backend::{
    AuthApi, AuthSubscription, Credentials, Identity, ImageFile, ProfileSeed, RecordsApi,
    Session, SharedBackend, SignUpOutcome, StorageApi, UploadOptions,
};
use souk::clock::{Clock, ManualClock};
use souk::config::Config;
use souk::db::models::{
    Category, FeedItem, Listing, ListingDetail, ListingStatus, NewListing, NewListingImage,
    NewPost, NewProfile, Post, Profile, ProfilePatch,
};
use souk::error::{BackendError, BackendResult};
use souk::session::{Phase, SessionSnapshot, SessionStore};
use souk::state::AppState;

#[derive(Debug, Default, Clone)]
pub struct Faults {
    /// Zero-based index of the upload call that fails.
    pub fail_upload_at: Option<usize>,
    pub fail_profile_fetch: bool,
    pub fail_profile_update: bool,
    pub fail_image_batch: bool,
    /// Refuse only the pending to active transition.
    pub fail_activation: bool,
    pub fail_sign_out: bool,
    pub insert_post_code: Option<&'static str>,
}

pub struct InstrumentedBackend {
    pub inner: LocalBackend,
    calls: Mutex<HashMap<&'static str, usize>>,
    faults: Mutex<Faults>,
}

fn injected(what: &str) -> BackendError {
    BackendError::Api {
        status: 500,
        code: None,
        message: format!("injected {} failure", what),
    }
}

impl InstrumentedBackend {
    pub fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Record a call and return how many came before it.
    fn hit(&self, op: &'static str) -> usize {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(op).or_insert(0);
        *count += 1;
        *count - 1
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock().unwrap() = faults;
    }

    fn faults(&self) -> Faults {
        self.faults.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthApi for InstrumentedBackend {
    async fn sign_up(
        &self,
        credentials: &Credentials,
        seed: Option<&ProfileSeed>,
    ) -> BackendResult<SignUpOutcome> {
        self.hit("sign_up");
        self.inner.sign_up(credentials, seed).await
    }

    async fn sign_in(&self, credentials: &Credentials) -> BackendResult<Session> {
        self.hit("sign_in");
        self.inner.sign_in(credentials).await
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.hit("sign_out");
        if self.faults().fail_sign_out {
            return Err(injected("sign out"));
        }
        self.inner.sign_out().await
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        self.hit("current_session");
        self.inner.current_session().await
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        self.hit("refresh_session");
        self.inner.refresh_session().await
    }

    async fn restore_session(&self, saved: Session) -> BackendResult<Option<Session>> {
        self.hit("restore_session");
        self.inner.restore_session(saved).await
    }

    fn subscribe(&self) -> AuthSubscription {
        self.inner.subscribe()
    }
}

#[async_trait]
impl RecordsApi for InstrumentedBackend {
    async fn profile(&self, id: Uuid) -> BackendResult<Profile> {
        self.hit("profile");
        if self.faults().fail_profile_fetch {
            return Err(injected("profile fetch"));
        }
        self.inner.profile(id).await
    }

    async fn find_profile(&self, id: Uuid) -> BackendResult<Option<Profile>> {
        self.hit("find_profile");
        self.inner.find_profile(id).await
    }

    async fn profile_by_username(&self, username: &str) -> BackendResult<Option<Profile>> {
        self.hit("profile_by_username");
        self.inner.profile_by_username(username).await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> BackendResult<Profile> {
        self.hit("insert_profile");
        self.inner.insert_profile(profile).await
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> BackendResult<Profile> {
        self.hit("update_profile");
        if self.faults().fail_profile_update {
            return Err(injected("profile update"));
        }
        self.inner.update_profile(id, patch).await
    }

    async fn categories(&self) -> BackendResult<Vec<Category>> {
        self.hit("categories");
        self.inner.categories().await
    }

    async fn insert_listing(&self, listing: &NewListing) -> BackendResult<Listing> {
        self.hit("insert_listing");
        self.inner.insert_listing(listing).await
    }

    async fn set_listing_status(&self, id: Uuid, status: ListingStatus) -> BackendResult<()> {
        self.hit("set_listing_status");
        if status == ListingStatus::Active && self.faults().fail_activation {
            return Err(injected("listing activation"));
        }
        self.inner.set_listing_status(id, status).await
    }

    async fn listing_detail(&self, id: Uuid) -> BackendResult<Option<ListingDetail>> {
        self.hit("listing_detail");
        self.inner.listing_detail(id).await
    }

    async fn count_listings(&self, seller_id: Uuid) -> BackendResult<i64> {
        self.hit("count_listings");
        self.inner.count_listings(seller_id).await
    }

    async fn insert_listing_images(&self, images: &[NewListingImage]) -> BackendResult<()> {
        let call = self.hit("insert_listing_images");
        if self.faults().fail_image_batch {
            return Err(injected(&format!("image batch {}", call)));
        }
        self.inner.insert_listing_images(images).await
    }

    async fn insert_post(&self, post: &NewPost) -> BackendResult<Post> {
        self.hit("insert_post");
        if let Some(code) = self.faults().insert_post_code {
            return Err(BackendError::Constraint {
                code,
                message: format!("injected constraint {}", code),
            });
        }
        self.inner.insert_post(post).await
    }

    async fn recent_duplicate_posts(
        &self,
        author: Uuid,
        content: &str,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Post>> {
        self.hit("recent_duplicate_posts");
        self.inner.recent_duplicate_posts(author, content, since).await
    }

    async fn feed(&self) -> BackendResult<Vec<FeedItem>> {
        self.hit("feed");
        self.inner.feed().await
    }

    async fn count_posts(&self, author: Uuid) -> BackendResult<i64> {
        self.hit("count_posts");
        self.inner.count_posts(author).await
    }
}

#[async_trait]
impl StorageApi for InstrumentedBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        file: &ImageFile,
        options: &UploadOptions,
    ) -> BackendResult<String> {
        let call = self.hit("upload");
        if self.faults().fail_upload_at == Some(call) {
            return Err(injected("upload"));
        }
        self.inner.upload(bucket, path, file, options).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.inner.public_url(bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()> {
        self.hit("remove");
        self.inner.remove(bucket, paths).await
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub clock: ManualClock,
    pub backend: Arc<InstrumentedBackend>,
    pub state: AppState,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let tmp = TempDir::new().unwrap();
    let clock = ManualClock::new(start_time());
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let local = LocalBackend::in_memory(tmp.path().join("storage"))
        .unwrap()
        .with_clock(shared_clock.clone());
    let backend = Arc::new(InstrumentedBackend::new(local));
    let shared: SharedBackend = backend.clone();
    let state = AppState::with_backend(config, tmp.path().to_path_buf(), shared, shared_clock);
    Harness {
        tmp,
        clock,
        backend,
        state,
    }
}

impl Harness {
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.state.store
    }

    /// Sign up (optionally with a profile), then bring the store up to date.
    pub async fn signed_in(&self, email: &str, seed: Option<ProfileSeed>) -> Identity {
        let credentials = Credentials {
            email: email.into(),
            password: "secret123".into(),
        };
        let outcome = self
            .backend
            .inner
            .sign_up(&credentials, seed.as_ref())
            .await
            .unwrap();
        self.store().init().await;
        self.backend.reset_calls();
        outcome.identity
    }

    pub async fn seller(&self, username: &str) -> Identity {
        self.signed_in(
            &format!("{}@example.com", username),
            Some(ProfileSeed {
                username: username.into(),
                is_seller: true,
            }),
        )
        .await
    }

    pub async fn buyer(&self, username: &str) -> Identity {
        self.signed_in(
            &format!("{}@example.com", username),
            Some(ProfileSeed {
                username: username.into(),
                is_seller: false,
            }),
        )
        .await
    }

    pub fn make_premium(&self, id: Uuid) {
        let conn = self.backend.inner.pool().get().unwrap();
        conn.execute(
            "UPDATE profiles SET is_premium_seller = 1 WHERE id = ?1",
            [id.to_string()],
        )
        .unwrap();
    }

    pub fn storage_root(&self) -> &Path {
        self.backend.inner.storage_root()
    }

    /// Objects currently stored in `bucket`.
    pub fn object_count(&self, bucket: &str) -> usize {
        count_files(&self.storage_root().join(bucket))
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

pub fn image(name: &str) -> ImageFile {
    ImageFile {
        name: name.into(),
        content_type: "image/png".into(),
        bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\nfake"),
    }
}

pub async fn settle(store: &SessionStore, phase: Phase) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), store.wait_for(|s| s.phase == phase))
        .await
        .expect("session store never reached the expected phase")
}
