use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::backend::{Identity, ImageFile, SharedBackend, POST_IMAGES_BUCKET};
use crate::clock::Clock;
use crate::config::PostsConfig;
use crate::db::models::{NewPost, NewProfile, Post};
use crate::error::{BackendError, FlowError, ValidationErrors};
use crate::media;
use crate::ratelimit::CooldownLimiter;
use crate::saga::Compensations;
use crate::session::{SessionSnapshot, SessionStore};

use super::{image_upload_options, require_user};

/// Signed in, and either not a seller or a premium one. A user whose profile
/// has not loaded may still post; the profile is created on submit.
pub fn can_post(snapshot: &SessionSnapshot) -> bool {
    snapshot.user().is_some()
        && snapshot
            .profile
            .as_ref()
            .map_or(true, |p| !p.is_seller || p.is_premium_seller)
}

/// Draft post: text plus at most one image.
#[derive(Debug, Default)]
pub struct PostComposer {
    content: String,
    image: Option<ImageFile>,
}

impl PostComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn image(&self) -> Option<&ImageFile> {
        self.image.as_ref()
    }

    /// Attach `file`, replacing any earlier image. A rejected file leaves
    /// the composer without an image.
    pub fn attach_image(&mut self, file: ImageFile, max_bytes: usize) -> Result<(), FlowError> {
        if let Err(rejection) = media::validate_image(&file, max_bytes) {
            self.image = None;
            let mut errors = ValidationErrors::new();
            errors.add("image", rejection.to_string());
            return Err(FlowError::Validation(errors));
        }
        self.image = Some(file);
        Ok(())
    }

    pub fn remove_image(&mut self) {
        self.image = None;
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.image.is_none()
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.image = None;
    }
}

pub struct PostFlow {
    backend: SharedBackend,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    limiter: CooldownLimiter,
    duplicate_window: chrono::Duration,
    max_image_bytes: usize,
}

impl PostFlow {
    pub fn new(
        backend: SharedBackend,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        config: &PostsConfig,
    ) -> Self {
        let duplicate_window =
            chrono::Duration::seconds(i64::try_from(config.duplicate_window_secs).unwrap_or(i64::MAX));
        Self {
            limiter: CooldownLimiter::new(Duration::from_millis(config.cooldown_ms), clock.clone()),
            backend,
            store,
            clock,
            duplicate_window,
            max_image_bytes: config.max_image_bytes,
        }
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    /// Publish the composer's content. On success the composer is cleared and
    /// `on_created` runs with the new post; on failure nothing it uploaded
    /// is left behind.
    pub async fn submit(
        &self,
        composer: &mut PostComposer,
        on_created: impl FnOnce(&Post),
    ) -> Result<Post, FlowError> {
        let snapshot = self.store.snapshot();
        let user = require_user(&snapshot)?;
        if !can_post(&snapshot) {
            return Err(FlowError::NotPermitted(
                "Only premium sellers can create posts. Upgrade to premium to share posts.",
            ));
        }
        if composer.is_empty() {
            let mut errors = ValidationErrors::new();
            errors.add("content", "Post cannot be empty. Please add text or an image.");
            return Err(FlowError::Validation(errors));
        }
        if let Err(retry_in) = self.limiter.try_acquire() {
            tracing::debug!("Post refused, cooling down for {:?}", retry_in);
            return Err(FlowError::CoolingDown { retry_in });
        }

        self.ensure_profile(&user).await?;

        let content = composer.content.trim().to_string();
        let content = (!content.is_empty()).then_some(content);

        let mut compensations = Compensations::new();
        let image_url = match composer.image.as_ref() {
            Some(image) => Some(self.upload_image(&user, image, &mut compensations).await?),
            None => None,
        };

        match self.publish(&user, content, image_url).await {
            Ok(post) => {
                compensations.commit();
                tracing::info!("Post {} created by {}", post.id, user.id);
                composer.clear();
                on_created(&post);
                Ok(post)
            }
            Err(e) => {
                compensations.unwind().await;
                Err(e)
            }
        }
    }

    async fn publish(
        &self,
        user: &Identity,
        content: Option<String>,
        image_url: Option<String>,
    ) -> Result<Post, FlowError> {
        if let Some(text) = content.as_deref() {
            let since = self.clock.now() - self.duplicate_window;
            match self.backend.recent_duplicate_posts(user.id, text, since).await {
                Ok(existing) if !existing.is_empty() => return Err(FlowError::DuplicateContent),
                Ok(_) => {}
                // The insert below is still guarded by the backend's own constraints
                Err(e) => tracing::warn!("Duplicate check failed, continuing: {}", e),
            }
        }

        let new_post = NewPost {
            user_id: user.id,
            content,
            image_url,
        };
        self.backend
            .insert_post(&new_post)
            .await
            .map_err(classify_insert_error)
    }

    async fn upload_image(
        &self,
        user: &Identity,
        image: &ImageFile,
        compensations: &mut Compensations,
    ) -> Result<String, FlowError> {
        let path = media::post_image_path(
            user.id,
            self.clock.now().timestamp_millis(),
            &media::random_suffix(),
            &media::extension(image),
        );
        let options = image_upload_options(&image.content_type, false);
        let stored = self
            .backend
            .upload(POST_IMAGES_BUCKET, &path, image, &options)
            .await
            .map_err(|source| FlowError::Upload {
                file: image.name.clone(),
                source,
            })?;

        let backend = self.backend.clone();
        let undo_path = stored.clone();
        compensations.push(format!("remove post image {}", stored), async move {
            backend.remove(POST_IMAGES_BUCKET, &[undo_path]).await
        });

        Ok(self.backend.public_url(POST_IMAGES_BUCKET, &stored))
    }

    /// Make sure a profile row exists for `user`, creating a minimal one
    /// named after the email's local part when it does not.
    async fn ensure_profile(&self, user: &Identity) -> Result<(), FlowError> {
        let existing = self
            .backend
            .find_profile(user.id)
            .await
            .map_err(|e| FlowError::backend("Error checking profile", e))?;
        if existing.is_some() {
            return Ok(());
        }

        tracing::info!("No profile for {}, creating one", user.id);
        let mut candidate = NewProfile {
            id: user.id,
            username: fallback_username(&user.email, user.id),
            is_seller: false,
        };
        let created = match self.backend.insert_profile(&candidate).await {
            Err(e) if e.is_unique_violation() => {
                candidate.username = id_username(user.id);
                self.backend.insert_profile(&candidate).await
            }
            other => other,
        };
        created.map_err(|e| {
            FlowError::backend("Failed to create user profile. Please try again.", e)
        })?;

        self.store.fetch_profile().await;
        Ok(())
    }
}

fn classify_insert_error(err: BackendError) -> FlowError {
    if err.is_foreign_key_violation() {
        FlowError::ProfileMissing(err)
    } else if err.is_unique_violation() {
        FlowError::Conflict(err)
    } else {
        FlowError::backend("Failed to create post", err)
    }
}

fn fallback_username(email: &str, id: Uuid) -> String {
    match email.split('@').next().map(str::trim) {
        Some(local) if !local.is_empty() => local.to_string(),
        _ => id_username(id),
    }
}

fn id_username(id: Uuid) -> String {
    let simple = id.simple().to_string();
    format!("user_{}", &simple[..8])
}
