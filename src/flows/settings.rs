use std::sync::Arc;

use crate::backend::{ImageFile, SharedBackend, AVATARS_BUCKET};
use crate::catalog::{self, Options};
use crate::clock::{format_timestamp, Clock};
use crate::db::models::{Profile, ProfilePatch};
use crate::error::{BackendError, FlowError, ValidationErrors};
use crate::media;
use crate::saga::Compensations;
use crate::session::SessionStore;

use super::{image_upload_options, require_user};

const MAX_BIO_LEN: usize = 500;
const MAX_USERNAME_LEN: usize = 50;

/// "General" section of the settings page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralSettings {
    pub username: String,
    pub bio: String,
    pub country: String,
}

impl GeneralSettings {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            username: profile.username.clone(),
            bio: profile.bio.clone().unwrap_or_default(),
            country: profile.country.clone().unwrap_or_default(),
        }
    }

    pub fn to_patch(&self) -> Result<ProfilePatch, FlowError> {
        let mut errors = ValidationErrors::new();

        let username = self.username.trim();
        if username.is_empty() {
            errors.add("username", "Username is required.");
        } else if username.chars().any(char::is_whitespace) {
            errors.add("username", "Username cannot contain spaces.");
        } else if username.chars().count() > MAX_USERNAME_LEN {
            errors.add(
                "username",
                format!("Username must be at most {} characters.", MAX_USERNAME_LEN),
            );
        }

        let bio = self.bio.trim();
        if bio.chars().count() > MAX_BIO_LEN {
            errors.add("bio", format!("Bio must be at most {} characters.", MAX_BIO_LEN));
        }

        let country = self.country.trim().to_ascii_uppercase();
        if !country.is_empty() && !catalog::is_country_code(&country) {
            errors.add("country", "Please select a valid country.");
        }

        errors.into_result()?;
        Ok(ProfilePatch {
            username: Some(username.to_string()),
            bio: Some(non_empty(bio)),
            country: Some(non_empty(&country)),
            ..ProfilePatch::default()
        })
    }
}

/// "About me" section: catalog-coded attributes. Empty strings mean unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AboutSettings {
    pub age: String,
    pub gender: String,
    pub ethnicity: String,
    pub body_size: String,
    pub shoe_size: String,
    pub will_show_face: String,
    pub occupation: String,
    pub tattoos: String,
    pub piercings: String,
    pub hair_color: String,
    pub eye_color: String,
    pub smokes: String,
    pub drinks: String,
    pub height: String,
    pub relationship_status: String,
    pub accepted_payments: Vec<String>,
    pub what_i_offer: Vec<String>,
}

impl AboutSettings {
    pub fn from_profile(profile: &Profile) -> Self {
        let get = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            age: get(&profile.age),
            gender: get(&profile.gender),
            ethnicity: get(&profile.ethnicity),
            body_size: get(&profile.body_size),
            shoe_size: get(&profile.shoe_size),
            will_show_face: get(&profile.will_show_face),
            occupation: get(&profile.occupation),
            tattoos: get(&profile.tattoos),
            piercings: get(&profile.piercings),
            hair_color: get(&profile.hair_color),
            eye_color: get(&profile.eye_color),
            smokes: get(&profile.smokes),
            drinks: get(&profile.drinks),
            height: get(&profile.height),
            relationship_status: get(&profile.relationship_status),
            accepted_payments: profile.accepted_payments.clone(),
            what_i_offer: profile.what_i_offer.clone(),
        }
    }

    pub fn to_patch(&self) -> Result<ProfilePatch, FlowError> {
        let mut errors = ValidationErrors::new();
        let mut pick = |field: &'static str, value: &str, options: Options| {
            let value = value.trim();
            if value.is_empty() {
                Some(None)
            } else if catalog::contains(options, value) {
                Some(Some(value.to_string()))
            } else {
                errors.add(field, format!("Please choose a valid {}.", field.replace('_', " ")));
                None
            }
        };

        let patch = ProfilePatch {
            age: pick("age", &self.age, catalog::AGES),
            gender: pick("gender", &self.gender, catalog::GENDERS),
            ethnicity: pick("ethnicity", &self.ethnicity, catalog::ETHNICITIES),
            body_size: pick("body_size", &self.body_size, catalog::BODY_SIZES),
            shoe_size: pick("shoe_size", &self.shoe_size, catalog::SHOE_SIZES),
            will_show_face: pick("will_show_face", &self.will_show_face, catalog::YES_NO),
            occupation: pick("occupation", &self.occupation, catalog::OCCUPATIONS),
            tattoos: pick("tattoos", &self.tattoos, catalog::YES_NO),
            piercings: pick("piercings", &self.piercings, catalog::YES_NO),
            hair_color: pick("hair_color", &self.hair_color, catalog::HAIR_COLORS),
            eye_color: pick("eye_color", &self.eye_color, catalog::EYE_COLORS),
            smokes: pick("smokes", &self.smokes, catalog::YES_NO),
            drinks: pick("drinks", &self.drinks, catalog::YES_NO),
            height: pick("height", &self.height, catalog::HEIGHTS),
            relationship_status: pick(
                "relationship_status",
                &self.relationship_status,
                catalog::RELATIONSHIP_STATUSES,
            ),
            ..ProfilePatch::default()
        };

        let payments = dedup(&self.accepted_payments);
        if payments.iter().any(|c| !catalog::contains(catalog::PAYMENT_METHODS, c)) {
            errors.add("accepted_payments", "Please choose valid payment methods.");
        }
        let offers = dedup(&self.what_i_offer);
        if offers.iter().any(|c| !catalog::is_offer_code(c)) {
            errors.add("what_i_offer", "Please choose valid items to offer.");
        }

        errors.into_result()?;
        Ok(ProfilePatch {
            accepted_payments: Some(payments),
            what_i_offer: Some(offers),
            ..patch
        })
    }
}

pub struct SettingsFlow {
    backend: SharedBackend,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    max_avatar_bytes: usize,
}

impl SettingsFlow {
    pub fn new(
        backend: SharedBackend,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        max_avatar_bytes: usize,
    ) -> Self {
        Self {
            backend,
            store,
            clock,
            max_avatar_bytes,
        }
    }

    pub async fn save_general(&self, settings: &GeneralSettings) -> Result<Profile, FlowError> {
        let patch = settings.to_patch()?;
        self.apply(patch, "Error updating profile").await
    }

    pub async fn save_about(&self, settings: &AboutSettings) -> Result<Profile, FlowError> {
        let patch = settings.to_patch()?;
        self.apply(patch, "Error updating profile").await
    }

    async fn apply(&self, mut patch: ProfilePatch, context: &'static str) -> Result<Profile, FlowError> {
        let user = require_user(&self.store.snapshot())?;
        patch.updated_at = Some(format_timestamp(&self.clock.now()));

        let profile = self
            .backend
            .update_profile(user.id, &patch)
            .await
            .map_err(|e| update_error(context, e))?;
        tracing::info!("Profile {} updated ({})", user.id, patch.columns().join(", "));
        self.store.fetch_profile().await;
        Ok(profile)
    }

    /// Store a new avatar and point the profile at it. The previous avatar
    /// object is removed afterwards, best effort.
    pub async fn upload_avatar(&self, file: ImageFile) -> Result<Profile, FlowError> {
        let snapshot = self.store.snapshot();
        let user = require_user(&snapshot)?;
        if let Err(rejection) = media::validate_avatar(&file, self.max_avatar_bytes) {
            let mut errors = ValidationErrors::new();
            errors.add("avatar", rejection.to_string());
            return Err(FlowError::Validation(errors));
        }
        let previous = snapshot.profile.as_ref().and_then(|p| p.avatar_url.clone());

        let path = media::avatar_path(user.id, &media::random_suffix(), &media::extension(&file));
        let options = image_upload_options(&file.content_type, true);
        let stored = self
            .backend
            .upload(AVATARS_BUCKET, &path, &file, &options)
            .await
            .map_err(|e| FlowError::backend("Error uploading avatar", e))?;

        let mut compensations = Compensations::new();
        let backend = self.backend.clone();
        let undo_path = stored.clone();
        compensations.push(format!("remove avatar {}", stored), async move {
            backend.remove(AVATARS_BUCKET, &[undo_path]).await
        });

        let patch = ProfilePatch {
            avatar_url: Some(Some(self.backend.public_url(AVATARS_BUCKET, &stored))),
            updated_at: Some(format_timestamp(&self.clock.now())),
            ..ProfilePatch::default()
        };
        let profile = match self.backend.update_profile(user.id, &patch).await {
            Ok(profile) => {
                compensations.commit();
                profile
            }
            Err(e) => {
                compensations.unwind().await;
                return Err(FlowError::backend("Error uploading avatar", e));
            }
        };

        if let Some(old) = previous
            .as_deref()
            .and_then(|url| media::object_path_from_public_url(url, AVATARS_BUCKET))
            .filter(|old| *old != stored)
        {
            if let Err(e) = self.backend.remove(AVATARS_BUCKET, &[old.clone()]).await {
                tracing::warn!("Could not remove previous avatar {}: {}", old, e);
            }
        }

        tracing::info!("Avatar updated for {}", user.id);
        self.store.fetch_profile().await;
        Ok(profile)
    }

    /// Clear the avatar reference, then delete the object it pointed at.
    pub async fn remove_avatar(&self) -> Result<Profile, FlowError> {
        let snapshot = self.store.snapshot();
        let user = require_user(&snapshot)?;
        let current = match snapshot.profile.as_ref() {
            Some(profile) => profile.avatar_url.clone(),
            None => self
                .backend
                .profile(user.id)
                .await
                .map_err(|e| FlowError::backend("Error deleting avatar", e))?
                .avatar_url,
        };
        let Some(url) = current else {
            let mut errors = ValidationErrors::new();
            errors.add("avatar", "There is no avatar to delete.");
            return Err(FlowError::Validation(errors));
        };

        let patch = ProfilePatch {
            avatar_url: Some(None),
            updated_at: Some(format_timestamp(&self.clock.now())),
            ..ProfilePatch::default()
        };
        let profile = self
            .backend
            .update_profile(user.id, &patch)
            .await
            .map_err(|e| FlowError::backend("Error deleting avatar", e))?;

        match media::object_path_from_public_url(&url, AVATARS_BUCKET) {
            Some(path) => {
                if let Err(e) = self.backend.remove(AVATARS_BUCKET, &[path.clone()]).await {
                    tracing::warn!("Avatar object {} left behind: {}", path, e);
                }
            }
            None => tracing::warn!("Could not derive storage path from {}", url),
        }

        tracing::info!("Avatar removed for {}", user.id);
        self.store.fetch_profile().await;
        Ok(profile)
    }
}

fn update_error(context: &'static str, err: BackendError) -> FlowError {
    if err.is_unique_violation() {
        let mut errors = ValidationErrors::new();
        errors.add("username", "That username is already taken.");
        FlowError::Validation(errors)
    } else {
        FlowError::backend(context, err)
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn dedup(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn general_patch_normalizes_and_clears() {
        let settings = GeneralSettings {
            username: " ana ".into(),
            bio: "  ".into(),
            country: "pt".into(),
        };
        let patch = settings.to_patch().unwrap();
        assert_eq!(patch.username.as_deref(), Some("ana"));
        assert_eq!(patch.bio, Some(None));
        assert_eq!(patch.country, Some(Some("PT".into())));
        assert!(patch.avatar_url.is_none());
    }

    #[test]
    fn general_patch_rejects_bad_values() {
        let settings = GeneralSettings {
            username: "".into(),
            bio: "x".repeat(501),
            country: "Portugal".into(),
        };
        let FlowError::Validation(errors) = settings.to_patch().unwrap_err() else {
            panic!("expected validation error");
        };
        assert!(errors.has("username"));
        assert!(errors.has("bio"));
        assert!(errors.has("country"));
    }

    #[test]
    fn about_patch_checks_catalogs() {
        let mut about = AboutSettings::from_profile(&Profile::minimal(Uuid::nil(), "ana", true));
        about.will_show_face = "1".into();
        about.accepted_payments = vec!["8".into(), "8".into(), "13".into()];
        about.what_i_offer = vec!["10".into()];
        let patch = about.to_patch().unwrap();
        assert_eq!(patch.will_show_face, Some(Some("1".into())));
        assert_eq!(patch.age, Some(None));
        assert_eq!(patch.accepted_payments, Some(vec!["8".into(), "13".into()]));
        assert_eq!(patch.what_i_offer, Some(vec!["10".into()]));

        about.hair_color = "plaid".into();
        about.what_i_offer = vec!["99999".into()];
        let FlowError::Validation(errors) = about.to_patch().unwrap_err() else {
            panic!("expected validation error");
        };
        assert!(errors.has("hair_color"));
        assert!(errors.has("what_i_offer"));
    }

    #[test]
    fn about_patch_touches_only_about_columns() {
        let about = AboutSettings::default();
        let columns = about.to_patch().unwrap().columns();
        assert!(!columns.contains(&"username".to_string()));
        assert!(!columns.contains(&"avatar_url".to_string()));
        assert!(columns.contains(&"what_i_offer".to_string()));
    }

    #[test]
    fn unique_violation_becomes_username_error() {
        let err = update_error(
            "Error updating profile",
            BackendError::Constraint {
                code: crate::error::codes::UNIQUE_VIOLATION,
                message: "dup".into(),
            },
        );
        assert_eq!(err.to_string(), "That username is already taken.");
    }
}
