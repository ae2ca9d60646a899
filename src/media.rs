//! Image attachments: loading, type/size checks, storage paths, and the
//! host allow-list the display layer renders from.

use std::path::Path;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use url::Url;
use uuid::Uuid;

use crate::backend::ImageFile;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub const AVATAR_CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Path prefix under which storage serves public objects.
pub const PUBLIC_OBJECT_PREFIX: &str = "/storage/v1/object/public/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageRejection {
    #[error("Please upload an image file.")]
    NotAnImage,
    #[error("Please upload a valid image file (PNG, JPEG, GIF, or WebP)")]
    UnsupportedAvatarType,
    #[error("Image size must be less than {}MB.", .limit / (1024 * 1024))]
    TooLarge { limit: usize },
}

/// Any `image/*` type within `max_bytes`.
pub fn validate_image(file: &ImageFile, max_bytes: usize) -> Result<(), ImageRejection> {
    if !file.content_type.starts_with("image/") {
        return Err(ImageRejection::NotAnImage);
    }
    if file.size() > max_bytes {
        return Err(ImageRejection::TooLarge { limit: max_bytes });
    }
    Ok(())
}

/// Avatars accept a narrower set of types.
pub fn validate_avatar(file: &ImageFile, max_bytes: usize) -> Result<(), ImageRejection> {
    if !AVATAR_CONTENT_TYPES.contains(&file.content_type.as_str()) {
        return Err(ImageRejection::UnsupportedAvatarType);
    }
    if file.size() > max_bytes {
        return Err(ImageRejection::TooLarge { limit: max_bytes });
    }
    Ok(())
}

/// Read a file from disk, guessing its content type from the extension.
pub fn load_image(path: &Path) -> std::io::Result<ImageFile> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(ImageFile {
        name,
        content_type,
        bytes: Bytes::from(bytes),
    })
}

/// Extension for the stored object: the file's own, else one implied by its type.
pub fn extension(file: &ImageFile) -> String {
    if let Some((stem, ext)) = file.name.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() {
            return ext.to_ascii_lowercase();
        }
    }
    mime_guess::get_mime_extensions_str(&file.content_type)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| "bin".to_string())
}

pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// `<user>/<millis>-<random>.<ext>`
pub fn post_image_path(user_id: Uuid, millis: i64, random: &str, ext: &str) -> String {
    format!("{}/{}-{}.{}", user_id, millis, random, ext)
}

/// `<seller>/<listing>/<millis>-<index>.<ext>`
pub fn listing_image_path(
    seller_id: Uuid,
    listing_id: Uuid,
    millis: i64,
    index: usize,
    ext: &str,
) -> String {
    format!("{}/{}/{}-{}.{}", seller_id, listing_id, millis, index, ext)
}

/// `<user>-<random>.<ext>`, flat in the bucket.
pub fn avatar_path(user_id: Uuid, random: &str, ext: &str) -> String {
    format!("{}-{}.{}", user_id, random, ext)
}

/// Object path inside `bucket` for one of its public URLs.
pub fn object_path_from_public_url(url: &str, bucket: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let marker = format!("{}{}/", PUBLIC_OBJECT_PREFIX, bucket);
    parsed
        .path()
        .split_once(&marker)
        .map(|(_, rest)| rest.to_string())
        .filter(|rest| !rest.is_empty())
        .or_else(|| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
                .filter(|name| !name.is_empty())
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostRule {
    host: String,
    path_prefix: Option<String>,
}

/// Which remote image URLs may be rendered.
#[derive(Debug, Clone, Default)]
pub struct ImageHostPolicy {
    rules: Vec<HostRule>,
}

impl ImageHostPolicy {
    /// Explicit hosts allow any path; the backend's own host is limited to
    /// public storage objects.
    pub fn new(allowed_hosts: &[String], backend_url: Option<&str>) -> Self {
        let mut rules: Vec<HostRule> = allowed_hosts
            .iter()
            .map(|host| HostRule {
                host: host.to_ascii_lowercase(),
                path_prefix: None,
            })
            .collect();

        if let Some(host) = backend_url
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        {
            rules.push(HostRule {
                host,
                path_prefix: Some(PUBLIC_OBJECT_PREFIX.to_string()),
            });
        }

        Self { rules }
    }

    pub fn allows(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        self.rules.iter().any(|rule| {
            rule.host == host
                && rule
                    .path_prefix
                    .as_deref()
                    .map_or(true, |prefix| parsed.path().starts_with(prefix))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content_type: &str, size: usize) -> ImageFile {
        ImageFile {
            name: name.into(),
            content_type: content_type.into(),
            bytes: Bytes::from(vec![0u8; size]),
        }
    }

    #[test]
    fn images_must_be_image_typed_and_small() {
        assert!(validate_image(&file("a.png", "image/png", 10), MAX_IMAGE_BYTES).is_ok());
        assert_eq!(
            validate_image(&file("a.pdf", "application/pdf", 10), MAX_IMAGE_BYTES),
            Err(ImageRejection::NotAnImage)
        );
        let err = validate_image(&file("a.png", "image/png", MAX_IMAGE_BYTES + 1), MAX_IMAGE_BYTES)
            .unwrap_err();
        assert_eq!(err.to_string(), "Image size must be less than 5MB.");
        assert!(validate_image(&file("a.png", "image/png", MAX_IMAGE_BYTES), MAX_IMAGE_BYTES).is_ok());
    }

    #[test]
    fn avatars_reject_other_image_types() {
        assert_eq!(
            validate_avatar(&file("a.bmp", "image/bmp", 10), MAX_IMAGE_BYTES),
            Err(ImageRejection::UnsupportedAvatarType)
        );
        assert!(validate_avatar(&file("a.webp", "image/webp", 10), MAX_IMAGE_BYTES).is_ok());
    }

    #[test]
    fn extension_prefers_file_name() {
        assert_eq!(extension(&file("Photo.JPG", "image/jpeg", 1)), "jpg");
        assert_eq!(extension(&file("blob", "image/png", 1)), "png");
        assert_eq!(extension(&file(".hidden", "application/x-unknown-thing", 1)), "bin");
    }

    #[test]
    fn storage_paths_are_namespaced() {
        let user = Uuid::nil();
        let listing = Uuid::from_u128(1);
        assert_eq!(
            listing_image_path(user, listing, 1700, 3, "png"),
            format!("{}/{}/1700-3.png", user, listing)
        );
        assert_eq!(
            post_image_path(user, 1700, "abc", "jpg"),
            format!("{}/1700-abc.jpg", user)
        );
        assert_eq!(avatar_path(user, "r", "gif"), format!("{}-r.gif", user));
    }

    #[test]
    fn object_path_recovered_from_public_url() {
        assert_eq!(
            object_path_from_public_url(
                "https://x.test/storage/v1/object/public/avatars/u-1.png",
                "avatars"
            )
            .as_deref(),
            Some("u-1.png")
        );
        assert_eq!(
            object_path_from_public_url("https://elsewhere.test/pics/u-2.png", "avatars").as_deref(),
            Some("u-2.png")
        );
        assert_eq!(object_path_from_public_url("not a url", "avatars"), None);
    }

    #[test]
    fn host_policy_limits_backend_to_public_objects() {
        let policy = ImageHostPolicy::new(
            &["flagsapi.com".to_string()],
            Some("https://abc.supabase.co"),
        );
        assert!(policy.allows("https://flagsapi.com/US/flat/64.png"));
        assert!(policy.allows("https://abc.supabase.co/storage/v1/object/public/avatars/a.png"));
        assert!(!policy.allows("https://abc.supabase.co/rest/v1/profiles"));
        assert!(!policy.allows("https://evil.test/a.png"));
        assert!(!policy.allows("data:image/png;base64,AAAA"));
    }

    #[test]
    fn random_suffix_is_short_and_varied() {
        let a = random_suffix();
        assert_eq!(a.len(), 11);
        assert_ne!(a, random_suffix());
    }
}
