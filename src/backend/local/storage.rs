use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::LocalBackend;
use crate::backend::{ImageFile, StorageApi, UploadOptions};
use crate::error::{BackendError, BackendResult};

impl LocalBackend {
    /// Filesystem location of an object. Only plain relative paths are accepted.
    fn object_path(&self, bucket: &str, path: &str) -> BackendResult<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(BackendError::Invalid(format!("invalid bucket: {}", bucket)));
        }
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(BackendError::Invalid(format!("invalid object path: {}", path)));
        }
        Ok(self.storage_root.join(bucket).join(relative))
    }

    pub fn object_exists(&self, bucket: &str, path: &str) -> bool {
        self.object_path(bucket, path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }
}

#[async_trait]
impl StorageApi for LocalBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        file: &ImageFile,
        options: &UploadOptions,
    ) -> BackendResult<String> {
        let target = self.object_path(bucket, path)?;
        if !options.upsert && tokio::fs::try_exists(&target).await? {
            return Err(BackendError::ObjectExists);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &file.bytes).await?;
        tracing::debug!(
            "Stored {}/{} ({} bytes, {})",
            bucket,
            path,
            file.size(),
            options.content_type.as_deref().unwrap_or(&file.content_type)
        );
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.public_base_url, bucket, path
        )
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()> {
        for path in paths {
            let target = self.object_path(bucket, path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => tracing::debug!("Removed {}/{}", bucket, path),
                // Removing something already gone is not an error
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn png(name: &str) -> ImageFile {
        ImageFile {
            name: name.into(),
            content_type: "image/png".into(),
            bytes: Bytes::from_static(b"\x89PNG fake"),
        }
    }

    #[tokio::test]
    async fn upload_then_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalBackend::in_memory(tmp.path()).unwrap();
        let opts = UploadOptions::default();

        backend
            .upload("avatars", "u1/a.png", &png("a.png"), &opts)
            .await
            .unwrap();
        assert!(backend.object_exists("avatars", "u1/a.png"));

        backend
            .remove("avatars", &["u1/a.png".to_string(), "missing.png".to_string()])
            .await
            .unwrap();
        assert!(!backend.object_exists("avatars", "u1/a.png"));
    }

    #[tokio::test]
    async fn existing_object_needs_upsert() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalBackend::in_memory(tmp.path()).unwrap();
        let mut opts = UploadOptions::default();
        backend.upload("b", "x.png", &png("x"), &opts).await.unwrap();

        let err = backend
            .upload("b", "x.png", &png("x"), &opts)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("409"));

        opts.upsert = true;
        backend.upload("b", "x.png", &png("x"), &opts).await.unwrap();
    }

    #[tokio::test]
    async fn escaping_paths_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalBackend::in_memory(tmp.path()).unwrap();
        let opts = UploadOptions::default();
        for bad in ["../x.png", "/etc/x.png", "a/../../x.png", ""] {
            let err = backend.upload("b", bad, &png("x"), &opts).await.unwrap_err();
            assert!(matches!(err, BackendError::Invalid(_)), "{bad}");
        }
    }

    #[test]
    fn public_url_follows_storage_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalBackend::in_memory(tmp.path())
            .unwrap()
            .with_public_base_url("https://cdn.example.com");
        assert_eq!(
            backend.public_url("post-images", "u/1.png"),
            "https://cdn.example.com/storage/v1/object/public/post-images/u/1.png"
        );
    }
}
