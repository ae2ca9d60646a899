use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;

use super::{expect_success, HostedBackend};
use crate::backend::{ImageFile, StorageApi, UploadOptions};
use crate::error::BackendResult;

#[async_trait]
impl StorageApi for HostedBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        file: &ImageFile,
        options: &UploadOptions,
    ) -> BackendResult<String> {
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| file.content_type.clone());

        let response = self
            .request(Method::POST, &format!("storage/v1/object/{}/{}", bucket, path))
            .await
            .header("Content-Type", content_type)
            .header("Cache-Control", format!("max-age={}", options.cache_control))
            .header("x-upsert", options.upsert.to_string())
            .body(file.bytes.clone())
            .send()
            .await?;
        expect_success(response).await?;

        tracing::debug!("Uploaded {}/{} ({} bytes)", bucket, path, file.size());
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let response = self
            .request(Method::DELETE, &format!("storage/v1/object/{}", bucket))
            .await
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }
}
