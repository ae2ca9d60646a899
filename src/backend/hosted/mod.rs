//! HTTP client for a hosted backend-as-a-service exposing `/auth/v1`,
//! `/rest/v1` (PostgREST) and `/storage/v1`.

mod auth;
mod records;
mod storage;

use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::AuthState;
use crate::clock::{Clock, SystemClock};
use crate::error::{BackendError, BackendResult};

pub struct HostedBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    auth: AuthState,
    clock: Arc<dyn Clock>,
}

impl HostedBackend {
    /// Both values are required; an empty one is refused up front.
    pub fn new(url: &str, anon_key: &str) -> BackendResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| BackendError::Invalid(format!("invalid backend URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BackendError::Invalid(format!(
                "backend URL must be http(s): {}",
                url
            )));
        }
        if anon_key.trim().is_empty() {
            return Err(BackendError::Invalid("backend anon key is empty".into()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            auth: AuthState::new(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Request carrying the API key and the held access token (anon key when signed out).
    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = match self.auth.get().await {
            Some(session) => session.access_token,
            None => self.anon_key.clone(),
        };
        self.request_as(method, path, &bearer)
    }

    fn request_as(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }
}

/// The shapes error bodies come in across the three services.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default, rename = "statusCode")]
    status_code: Option<serde_json::Value>,
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turn a non-success response into a `BackendError`.
async fn error_from_response(response: Response) -> BackendError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    // Auth puts the HTTP status in a numeric `code`; only string codes are backend codes
    let code = body
        .code
        .as_ref()
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .or(body.error_code.clone())
        .or_else(|| body.status_code.as_ref().and_then(value_as_string));

    if code.as_deref() == Some("409") {
        return BackendError::ObjectExists;
    }

    let message = body
        .message
        .or(body.msg)
        .or(body.error_description)
        .or(body.error)
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.to_string()
            } else {
                text.clone()
            }
        });

    tracing::debug!("Backend error {}: {} ({:?})", status, message, code);
    BackendError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

async fn expect_success(response: Response) -> BackendResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(response).await)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    let response = expect_success(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Exact count from a `Content-Range: 0-9/42` (or `*/42`) header.
fn parse_content_range(response: &Response) -> BackendResult<i64> {
    response
        .headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.parse().ok())
        .ok_or_else(|| BackendError::Invalid("missing exact count in Content-Range".into()))
}

fn is_unauthorized(err: &BackendError) -> bool {
    matches!(err, BackendError::Api { status, .. } if *status == StatusCode::UNAUTHORIZED.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_both_settings() {
        assert!(HostedBackend::new("https://abc.example.co", "").is_err());
        assert!(HostedBackend::new("not a url", "key").is_err());
        assert!(HostedBackend::new("ftp://abc.example.co", "key").is_err());
        let backend = HostedBackend::new("https://abc.example.co/", "key").unwrap();
        assert_eq!(backend.base_url(), "https://abc.example.co");
        assert_eq!(
            backend.endpoint("/rest/v1/posts"),
            "https://abc.example.co/rest/v1/posts"
        );
    }

    #[test]
    fn numeric_code_is_not_an_error_code() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#)
                .unwrap();
        let code = body
            .code
            .as_ref()
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .or(body.error_code.clone());
        assert_eq!(code.as_deref(), Some("invalid_credentials"));
    }
}
