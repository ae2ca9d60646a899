use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{error_from_response, expect_success, is_unauthorized, read_json, HostedBackend};
use crate::backend::{
    AuthApi, AuthEventKind, AuthSubscription, Credentials, Identity, ProfileSeed, RecordsApi,
    Session, SignUpOutcome,
};
use crate::db::models::NewProfile;
use crate::error::{BackendError, BackendResult};

#[derive(Debug, Deserialize)]
struct UserBody {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserBody> for Identity {
    fn from(user: UserBody) -> Self {
        Identity {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserBody,
}

/// Sign-up answers with a session when confirmation is off, or a bare user.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpBody {
    Session(TokenBody),
    User(UserBody),
}

impl HostedBackend {
    fn session_from(&self, body: TokenBody) -> Session {
        Session {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: self.clock.now() + chrono::Duration::seconds(body.expires_in),
            user: body.user.into(),
        }
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> BackendResult<Session> {
        let response = self
            .request(Method::POST, "auth/v1/token?grant_type=refresh_token")
            .await
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let body: TokenBody = read_json(response).await?;
        Ok(self.session_from(body))
    }
}

#[async_trait]
impl AuthApi for HostedBackend {
    async fn sign_up(
        &self,
        credentials: &Credentials,
        seed: Option<&ProfileSeed>,
    ) -> BackendResult<SignUpOutcome> {
        let mut payload = json!({
            "email": credentials.email.trim(),
            "password": credentials.password,
        });
        if let Some(seed) = seed {
            payload["data"] = serde_json::to_value(seed)?;
        }

        let response = self
            .request(Method::POST, "auth/v1/signup")
            .await
            .json(&payload)
            .send()
            .await?;

        let (identity, session) = match read_json::<SignUpBody>(response).await? {
            SignUpBody::Session(body) => {
                let session = self.session_from(body);
                (session.user.clone(), Some(session))
            }
            SignUpBody::User(user) => (user.into(), None),
        };
        tracing::info!("Signed up {} ({})", identity.email, identity.id);

        if let Some(session) = &session {
            self.auth
                .set(AuthEventKind::SignedIn, Some(session.clone()))
                .await;
        }

        if let Some(seed) = seed {
            let row = NewProfile {
                id: identity.id,
                username: seed.username.clone(),
                is_seller: seed.is_seller,
            };
            match self.insert_profile(&row).await {
                Ok(_) => {}
                // A server-side trigger already created it from the metadata
                Err(err) if err.is_unique_violation() => {
                    tracing::debug!("Profile for {} already exists", identity.id);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(SignUpOutcome { identity, session })
    }

    async fn sign_in(&self, credentials: &Credentials) -> BackendResult<Session> {
        let response = self
            .request(Method::POST, "auth/v1/token?grant_type=password")
            .await
            .json(&json!({
                "email": credentials.email.trim(),
                "password": credentials.password,
            }))
            .send()
            .await?;

        let body: TokenBody = match read_json(response).await {
            Ok(body) => body,
            Err(BackendError::Api { status: 400, .. }) => {
                return Err(BackendError::InvalidCredentials)
            }
            Err(err) => return Err(err),
        };

        let session = self.session_from(body);
        tracing::info!("Signed in {}", session.user.email);
        self.auth
            .set(AuthEventKind::SignedIn, Some(session.clone()))
            .await;
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if let Some(session) = self.auth.get().await {
            let response = self
                .request_as(Method::POST, "auth/v1/logout", &session.access_token)
                .send()
                .await?;
            // An already-revoked token still counts as signed out
            if let Err(err) = expect_success(response).await {
                if !is_unauthorized(&err) {
                    return Err(err);
                }
            }
        }
        self.auth.set(AuthEventKind::SignedOut, None).await;
        Ok(())
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        match self.auth.get().await {
            Some(session) if session.is_expired(self.clock.now()) => {
                self.auth.clear().await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let held = self.auth.get().await.ok_or(BackendError::Unauthorized)?;
        let session = self.exchange_refresh_token(&held.refresh_token).await?;
        self.auth
            .set(AuthEventKind::TokenRefreshed, Some(session.clone()))
            .await;
        Ok(session)
    }

    async fn restore_session(&self, saved: Session) -> BackendResult<Option<Session>> {
        if saved.is_expired(self.clock.now()) {
            return match self.exchange_refresh_token(&saved.refresh_token).await {
                Ok(session) => {
                    self.auth
                        .set(AuthEventKind::TokenRefreshed, Some(session.clone()))
                        .await;
                    Ok(Some(session))
                }
                Err(err @ BackendError::Api { .. }) => {
                    tracing::debug!("Saved session could not be refreshed: {}", err);
                    Ok(None)
                }
                Err(err) => Err(err),
            };
        }

        let response = self
            .request_as(Method::GET, "auth/v1/user", &saved.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            let err = error_from_response(response).await;
            if is_unauthorized(&err) {
                return Ok(None);
            }
            return Err(err);
        }

        self.auth
            .set(AuthEventKind::SignedIn, Some(saved.clone()))
            .await;
        Ok(Some(saved))
    }

    fn subscribe(&self) -> AuthSubscription {
        self.auth.subscribe()
    }
}
