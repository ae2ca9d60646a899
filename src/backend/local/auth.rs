use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{generate_token, uuid_column, LocalBackend};
use crate::backend::{
    AuthApi, AuthEventKind, AuthSubscription, Credentials, Identity, ProfileSeed, Session,
    SignUpOutcome,
};
use crate::clock::{format_timestamp, parse_timestamp};
use crate::error::{BackendError, BackendResult};

const MIN_PASSWORD_LEN: usize = 6;

impl LocalBackend {
    /// Write a fresh session row for `identity`.
    fn issue_session(&self, conn: &Connection, identity: Identity) -> BackendResult<Session> {
        let now = self.clock.now();
        let session = Session {
            access_token: generate_token(),
            refresh_token: generate_token(),
            expires_at: now + self.session_ttl,
            user: identity,
        };
        conn.execute(
            "INSERT INTO sessions (access_token, refresh_token, user_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.access_token,
                session.refresh_token,
                session.user.id.to_string(),
                format_timestamp(&session.expires_at),
                format_timestamp(&now),
            ],
        )?;
        Ok(session)
    }

    /// Swap the session holding `refresh_token` for a new one.
    fn rotate_session(&self, conn: &Connection, refresh_token: &str) -> BackendResult<Session> {
        let identity = conn
            .query_row(
                "SELECT u.id, u.email FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.refresh_token = ?1",
                params![refresh_token],
                |row| {
                    Ok(Identity {
                        id: uuid_column(row, 0)?,
                        email: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(BackendError::Unauthorized)?;

        conn.execute(
            "DELETE FROM sessions WHERE refresh_token = ?1",
            params![refresh_token],
        )?;
        self.issue_session(conn, identity)
    }
}

#[async_trait]
impl AuthApi for LocalBackend {
    async fn sign_up(
        &self,
        credentials: &Credentials,
        seed: Option<&ProfileSeed>,
    ) -> BackendResult<SignUpOutcome> {
        let email = credentials.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(BackendError::Invalid("Unable to validate email address".into()));
        }
        if credentials.password.len() < MIN_PASSWORD_LEN {
            return Err(BackendError::Invalid(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let hash = bcrypt::hash(&credentials.password, self.bcrypt_cost)
            .map_err(|e| BackendError::Invalid(format!("Failed to hash password: {}", e)))?;
        let identity = Identity {
            id: Uuid::new_v4(),
            email,
        };
        let now = self.now();

        // The connection goes back to the pool before subscribers hear about it
        let session = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![identity.id.to_string(), identity.email, hash, now],
            )
            .map_err(|e| match BackendError::from(e) {
                err if err.is_unique_violation() => BackendError::Api {
                    status: 422,
                    code: Some("user_already_exists".into()),
                    message: "User already registered".into(),
                },
                err => err,
            })?;

            // Identity and profile land together or not at all
            if let Some(seed) = seed {
                tx.execute(
                    "INSERT INTO profiles (id, username, is_seller, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![identity.id.to_string(), seed.username, seed.is_seller, now],
                )?;
            }

            let session = self.issue_session(&tx, identity.clone())?;
            tx.commit()?;
            session
        };

        tracing::info!("Signed up {} ({})", identity.email, identity.id);
        self.auth
            .set(AuthEventKind::SignedIn, Some(session.clone()))
            .await;

        Ok(SignUpOutcome {
            identity,
            session: Some(session),
        })
    }

    async fn sign_in(&self, credentials: &Credentials) -> BackendResult<Session> {
        let email = credentials.email.trim().to_lowercase();
        let session = {
            let conn = self.pool.get()?;
            let row = conn
                .query_row(
                    "SELECT id, email, password_hash FROM users WHERE email = ?1",
                    params![email],
                    |row| {
                        Ok((
                            Identity {
                                id: uuid_column(row, 0)?,
                                email: row.get(1)?,
                            },
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            let (identity, hash) = row.ok_or(BackendError::InvalidCredentials)?;
            if !bcrypt::verify(&credentials.password, &hash).unwrap_or(false) {
                return Err(BackendError::InvalidCredentials);
            }
            self.issue_session(&conn, identity)?
        };
        tracing::info!("Signed in {}", session.user.email);
        self.auth
            .set(AuthEventKind::SignedIn, Some(session.clone()))
            .await;
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if let Some(session) = self.auth.get().await {
            let conn = self.pool.get()?;
            conn.execute(
                "DELETE FROM sessions WHERE access_token = ?1",
                params![session.access_token],
            )?;
            tracing::info!("Signed out {}", session.user.email);
        }
        self.auth.set(AuthEventKind::SignedOut, None).await;
        Ok(())
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        match self.auth.get().await {
            Some(session) if session.is_expired(self.clock.now()) => {
                tracing::debug!("Held session expired for {}", session.user.email);
                self.auth.clear().await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let held = self.auth.get().await.ok_or(BackendError::Unauthorized)?;
        let session = self.rotate_session(&*self.pool.get()?, &held.refresh_token)?;
        self.auth
            .set(AuthEventKind::TokenRefreshed, Some(session.clone()))
            .await;
        Ok(session)
    }

    async fn restore_session(&self, saved: Session) -> BackendResult<Option<Session>> {
        let expires_at: Option<String> = self
            .pool
            .get()?
            .query_row(
                "SELECT expires_at FROM sessions WHERE refresh_token = ?1",
                params![saved.refresh_token],
                |row| row.get(0),
            )
            .optional()?;

        let Some(expires_at) = expires_at else {
            tracing::debug!("Saved session is no longer known");
            return Ok(None);
        };

        let still_valid = parse_timestamp(&expires_at)
            .map(|at| at > self.clock.now())
            .unwrap_or(false);

        if still_valid {
            self.auth
                .set(AuthEventKind::SignedIn, Some(saved.clone()))
                .await;
            Ok(Some(saved))
        } else {
            let session = self.rotate_session(&*self.pool.get()?, &saved.refresh_token)?;
            self.auth
                .set(AuthEventKind::TokenRefreshed, Some(session.clone()))
                .await;
            Ok(Some(session))
        }
    }

    fn subscribe(&self) -> AuthSubscription {
        self.auth.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordsApi;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn creds(email: &str) -> Credentials {
        Credentials {
            email: email.into(),
            password: "secret123".into(),
        }
    }

    fn backend(dir: &std::path::Path) -> (LocalBackend, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let backend = LocalBackend::in_memory(dir)
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
            .with_session_ttl(Duration::hours(1));
        (backend, clock)
    }

    #[tokio::test]
    async fn sign_up_creates_profile_in_same_step() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        let seed = ProfileSeed {
            username: "ana".into(),
            is_seller: true,
        };
        let outcome = backend
            .sign_up(&creds("Ana@Example.com"), Some(&seed))
            .await
            .unwrap();
        assert_eq!(outcome.identity.email, "ana@example.com");
        assert!(outcome.session.is_some());

        let profile = backend.profile(outcome.identity.id).await.unwrap();
        assert_eq!(profile.username, "ana");
        assert!(profile.is_seller);
    }

    #[tokio::test]
    async fn taken_username_rolls_back_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        let seed = ProfileSeed {
            username: "ana".into(),
            is_seller: false,
        };
        backend.sign_up(&creds("a@x.io"), Some(&seed)).await.unwrap();
        let err = backend
            .sign_up(&creds("b@x.io"), Some(&seed))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        // The identity must not exist without its profile
        let err = backend.sign_in(&creds("b@x.io")).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidCredentials));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        backend.sign_up(&creds("a@x.io"), None).await.unwrap();
        let err = backend.sign_up(&creds("a@x.io"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "User already registered");
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        let err = backend
            .sign_up(
                &Credentials {
                    email: "a@x.io".into(),
                    password: "123".into(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Invalid(_)));
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        backend.sign_up(&creds("a@x.io"), None).await.unwrap();
        let err = backend
            .sign_in(&Credentials {
                email: "a@x.io".into(),
                password: "nope-nope".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidCredentials));
    }

    #[tokio::test]
    async fn expired_session_is_not_current() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, clock) = backend(tmp.path());
        backend.sign_up(&creds("a@x.io"), None).await.unwrap();
        assert!(backend.current_session().await.unwrap().is_some());

        clock.advance(Duration::hours(2));
        assert!(backend.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_rotates_tokens_and_notifies() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        let first = backend.sign_up(&creds("a@x.io"), None).await.unwrap();
        let first = first.session.unwrap();

        let mut sub = backend.subscribe();
        let second = backend.refresh_session().await.unwrap();
        assert_ne!(first.access_token, second.access_token);
        assert_eq!(
            sub.recv().await.unwrap().kind,
            AuthEventKind::TokenRefreshed
        );

        // The old refresh token is spent
        let restored = backend.restore_session(first).await.unwrap();
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn restore_adopts_valid_session_and_refreshes_expired_one() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, clock) = backend(tmp.path());
        let saved = backend.sign_in_after_sign_up("a@x.io").await;

        let restored = backend.restore_session(saved.clone()).await.unwrap().unwrap();
        assert_eq!(restored.access_token, saved.access_token);

        clock.advance(Duration::hours(3));
        let refreshed = backend.restore_session(saved.clone()).await.unwrap().unwrap();
        assert_ne!(refreshed.access_token, saved.access_token);
        assert!(!refreshed.is_expired(clock_now(&clock)));
    }

    #[tokio::test]
    async fn sign_out_emits_signed_out_and_revokes() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        let saved = backend.sign_in_after_sign_up("a@x.io").await;
        let mut sub = backend.subscribe();

        backend.sign_out().await.unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, AuthEventKind::SignedOut);
        assert!(event.session.is_none());
        assert!(backend.current_session().await.unwrap().is_none());
        assert!(backend.restore_session(saved).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connection_is_back_in_the_pool_before_notifying() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());
        let backend = Arc::new(backend);

        // Hold the session slot so the notification step has to wait
        let held = backend.auth.current.read().await;
        let signing_up = tokio::spawn({
            let backend = backend.clone();
            async move { backend.sign_up(&creds("a@x.io"), None).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!signing_up.is_finished());
        assert!(backend
            .pool()
            .get_timeout(std::time::Duration::from_millis(200))
            .is_ok());

        drop(held);
        let outcome = signing_up.await.unwrap().unwrap();
        assert!(outcome.session.is_some());
    }

    fn clock_now(clock: &ManualClock) -> chrono::DateTime<Utc> {
        use crate::clock::Clock;
        clock.now()
    }

    impl LocalBackend {
        async fn sign_in_after_sign_up(&self, email: &str) -> Session {
            self.sign_up(&creds(email), None).await.unwrap();
            self.sign_in(&creds(email)).await.unwrap()
        }
    }
}
