//! Session/profile store: the single owner of "who is signed in and what
//! does their profile say". Consumers read snapshots or watch for changes;
//! only the store itself writes.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{AuthEvent, Identity, SharedBackend, Session};
use crate::db::models::Profile;
use crate::error::BackendResult;
use crate::guard::{GuardDecision, RouteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Anonymous,
    /// Signed in, but the profile is absent or could not be fetched.
    AuthenticatedNoProfile,
    AuthenticatedWithProfile,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub session: Option<Session>,
    pub profile: Option<Profile>,
}

impl SessionSnapshot {
    fn uninitialized() -> Self {
        Self {
            phase: Phase::Uninitialized,
            session: None,
            profile: None,
        }
    }

    pub fn user(&self) -> Option<&Identity> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Uninitialized | Phase::Loading)
    }

    pub fn route(&self, guard: &RouteGuard, path: &str) -> GuardDecision {
        guard.decide(path, self.is_loading(), self.session.is_some())
    }
}

pub struct SessionStore {
    backend: SharedBackend,
    state: watch::Sender<SessionSnapshot>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    pub fn new(backend: SharedBackend) -> Arc<Self> {
        let (state, _) = watch::channel(SessionSnapshot::uninitialized());
        Arc::new(Self {
            backend,
            state,
            listener: Mutex::new(None),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Wait until the published snapshot satisfies `pred`.
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = self.state.subscribe();
        let snap = match rx.wait_for(|snap| pred(snap)).await {
            Ok(snap) => snap.clone(),
            // The sender lives as long as `self`
            Err(_) => self.snapshot(),
        };
        snap
    }

    /// Load the current session and its profile, then follow auth notifications
    /// until `teardown`. Calling it again restarts the listener.
    pub async fn init(self: &Arc<Self>) -> SessionSnapshot {
        // Subscribe before reading so nothing slips between the read and the listener
        let mut subscription = self.backend.subscribe();

        self.set_loading();
        let session = match self.backend.current_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Error fetching session: {}", e);
                None
            }
        };
        let snapshot = self.resolve(session).await;

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(store) = weak.upgrade() else {
                    break;
                };
                store.apply(event).await;
            }
            tracing::debug!("Auth listener stopped");
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        snapshot
    }

    async fn apply(&self, event: AuthEvent) {
        tracing::debug!("Session store handling {:?}", event.kind);
        self.set_loading();
        self.resolve(event.session).await;
    }

    /// Publish `session` plus whatever profile can be fetched for it.
    async fn resolve(&self, session: Option<Session>) -> SessionSnapshot {
        let snapshot = match session {
            None => SessionSnapshot {
                phase: Phase::Anonymous,
                session: None,
                profile: None,
            },
            Some(session) => {
                let profile = self.load_profile(&session.user).await;
                SessionSnapshot {
                    phase: if profile.is_some() {
                        Phase::AuthenticatedWithProfile
                    } else {
                        Phase::AuthenticatedNoProfile
                    },
                    session: Some(session),
                    profile,
                }
            }
        };
        self.state.send_replace(snapshot.clone());
        snapshot
    }

    /// Failures are logged and collapse to "no profile".
    async fn load_profile(&self, user: &Identity) -> Option<Profile> {
        match self.backend.profile(user.id).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::error!("Error fetching profile for {}: {}", user.id, e);
                None
            }
        }
    }

    fn set_loading(&self) {
        self.state.send_modify(|snap| snap.phase = Phase::Loading);
    }

    /// Re-read the profile for the current user, e.g. after an update.
    pub async fn fetch_profile(&self) -> Option<Profile> {
        let Some(user) = self.snapshot().user().cloned() else {
            self.state.send_modify(|snap| snap.profile = None);
            return None;
        };

        let profile = self.load_profile(&user).await;
        self.state.send_modify(|snap| {
            // Only apply if the same user is still signed in
            if snap.user().map(|u| u.id) == Some(user.id) {
                snap.profile = profile.clone();
                snap.phase = if profile.is_some() {
                    Phase::AuthenticatedWithProfile
                } else {
                    Phase::AuthenticatedNoProfile
                };
            }
        });
        profile
    }

    /// Ask the backend to end the session. The store reads as loading until
    /// the sign-out notification clears it; a failed call restores the phase.
    pub async fn sign_out(&self) -> BackendResult<()> {
        let previous = self.state.borrow().phase;
        self.set_loading();
        let result = self.backend.sign_out().await;
        if let Err(e) = &result {
            tracing::error!("Error signing out: {}", e);
            self.state.send_if_modified(|snap| {
                if snap.phase == Phase::Loading {
                    snap.phase = previous;
                    true
                } else {
                    false
                }
            });
        }
        result
    }

    /// Stop following auth notifications. The last snapshot stays readable.
    pub fn teardown(&self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
            tracing::debug!("Session store torn down");
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.teardown();
    }
}
