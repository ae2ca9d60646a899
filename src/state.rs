use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::backend::hosted::HostedBackend;
use crate::backend::local::LocalBackend;
use crate::backend::{Session, SharedBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendKind, Config};
use crate::flows::account::AccountFlow;
use crate::flows::display::DisplayFlow;
use crate::flows::listing::ListingFlow;
use crate::flows::post::PostFlow;
use crate::flows::settings::SettingsFlow;
use crate::guard::RouteGuard;
use crate::media::ImageHostPolicy;
use crate::session::SessionStore;

/// Everything a command needs: one backend, one session store, and the
/// settings the flows are built from.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub data_dir: PathBuf,
    pub clock: Arc<dyn Clock>,
    pub backend: SharedBackend,
    pub store: Arc<SessionStore>,
    pub guard: RouteGuard,
    pub images: ImageHostPolicy,
}

impl AppState {
    /// Connect to the configured backend. A hosted backend without URL or
    /// key fails here, before anything else runs.
    pub fn build(config: Config, data_dir: PathBuf) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend: SharedBackend = match config.backend.kind {
            BackendKind::Local => {
                let db_path = config
                    .db_path()
                    .cloned()
                    .unwrap_or_else(|| data_dir.join("souk.db"));
                let storage = config
                    .storage_path()
                    .cloned()
                    .unwrap_or_else(|| data_dir.join("storage"));
                std::fs::create_dir_all(&storage)?;
                tracing::info!("Local backend at {}", db_path.display());

                let hours = i64::try_from(config.auth.session_hours).unwrap_or(24);
                Arc::new(
                    LocalBackend::open(&db_path, storage)?
                        .with_clock(clock.clone())
                        .with_public_base_url(config.local.public_base_url.clone())
                        .with_session_ttl(chrono::Duration::hours(hours)),
                )
            }
            BackendKind::Hosted => {
                let (url, key) = config.hosted_settings()?;
                tracing::info!("Hosted backend at {}", url);
                Arc::new(
                    HostedBackend::new(url, key)
                        .context("Invalid hosted backend settings")?
                        .with_clock(clock.clone()),
                )
            }
        };
        Ok(Self::with_backend(config, data_dir, backend, clock))
    }

    pub fn with_backend(
        config: Config,
        data_dir: PathBuf,
        backend: SharedBackend,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = RouteGuard::from(&config.routes);
        let images = ImageHostPolicy::new(&config.images.allowed_hosts, config.public_base_url());
        let store = SessionStore::new(backend.clone());
        Self {
            config,
            data_dir,
            clock,
            backend,
            store,
            guard,
            images,
        }
    }

    pub fn session_file(&self) -> SessionFile {
        SessionFile::new(self.data_dir.join("session.json"))
    }

    pub fn account_flow(&self) -> AccountFlow {
        AccountFlow::new(self.backend.clone())
    }

    pub fn post_flow(&self) -> PostFlow {
        PostFlow::new(
            self.backend.clone(),
            self.store.clone(),
            self.clock.clone(),
            &self.config.posts,
        )
    }

    pub fn listing_flow(&self) -> ListingFlow {
        ListingFlow::new(
            self.backend.clone(),
            self.store.clone(),
            self.clock.clone(),
            &self.config.listings,
        )
    }

    pub fn settings_flow(&self) -> SettingsFlow {
        SettingsFlow::new(
            self.backend.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.config.posts.max_image_bytes,
        )
    }

    pub fn display_flow(&self) -> DisplayFlow {
        DisplayFlow::new(self.backend.clone(), self.images.clone())
    }
}

/// The signed-in session, kept between CLI invocations.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable file is "no saved session".
    pub fn load(&self) -> Option<Session> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(session)?)?;
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
