//! Self-hosted backend: SQLite for identities and records, the filesystem
//! for object storage.

mod auth;
mod records;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::Type;
use uuid::Uuid;

use super::AuthState;
use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::db::{self, DbPool};

pub struct LocalBackend {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    auth: AuthState,
    storage_root: PathBuf,
    public_base_url: String,
    session_ttl: chrono::Duration,
    bcrypt_cost: u32,
}

impl LocalBackend {
    /// Open (or create) the database at `db_path` and run migrations.
    pub fn open(db_path: &Path, storage_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let pool = db::create_pool(db_path)?;
        db::run_migrations(&pool)?;
        Ok(Self::from_pool(pool, storage_root.into()))
    }

    /// Throwaway database, for tests and demos.
    pub fn in_memory(storage_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let pool = db::create_memory_pool()?;
        db::run_migrations(&pool)?;
        Ok(Self::from_pool(pool, storage_root.into()).with_bcrypt_cost(4))
    }

    fn from_pool(pool: DbPool, storage_root: PathBuf) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
            auth: AuthState::new(),
            storage_root,
            public_base_url: "http://localhost:54321".to_string(),
            session_ttl: chrono::Duration::hours(24),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Raw pool access, for seeding rows the client never writes (comments, likes).
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    fn now(&self) -> String {
        format_timestamp(&self.clock.now())
    }
}

/// UUIDs are stored as hyphenated text.
pub(super) fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(super) fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
