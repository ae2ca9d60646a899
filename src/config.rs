use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

use crate::commands::Command;

pub const ENV_BACKEND_URL: &str = "SOUK_BACKEND_URL";
pub const ENV_BACKEND_ANON_KEY: &str = "SOUK_BACKEND_ANON_KEY";

#[derive(Parser, Debug)]
#[command(name = "souk", about = "Marketplace and social feed client")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Which backend to talk to
    #[arg(long, value_enum, global = true)]
    pub backend: Option<BackendKind>,

    /// Hosted backend URL
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Deserialize, ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite database and local object storage
    #[default]
    Local,
    /// Hosted backend-as-a-service over HTTP
    Hosted,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing backend setting: {0} (set it in config.toml or the environment)")]
    MissingBackendSetting(&'static str),
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub local: LocalConfig,
    pub auth: AuthConfig,
    pub routes: RoutesConfig,
    pub images: ImagesConfig,
    pub posts: PostsConfig,
    pub listings: ListingsConfig,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LocalConfig {
    pub database: Option<PathBuf>,
    pub storage: Option<PathBuf>,
    pub public_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub session_hours: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RoutesConfig {
    pub protected: Vec<String>,
    pub landing: String,
    pub home: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ImagesConfig {
    pub allowed_hosts: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PostsConfig {
    pub cooldown_ms: u64,
    pub duplicate_window_secs: u64,
    pub max_image_bytes: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ListingsConfig {
    pub max_images: usize,
    pub currency: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            database: None,
            storage: None,
            public_base_url: "http://localhost:54321".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { session_hours: 24 }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            protected: ["/dashboard", "/settings", "/create-listing", "/messages"]
                .into_iter()
                .map(String::from)
                .collect(),
            landing: "/".to_string(),
            home: "/dashboard".to_string(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: vec!["flagsapi.com".to_string()],
        }
    }
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 2000,
            duplicate_window_secs: 60,
            max_image_bytes: crate::media::MAX_IMAGE_BYTES,
        }
    }
}

impl Default for ListingsConfig {
    fn default() -> Self {
        Self {
            max_images: 5,
            currency: "USD".to_string(),
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli)?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // Environment overrides, then CLI overrides
        config.apply_env(|key| std::env::var(key).ok());
        if let Some(kind) = cli.backend {
            config.backend.kind = kind;
        }
        if let Some(ref url) = cli.backend_url {
            config.backend.url = Some(url.clone());
        }

        // Resolve paths relative to data dir
        if config.local.database.is_none() {
            config.local.database = Some(data_dir.join("souk.db"));
        }
        if config.local.storage.is_none() {
            config.local.storage = Some(data_dir.join("storage"));
        }

        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.is_empty()) {
            self.backend.url = Some(url);
        }
        if let Some(key) = lookup(ENV_BACKEND_ANON_KEY).filter(|v| !v.is_empty()) {
            self.backend.anon_key = Some(key);
        }
    }

    pub fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
        match cli.data_dir.clone() {
            Some(dir) => Ok(dir),
            None => dirs::home_dir()
                .map(|home| home.join(".souk"))
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory")),
        }
    }

    /// URL and anon key of the hosted backend. Either missing is fatal.
    pub fn hosted_settings(&self) -> Result<(&str, &str), ConfigError> {
        let url = self
            .backend
            .url
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingBackendSetting(ENV_BACKEND_URL))?;
        let key = self
            .backend
            .anon_key
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingBackendSetting(ENV_BACKEND_ANON_KEY))?;
        Ok((url, key))
    }

    /// Base URL public image links point at, for whichever backend is active.
    pub fn public_base_url(&self) -> Option<&str> {
        match self.backend.kind {
            BackendKind::Local => Some(self.local.public_base_url.as_str()),
            BackendKind::Hosted => self.backend.url.as_deref(),
        }
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.local.database.as_ref()
    }

    pub fn storage_path(&self) -> Option<&PathBuf> {
        self.local.storage.as_ref()
    }
}
